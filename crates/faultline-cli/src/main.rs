use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use faultline_errors::ErrorHandler;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod context;
mod output;

use commands::analyze::run_analyze;
use commands::config::run_config;
use commands::extract::run_extract;
use commands::format::run_format;
use commands::repair::run_repair;
use commands::run::run_pipeline;

#[derive(Parser)]
#[command(name = "faultline")]
#[command(about = "Causal failure analysis and repair for agent task traces", long_about = None)]
struct Cli {
    /// Print machine-readable summaries.
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Directory holding `.faultline/`; relative paths resolve against it.
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Produce a causal analysis for every task in the metadata source.
    Analyze(AnalyzeArgs),
    /// Turn an analysis log into a submission file.
    Repair(RepairArgs),
    /// Analyze, then repair.
    Run(PipelineArgs),
    /// Print the extracted content of a task's companion file.
    Extract(ExtractArgs),
    /// Reduce submitted answers to their core (fenced code or final answer).
    Format(FormatArgs),
    Config {
        #[command(subcommand)]
        command: ConfigCmd,
    },
}

/// Per-invocation overrides applied on top of the layered config.
#[derive(Args, Clone, Default)]
struct RunOverrides {
    /// Number of concurrent tasks.
    #[arg(long)]
    workers: Option<usize>,

    /// Model server base URL.
    #[arg(long)]
    endpoint: Option<String>,

    /// Do not echo model output.
    #[arg(long)]
    quiet: bool,
}

#[derive(Args)]
struct AnalyzeArgs {
    /// JSON-lines or JSON-array task metadata.
    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Folder with `<task_id>.<ext>` companion files.
    #[arg(long)]
    files: Option<PathBuf>,

    /// Result log path.
    #[arg(long)]
    out: Option<PathBuf>,

    #[command(flatten)]
    overrides: RunOverrides,
}

#[derive(Args)]
struct RepairArgs {
    /// Analysis log written by `analyze`.
    #[arg(long)]
    analysis: Option<PathBuf>,

    #[arg(long)]
    metadata: Option<PathBuf>,

    /// Folder holding code files named by `file_name`.
    #[arg(long = "code-dir")]
    code_dir: Option<PathBuf>,

    /// JSON-lines library of `code_repair` examples.
    #[arg(long)]
    examples: Option<PathBuf>,

    /// Submission path.
    #[arg(long)]
    out: Option<PathBuf>,

    /// Leave the worked examples out of text-repair prompts.
    #[arg(long = "no-few-shot")]
    no_few_shot: bool,

    #[command(flatten)]
    overrides: RunOverrides,
}

#[derive(Args)]
struct PipelineArgs {
    #[arg(long)]
    metadata: Option<PathBuf>,

    #[arg(long)]
    files: Option<PathBuf>,

    /// Result log path for the analysis stage.
    #[arg(long)]
    analysis: Option<PathBuf>,

    #[arg(long = "code-dir")]
    code_dir: Option<PathBuf>,

    #[arg(long)]
    examples: Option<PathBuf>,

    /// Submission path.
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long = "no-few-shot")]
    no_few_shot: bool,

    #[command(flatten)]
    overrides: RunOverrides,
}

#[derive(Args)]
struct ExtractArgs {
    task_id: String,

    #[arg(long)]
    files: Option<PathBuf>,
}

#[derive(Args)]
struct FormatArgs {
    submission: PathBuf,

    /// Write here instead of rewriting the input.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the effective configuration with secrets redacted.
    Show,
    /// Write the effective configuration to `.faultline/settings.json`.
    Init,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let handler = ErrorHandler::new().verbose(cli.verbose);
    let json_mode = cli.json;
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if json_mode {
                println!("{}", handler.to_json(&err));
            } else {
                eprint!("{}", handler.handle(&err));
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let workspace = match cli.workspace {
        Some(path) => path,
        None => std::env::current_dir()?,
    };
    let json = cli.json;
    let verbose = cli.verbose;

    match cli.command {
        Commands::Analyze(args) => run_analyze(&workspace, args, json, verbose),
        Commands::Repair(args) => run_repair(&workspace, args, json, verbose),
        Commands::Run(args) => run_pipeline(&workspace, args, json, verbose),
        Commands::Extract(args) => run_extract(&workspace, args, json),
        Commands::Format(args) => run_format(&workspace, args, json),
        Commands::Config { command } => run_config(&workspace, command, json),
    }
}
