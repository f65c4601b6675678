use anyhow::Result;
use faultline_agent::{AnalysisJob, RunSummary};
use faultline_extract::Extractor;
use faultline_store::ResultLog;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::AnalyzeArgs;
use crate::context::RunContext;
use crate::output::print_json;

pub(crate) fn run_analyze(workspace: &Path, args: AnalyzeArgs, json: bool, verbose: bool) -> Result<()> {
    let ctx = RunContext::new(workspace, &args.overrides, json, verbose)?;
    let metadata = ctx.existing_input(args.metadata.as_deref(), ctx.cfg.paths.metadata.as_deref())?;
    let files = ctx.files_dir(args.files.as_deref(), &metadata);
    let out = ctx.resolve(
        &args
            .out
            .unwrap_or_else(|| PathBuf::from(&ctx.cfg.paths.analysis_log)),
    );

    let summary = analyze_stage(&ctx, &metadata, files.as_deref(), &out)?;
    report(&ctx, &summary, files.as_deref(), &out, json)
}

/// Analyze every task in `metadata`, writing the result log at `out`.
pub(crate) fn analyze_stage(
    ctx: &RunContext,
    metadata: &Path,
    files: Option<&Path>,
    out: &Path,
) -> Result<RunSummary> {
    let tasks = ctx.load_tasks(metadata)?;
    if let Some(dir) = files
        && !dir.is_dir()
    {
        ctx.observer.warn_log(&format!(
            "files folder {} does not exist; tasks run without auxiliary content",
            dir.display()
        ));
    }
    let models = ctx.models()?;
    let analyzer = models.analyzer();
    let extractor = Extractor::new(&ctx.cfg.extract);
    let log = ResultLog::create(out)?;
    let scheduler = ctx.scheduler();
    scheduler.run_analysis(
        tasks,
        &AnalysisJob {
            analyzer: &analyzer,
            extractor: &extractor,
            files_dir: files,
            log: &log,
        },
    )
}

fn report(
    ctx: &RunContext,
    summary: &RunSummary,
    files: Option<&Path>,
    out: &Path,
    json: bool,
) -> Result<()> {
    if json {
        print_json(&json!({
            "stage": "analyze",
            "run_id": ctx.observer.run_id(),
            "summary": summary,
            "files_dir": files,
            "analysis_log": out,
        }))
    } else {
        ctx.observer.info(&format!(
            "analyzed {} of {} tasks ({} failed, {} skipped) -> {}",
            summary.processed,
            summary.total,
            summary.failed,
            summary.skipped,
            out.display()
        ));
        Ok(())
    }
}
