use anyhow::Result;
use faultline_agent::{RepairGenerator, RepairJob, RunSummary, load_code_examples};
use faultline_core::{AnalysisResult, TaskRecord};
use faultline_store::{read_analysis_log, write_submission};
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::RepairArgs;
use crate::context::RunContext;
use crate::output::print_json;

/// Inputs of the repair stage that do not come from the analysis log.
pub(crate) struct RepairInputs {
    pub metadata: PathBuf,
    pub code_dir: Option<PathBuf>,
    pub examples: Option<PathBuf>,
    pub no_few_shot: bool,
    pub out: PathBuf,
}

pub(crate) fn run_repair(workspace: &Path, args: RepairArgs, json: bool, verbose: bool) -> Result<()> {
    let ctx = RunContext::new(workspace, &args.overrides, json, verbose)?;
    let analysis_path = ctx.resolve(
        &args
            .analysis
            .unwrap_or_else(|| PathBuf::from(&ctx.cfg.paths.analysis_log)),
    );
    let analyses = read_analysis_log(&analysis_path)?;
    let inputs = RepairInputs {
        metadata: ctx.existing_input(args.metadata.as_deref(), ctx.cfg.paths.metadata.as_deref())?,
        code_dir: args.code_dir.map(|p| ctx.resolve(&p)),
        examples: args.examples.map(|p| ctx.resolve(&p)),
        no_few_shot: args.no_few_shot,
        out: ctx.resolve(
            &args
                .out
                .unwrap_or_else(|| PathBuf::from(&ctx.cfg.paths.submission)),
        ),
    };

    let summary = repair_stage(&ctx, analyses, &inputs)?;
    report(&ctx, &summary, &inputs.out, json)
}

/// Repair every successful analysis and write the submission array.
pub(crate) fn repair_stage(
    ctx: &RunContext,
    analyses: Vec<AnalysisResult>,
    inputs: &RepairInputs,
) -> Result<RunSummary> {
    let mut by_id: HashMap<String, TaskRecord> = HashMap::new();
    for task in ctx.load_tasks(&inputs.metadata)? {
        by_id.entry(task.task_id.clone()).or_insert(task);
    }

    let mut repair_cfg = ctx.cfg.repair.clone();
    if inputs.no_few_shot {
        repair_cfg.few_shot = false;
    }
    if let Some(dir) = &inputs.code_dir {
        repair_cfg.code_dir = Some(dir.to_string_lossy().to_string());
    } else if let Some(dir) = repair_cfg.code_dir.take() {
        repair_cfg.code_dir = Some(ctx.resolve(Path::new(&dir)).to_string_lossy().to_string());
    }
    let examples_path = inputs.examples.clone().or_else(|| {
        repair_cfg
            .examples_path
            .as_deref()
            .map(|p| ctx.resolve(Path::new(p)))
    });
    let examples = match examples_path {
        Some(path) => {
            let examples = load_code_examples(&path, repair_cfg.max_code_examples)?;
            ctx.observer.verbose_log(&format!(
                "loaded {} code repair examples from {}",
                examples.len(),
                path.display()
            ));
            examples
        }
        None => Vec::new(),
    };

    let models = ctx.models()?;
    let generator = RepairGenerator::new(
        models.repair_planner.clone(),
        models.verifier.clone(),
        &repair_cfg,
    )
    .with_examples(examples);
    let scheduler = ctx.scheduler();
    let (results, summary) = scheduler.run_repair(
        analyses,
        &RepairJob {
            generator: &generator,
            tasks: &by_id,
        },
    )?;
    write_submission(&inputs.out, &results)?;
    Ok(summary)
}

fn report(ctx: &RunContext, summary: &RunSummary, out: &Path, json: bool) -> Result<()> {
    if json {
        print_json(&json!({
            "stage": "repair",
            "run_id": ctx.observer.run_id(),
            "summary": summary,
            "submission": out,
        }))
    } else {
        ctx.observer.info(&format!(
            "repaired {} of {} tasks ({} failed, {} skipped) -> {}",
            summary.processed,
            summary.total,
            summary.failed,
            summary.skipped,
            out.display()
        ));
        Ok(())
    }
}
