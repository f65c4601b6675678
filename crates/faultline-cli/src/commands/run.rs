use anyhow::Result;
use faultline_store::read_analysis_log;
use serde_json::json;
use std::path::{Path, PathBuf};

use crate::PipelineArgs;
use crate::commands::analyze::analyze_stage;
use crate::commands::repair::{RepairInputs, repair_stage};
use crate::context::RunContext;
use crate::output::print_json;

pub(crate) fn run_pipeline(workspace: &Path, args: PipelineArgs, json: bool, verbose: bool) -> Result<()> {
    let ctx = RunContext::new(workspace, &args.overrides, json, verbose)?;
    let metadata = ctx.existing_input(args.metadata.as_deref(), ctx.cfg.paths.metadata.as_deref())?;
    let files = ctx.files_dir(args.files.as_deref(), &metadata);
    let analysis_log = ctx.resolve(
        &args
            .analysis
            .unwrap_or_else(|| PathBuf::from(&ctx.cfg.paths.analysis_log)),
    );

    let analysis = analyze_stage(&ctx, &metadata, files.as_deref(), &analysis_log)?;
    let analyses = read_analysis_log(&analysis_log)?;

    let inputs = RepairInputs {
        metadata,
        code_dir: args.code_dir.map(|p| ctx.resolve(&p)),
        examples: args.examples.map(|p| ctx.resolve(&p)),
        no_few_shot: args.no_few_shot,
        out: ctx.resolve(
            &args
                .out
                .unwrap_or_else(|| PathBuf::from(&ctx.cfg.paths.submission)),
        ),
    };
    let repair = repair_stage(&ctx, analyses, &inputs)?;

    if json {
        print_json(&json!({
            "stage": "run",
            "run_id": ctx.observer.run_id(),
            "analysis": analysis,
            "repair": repair,
            "analysis_log": analysis_log,
            "submission": inputs.out,
        }))
    } else {
        ctx.observer.info(&format!(
            "analysis: {} ok, {} failed, {} skipped; repair: {} ok, {} failed -> {}",
            analysis.processed,
            analysis.failed,
            analysis.skipped,
            repair.processed,
            repair.failed,
            inputs.out.display()
        ));
        Ok(())
    }
}
