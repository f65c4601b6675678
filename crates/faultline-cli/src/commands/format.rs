use anyhow::Result;
use faultline_core::RepairResult;
use faultline_store::{format_answer, read_submission, write_submission};
use serde_json::json;
use std::path::Path;

use crate::FormatArgs;
use crate::context::resolve_path;
use crate::output::print_json;

pub(crate) fn run_format(workspace: &Path, args: FormatArgs, json: bool) -> Result<()> {
    let input = resolve_path(workspace, &args.submission);
    let out = args
        .out
        .map(|p| resolve_path(workspace, &p))
        .unwrap_or_else(|| input.clone());

    let results = read_submission(&input)?;
    let mut changed = 0usize;
    let formatted: Vec<RepairResult> = results
        .into_iter()
        .map(|result| {
            let answer = format_answer(&result.submitted_answer);
            if answer != result.submitted_answer {
                changed += 1;
            }
            RepairResult {
                task_id: result.task_id,
                submitted_answer: answer,
            }
        })
        .collect();
    write_submission(&out, &formatted)?;

    if json {
        print_json(&json!({
            "answers": formatted.len(),
            "changed": changed,
            "submission": out,
        }))
    } else {
        println!(
            "formatted {} answers ({} changed) -> {}",
            formatted.len(),
            changed,
            out.display()
        );
        Ok(())
    }
}
