use anyhow::{Result, anyhow};
use faultline_core::AppConfig;
use faultline_extract::Extractor;
use std::path::Path;

use crate::ExtractArgs;
use crate::context::resolve_path;
use crate::output::print_json;

pub(crate) fn run_extract(workspace: &Path, args: ExtractArgs, json: bool) -> Result<()> {
    let cfg = AppConfig::load(workspace)?;
    let folder = args
        .files
        .or_else(|| cfg.paths.files_dir.as_ref().map(Into::into))
        .map(|p| resolve_path(workspace, &p))
        .ok_or_else(|| anyhow!("no files folder: pass --files or set paths.files_dir"))?;

    let extraction = Extractor::new(&cfg.extract).extract_detailed(&args.task_id, &folder);
    if json {
        return print_json(&extraction);
    }
    match &extraction.path {
        Some(path) => {
            if let Some(diagnostic) = &extraction.diagnostic {
                eprintln!("[faultline WARN] {diagnostic}");
            } else {
                eprintln!("[faultline] {}", path.display());
            }
            println!("{}", extraction.text);
        }
        None => eprintln!(
            "[faultline] no companion file for task {} in {}",
            args.task_id,
            folder.display()
        ),
    }
    Ok(())
}
