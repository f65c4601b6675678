use anyhow::{Context, Result};
use faultline_core::RepairResult;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Write the submission array, replacing `path` atomically.
pub fn write_submission(path: &Path, results: &[RepairResult]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp = Path::new(&tmp_name);

    let body = serde_json::to_vec_pretty(results)?;
    let mut file = File::create(tmp)
        .with_context(|| format!("failed to create submission {}", tmp.display()))?;
    file.write_all(&body)?;
    file.write_all(b"\n")?;
    file.sync_all()?;
    drop(file);
    fs::rename(tmp, path)
        .with_context(|| format!("failed to move submission into {}", path.display()))?;
    Ok(())
}

pub fn read_submission(path: &Path) -> Result<Vec<RepairResult>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read submission {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("submission {} is not a JSON array of answers", path.display()))
}
