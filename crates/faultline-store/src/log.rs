use anyhow::{Context, Result, anyhow};
use faultline_core::AnalysisResult;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Append-only JSON-lines log of analysis results.
///
/// All appends go through one mutex; each writes a whole line, flushes and
/// syncs before the lock is released, so a crash loses at most the record
/// being written and concurrent writers never interleave.
pub struct ResultLog {
    path: PathBuf,
    file: Mutex<File>,
}

impl ResultLog {
    /// Open `path` for a fresh run, discarding earlier records.
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to open result log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, result: &AnalysisResult) -> Result<()> {
        let mut line = serde_json::to_string(result)?;
        line.push('\n');
        let mut file = self
            .file
            .lock()
            .map_err(|_| anyhow!("result log lock poisoned"))?;
        file.write_all(line.as_bytes())
            .and_then(|_| file.flush())
            .and_then(|_| file.sync_data())
            .with_context(|| format!("failed to append to result log {}", self.path.display()))
    }
}

pub fn read_analysis_log(path: &Path) -> Result<Vec<AnalysisResult>> {
    let file = File::open(path)
        .with_context(|| format!("failed to open analysis log {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: AnalysisResult = serde_json::from_str(&line).with_context(|| {
            format!("analysis log {}: line {} is malformed", path.display(), idx + 1)
        })?;
        out.push(record);
    }
    Ok(out)
}
