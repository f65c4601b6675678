use crate::ModelHandle;
use crate::errors::TaskError;
use crate::prompts::{self, CodeRepairExample};
use anyhow::{Context, Result};
use faultline_core::{RepairConfig, TaskRecord};
use serde::Serialize;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

/// File extensions that mark a task as a code task.
pub const CODE_EXTENSIONS: &[&str] = &[
    "py", "js", "ts", "java", "c", "cpp", "cc", "h", "hpp", "rs", "go", "rb", "php", "cs", "kt",
    "swift", "sh", "sql", "scala",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairPath {
    Code,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairOutcome {
    pub task_id: String,
    pub submitted_answer: String,
    pub path: RepairPath,
    /// Why a code task was answered on the text path instead.
    pub downgraded: Option<String>,
}

pub fn is_code_task(task: &TaskRecord) -> bool {
    if task.code.as_deref().is_some_and(|c| !c.trim().is_empty()) {
        return true;
    }
    task.file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            let ext = ext.to_ascii_lowercase();
            CODE_EXTENSIONS.contains(&ext.as_str())
        })
}

/// Load `type: code_repair` records from a JSON-lines library, keeping at most `cap`.
pub fn load_code_examples(path: &Path, cap: usize) -> Result<Vec<CodeRepairExample>> {
    let file = fs::File::open(path)
        .with_context(|| format!("failed to open repair examples {}", path.display()))?;
    let mut out = Vec::new();
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        if out.len() >= cap {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&line).with_context(|| {
            format!("repair examples {}: line {} is not JSON", path.display(), idx + 1)
        })?;
        if value.get("type").and_then(|t| t.as_str()) != Some("code_repair") {
            continue;
        }
        if let Ok(example) = serde_json::from_value::<CodeRepairExample>(value) {
            out.push(example);
        }
    }
    Ok(out)
}

/// Turns an analysis into a submitted answer.
#[derive(Debug, Clone)]
pub struct RepairGenerator {
    planner: ModelHandle,
    verifier: ModelHandle,
    few_shot: bool,
    code_dir: Option<PathBuf>,
    examples: Vec<CodeRepairExample>,
}

impl RepairGenerator {
    pub fn new(planner: ModelHandle, verifier: ModelHandle, cfg: &RepairConfig) -> Self {
        Self {
            planner,
            verifier,
            few_shot: cfg.few_shot,
            code_dir: cfg.code_dir.as_ref().map(PathBuf::from),
            examples: Vec::new(),
        }
    }

    pub fn with_examples(mut self, examples: Vec<CodeRepairExample>) -> Self {
        self.examples = examples;
        self
    }

    /// Source of the buggy program: inline code, then `file_path`, then
    /// `<code_dir>/<file_name>`.
    pub fn locate_code(&self, task: &TaskRecord) -> Result<String, TaskError> {
        if let Some(code) = task.code.as_deref().filter(|c| !c.trim().is_empty()) {
            return Ok(code.to_string());
        }
        let mut candidates = Vec::new();
        if let Some(path) = task.file_path.as_deref() {
            candidates.push(PathBuf::from(path));
        }
        if let (Some(dir), Some(name)) = (self.code_dir.as_ref(), task.file_name.as_deref()) {
            candidates.push(dir.join(name));
        }
        for candidate in &candidates {
            if candidate.is_file() {
                let bytes = fs::read(candidate).map_err(|e| {
                    TaskError::MissingResource(format!("{}: {e}", candidate.display()))
                })?;
                return Ok(String::from_utf8_lossy(&bytes).to_string());
            }
        }
        Err(TaskError::MissingResource(format!(
            "no code found for task {} (file_name {:?})",
            task.task_id,
            task.file_name.as_deref().unwrap_or("")
        )))
    }

    pub fn repair(&self, task: &TaskRecord, analysis: &str) -> Result<RepairOutcome, TaskError> {
        let mut downgraded = None;
        if is_code_task(task) {
            match self.locate_code(task) {
                Ok(code) => {
                    let prompt = prompts::code_repair_prompt(analysis, &code, &self.examples);
                    let patch = self.planner.text(prompt)?;
                    return Ok(RepairOutcome {
                        task_id: task.task_id.clone(),
                        submitted_answer: patch,
                        path: RepairPath::Code,
                        downgraded: None,
                    });
                }
                Err(err) => downgraded = Some(err.to_string()),
            }
        }

        let prompt = prompts::text_repair_prompt(&task.question, analysis, self.few_shot);
        let answer = self.verifier.text(prompt)?;
        Ok(RepairOutcome {
            task_id: task.task_id.clone(),
            submitted_answer: clean_text_answer(&answer),
            path: RepairPath::Text,
            downgraded,
        })
    }
}

fn clean_text_answer(raw: &str) -> String {
    raw.trim()
        .trim_matches(|c: char| c == '"' || c == '\'' || c.is_whitespace())
        .to_string()
}
