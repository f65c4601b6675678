use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub type Result<T> = anyhow::Result<T>;

/// Prefix written into `causal_analysis` when the primary analysis call failed.
pub const ANALYSIS_FAILURE_PREFIX: &str = "[ANALYSIS FAILED: ";
/// Prefix written into `submitted_answer` when repair generation failed.
pub const REPAIR_FAILURE_PREFIX: &str = "AGENT ERROR: ";

/// Text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

pub fn runtime_dir(workspace: &Path) -> PathBuf {
    workspace.join(".faultline")
}

/// One unit of work as supplied by the metadata source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: String,
    #[serde(default)]
    pub steps_text: String,
    #[serde(default)]
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    /// Buggy code carried inline by debug datasets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl TaskRecord {
    pub fn has_steps(&self) -> bool {
        !self.steps_text.trim().is_empty()
    }

    /// A task with neither steps nor a question gives the analyzer nothing to seed on.
    pub fn is_analyzable(&self) -> bool {
        self.has_steps() || !self.question.trim().is_empty()
    }
}

/// Record appended to the result log, one per task per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub task_id: String,
    pub causal_analysis: String,
}

impl AnalysisResult {
    pub fn failed(task_id: impl Into<String>, message: &str) -> Self {
        Self {
            task_id: task_id.into(),
            causal_analysis: format!("{ANALYSIS_FAILURE_PREFIX}{message}]"),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.causal_analysis.starts_with(ANALYSIS_FAILURE_PREFIX)
    }
}

/// Entry of the submission artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairResult {
    pub task_id: String,
    pub submitted_answer: String,
}

impl RepairResult {
    pub fn failed(task_id: impl Into<String>, message: &str) -> Self {
        Self {
            task_id: task_id.into(),
            submitted_answer: format!("{REPAIR_FAILURE_PREFIX}{message}"),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.submitted_answer.starts_with(REPAIR_FAILURE_PREFIX)
    }
}

/// Which model a request is made for. Each role maps to its own `ModelConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
    Causal,
    PseudoSteps,
    RepairPlanner,
    Verifier,
}

impl ModelRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Causal => "causal",
            ModelRole::PseudoSteps => "pseudo_steps",
            ModelRole::RepairPlanner => "repair_planner",
            ModelRole::Verifier => "verifier",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub run_id: Uuid,
    pub at: DateTime<Utc>,
    pub kind: TaskEvent,
}

impl EventEnvelope {
    pub fn now(run_id: Uuid, kind: TaskEvent) -> Self {
        Self {
            run_id,
            at: Utc::now(),
            kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TaskEvent {
    RunStarted {
        stage: String,
        total_tasks: usize,
        workers: usize,
    },
    TaskStarted {
        task_id: String,
        attempt: u8,
    },
    PseudoStepsGenerated {
        task_id: String,
        chars: usize,
    },
    PseudoStepsFallback {
        task_id: String,
        reason: String,
    },
    ExtractionDiagnostic {
        task_id: String,
        diagnostic: String,
    },
    RepairDowngraded {
        task_id: String,
        reason: String,
    },
    TaskRetried {
        task_id: String,
        attempt: u8,
        error: String,
    },
    TaskCompleted {
        task_id: String,
        chars: usize,
    },
    TaskFailed {
        task_id: String,
        error: String,
    },
    RunFinished {
        stage: String,
        processed: usize,
        failed: usize,
        skipped: usize,
    },
}

impl TaskEvent {
    pub fn task_id(&self) -> Option<&str> {
        match self {
            TaskEvent::TaskStarted { task_id, .. }
            | TaskEvent::PseudoStepsGenerated { task_id, .. }
            | TaskEvent::PseudoStepsFallback { task_id, .. }
            | TaskEvent::ExtractionDiagnostic { task_id, .. }
            | TaskEvent::RepairDowngraded { task_id, .. }
            | TaskEvent::TaskRetried { task_id, .. }
            | TaskEvent::TaskCompleted { task_id, .. }
            | TaskEvent::TaskFailed { task_id, .. } => Some(task_id),
            TaskEvent::RunStarted { .. } | TaskEvent::RunFinished { .. } => None,
        }
    }

    pub fn is_warning(&self) -> bool {
        matches!(
            self,
            TaskEvent::PseudoStepsFallback { .. }
                | TaskEvent::ExtractionDiagnostic { .. }
                | TaskEvent::RepairDowngraded { .. }
                | TaskEvent::TaskRetried { .. }
                | TaskEvent::TaskFailed { .. }
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub endpoint: EndpointConfig,
    pub models: ModelsConfig,
    pub scheduler: SchedulerConfig,
    pub extract: ExtractConfig,
    pub repair: RepairConfig,
    pub paths: PathsConfig,
}

impl AppConfig {
    pub fn user_settings_path() -> Option<PathBuf> {
        let home = std::env::var("HOME")
            .ok()
            .or_else(|| std::env::var("USERPROFILE").ok())?;
        Some(Path::new(&home).join(".faultline/settings.json"))
    }

    pub fn project_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.json")
    }

    pub fn project_local_settings_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("settings.local.json")
    }

    pub fn toml_path(workspace: &Path) -> PathBuf {
        runtime_dir(workspace).join("config.toml")
    }

    /// Layered load: defaults, `config.toml`, user settings, project settings,
    /// project-local settings, then environment overrides.
    pub fn load(workspace: &Path) -> Result<Self> {
        let mut paths = Vec::new();
        if let Some(user) = Self::user_settings_path() {
            paths.push(user);
        }
        paths.push(Self::project_settings_path(workspace));
        paths.push(Self::project_local_settings_path(workspace));

        let mut cfg = Self::load_layers(&Self::toml_path(workspace), &paths)?;
        cfg.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    fn load_layers(toml_path: &Path, json_paths: &[PathBuf]) -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        if toml_path.exists() {
            let raw = fs::read_to_string(toml_path)?;
            let value: toml::Table = toml::from_str(&raw)?;
            merge_json_value(&mut merged, &serde_json::to_value(value)?);
        }

        for path in json_paths {
            if !path.exists() {
                continue;
            }
            let raw = fs::read_to_string(path)?;
            let value: serde_json::Value = serde_json::from_str(&raw)?;
            merge_json_value(&mut merged, &value);
        }

        Ok(serde_json::from_value(merged)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup("FAULTLINE_ENDPOINT")
            && !endpoint.trim().is_empty()
        {
            self.endpoint.base_url = endpoint.trim().to_string();
        }
        if let Some(workers) = lookup("FAULTLINE_WORKERS")
            && let Ok(parsed) = workers.trim().parse::<usize>()
            && parsed > 0
        {
            self.scheduler.workers = parsed;
        }
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        let path = Self::project_settings_path(workspace);
        fs::create_dir_all(
            path.parent()
                .ok_or_else(|| anyhow::anyhow!("invalid config path"))?,
        )?;
        fs::write(path, serde_json::to_vec_pretty(self)?)?;
        Ok(())
    }

    pub fn model(&self, role: ModelRole) -> &ModelConfig {
        match role {
            ModelRole::Causal => &self.models.causal,
            ModelRole::PseudoSteps => &self.models.pseudo_steps,
            ModelRole::RepairPlanner => &self.models.repair_planner,
            ModelRole::Verifier => &self.models.verifier,
        }
    }
}

fn merge_json_value(base: &mut serde_json::Value, overlay: &serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_obj), serde_json::Value::Object(overlay_obj)) => {
            for (key, overlay_value) in overlay_obj {
                if let Some(base_value) = base_obj.get_mut(key) {
                    merge_json_value(base_value, overlay_value);
                } else {
                    base_obj.insert(key.clone(), overlay_value.clone());
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_seconds: u64,
    pub seed: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            api_key: Some("ollama".to_string()),
            timeout_seconds: 300,
            seed: 42,
        }
    }
}

impl EndpointConfig {
    pub fn chat_completions_url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub model: String,
    pub max_tokens: u32,
}

impl ModelConfig {
    pub fn new(model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            model: model.into(),
            max_tokens,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelsConfig {
    pub causal: ModelConfig,
    pub pseudo_steps: ModelConfig,
    pub repair_planner: ModelConfig,
    pub verifier: ModelConfig,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            causal: ModelConfig::new("nous-hermes2-mixtral:latest", 512),
            pseudo_steps: ModelConfig::new("llama3.1:8b", 256),
            repair_planner: ModelConfig::new("deepseek-coder-v2:16b", 2048),
            verifier: ModelConfig::new("llama3.1:8b", 256),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub task_retries: u8,
    pub retry_base_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            task_retries: 1,
            retry_base_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub tesseract_cmd: String,
    pub ocr_timeout_seconds: u64,
    pub max_file_bytes: u64,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            tesseract_cmd: "tesseract".to_string(),
            ocr_timeout_seconds: 60,
            max_file_bytes: 50 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairConfig {
    pub few_shot: bool,
    pub code_dir: Option<String>,
    pub examples_path: Option<String>,
    pub max_code_examples: usize,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            few_shot: true,
            code_dir: None,
            examples_path: None,
            max_code_examples: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub metadata: Option<String>,
    pub files_dir: Option<String>,
    pub analysis_log: String,
    pub submission: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            metadata: None,
            files_dir: None,
            analysis_log: "causal_outputs.jsonl".to_string(),
            submission: "output.json".to_string(),
        }
    }
}
