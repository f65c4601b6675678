use anyhow::{Context, Result};
use faultline_agent::{EchoMode, ModelSet, Scheduler};
use faultline_core::{AppConfig, TaskRecord};
use faultline_errors::errors;
use faultline_llm::OllamaClient;
use faultline_observe::Observer;
use faultline_store::read_metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::RunOverrides;

/// Config, logger and model handles for one invocation.
pub(crate) struct RunContext {
    pub workspace: PathBuf,
    pub cfg: AppConfig,
    pub observer: Observer,
    quiet: bool,
}

impl RunContext {
    pub fn new(workspace: &Path, overrides: &RunOverrides, json: bool, verbose: bool) -> Result<Self> {
        let mut cfg = AppConfig::load(workspace).context("failed to load config")?;
        apply_overrides(&mut cfg, overrides);
        let mut observer = Observer::new(workspace)?;
        observer.set_verbose(verbose);
        Ok(Self {
            workspace: workspace.to_path_buf(),
            cfg,
            observer,
            quiet: overrides.quiet || json,
        })
    }

    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve_path(&self.workspace, path)
    }

    /// CLI value, else the configured one.
    pub fn path_or(&self, flag: Option<&Path>, configured: Option<&str>) -> Option<PathBuf> {
        flag.map(Path::to_path_buf)
            .or_else(|| configured.map(PathBuf::from))
            .map(|p| self.resolve(&p))
    }

    /// Companion-file folder: the flag, else the configured one, else the
    /// folder holding the metadata file.
    pub fn files_dir(&self, flag: Option<&Path>, metadata: &Path) -> Option<PathBuf> {
        self.path_or(flag, self.cfg.paths.files_dir.as_deref())
            .or_else(|| metadata.parent().map(Path::to_path_buf))
    }

    pub fn existing_input(&self, flag: Option<&Path>, configured: Option<&str>) -> Result<PathBuf> {
        let path = self
            .path_or(flag, configured)
            .ok_or_else(|| errors::missing_metadata().into_error())?;
        if !path.exists() {
            return Err(errors::file_not_found(&path.display().to_string()).into_error());
        }
        Ok(path)
    }

    pub fn models(&self) -> Result<ModelSet> {
        let client = OllamaClient::new(self.cfg.endpoint.clone())
            .context("failed to build model endpoint client")?;
        self.observer.verbose_log(&format!(
            "endpoint {} (run {})",
            client.endpoint(),
            self.observer.run_id()
        ));
        Ok(ModelSet::from_config(Arc::new(client), &self.cfg))
    }

    pub fn scheduler(&self) -> Scheduler<'_> {
        let echo = EchoMode::for_workers(self.cfg.scheduler.workers, self.quiet);
        Scheduler::new(&self.cfg.scheduler, &self.observer, echo)
    }

    pub fn load_tasks(&self, path: &Path) -> Result<Vec<TaskRecord>> {
        let tasks = read_metadata(path)?;
        self.observer
            .verbose_log(&format!("loaded {} tasks from {}", tasks.len(), path.display()));
        Ok(tasks)
    }
}

pub(crate) fn apply_overrides(cfg: &mut AppConfig, overrides: &RunOverrides) {
    if let Some(workers) = overrides.workers
        && workers > 0
    {
        cfg.scheduler.workers = workers;
    }
    if let Some(endpoint) = overrides.endpoint.as_deref()
        && !endpoint.trim().is_empty()
    {
        cfg.endpoint.base_url = endpoint.trim().to_string();
    }
}

pub(crate) fn resolve_path(workspace: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}
