use anyhow::Result;
use chrono::Utc;
use faultline_core::{EventEnvelope, TaskEvent, runtime_dir};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Per-run logger shared by reference across worker threads.
pub struct Observer {
    log_path: PathBuf,
    run_id: Uuid,
    verbose: bool,
    write_lock: Mutex<()>,
}

impl Observer {
    pub fn new(workspace: &Path) -> Result<Self> {
        let dir = runtime_dir(workspace);
        fs::create_dir_all(&dir)?;
        Ok(Self {
            log_path: dir.join("observe.log"),
            run_id: Uuid::now_v7(),
            verbose: false,
            write_lock: Mutex::new(()),
        })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn record_event(&self, event: &EventEnvelope) -> Result<()> {
        self.append_log_line(&format!(
            "{} EVENT {}",
            Utc::now().to_rfc3339(),
            serde_json::to_string(event)?
        ))
    }

    /// Record `kind` under this run; warning-class events are echoed to stderr.
    pub fn event(&self, kind: TaskEvent) {
        if kind.is_warning() {
            eprintln!("[faultline WARN] {}", describe(&kind));
        } else {
            self.verbose_log(&describe(&kind));
        }
        let _ = self.record_event(&EventEnvelope::now(self.run_id, kind));
    }

    /// Enable or disable verbose logging to stderr.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn info(&self, msg: &str) {
        eprintln!("[faultline] {msg}");
    }

    /// Log a message to stderr with `[faultline]` prefix when verbose mode is on.
    pub fn verbose_log(&self, msg: &str) {
        if self.verbose {
            eprintln!("[faultline] {msg}");
        }
    }

    /// Log a warning to stderr and the log file.
    pub fn warn_log(&self, msg: &str) {
        eprintln!("[faultline WARN] {msg}");
        let _ = self.append_log_line(&format!("{} WARN {msg}", Utc::now().to_rfc3339()));
    }

    fn append_log_line(&self, line: &str) -> Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("observe log lock poisoned"))?;
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

fn describe(kind: &TaskEvent) -> String {
    match kind {
        TaskEvent::RunStarted {
            stage,
            total_tasks,
            workers,
        } => format!("{stage}: {total_tasks} task(s) on {workers} worker(s)"),
        TaskEvent::TaskStarted { task_id, attempt } => {
            format!("task {task_id}: started (attempt {attempt})")
        }
        TaskEvent::PseudoStepsGenerated { task_id, chars } => {
            format!("task {task_id}: generated pseudo-steps ({chars} chars)")
        }
        TaskEvent::PseudoStepsFallback { task_id, reason } => {
            format!("task {task_id}: pseudo-step generation failed, using question as steps: {reason}")
        }
        TaskEvent::ExtractionDiagnostic {
            task_id,
            diagnostic,
        } => format!("task {task_id}: auxiliary file unreadable: {diagnostic}"),
        TaskEvent::RepairDowngraded { task_id, reason } => {
            format!("task {task_id}: falling back to text repair: {reason}")
        }
        TaskEvent::TaskRetried {
            task_id,
            attempt,
            error,
        } => format!("task {task_id}: retrying (attempt {attempt}) after: {error}"),
        TaskEvent::TaskCompleted { task_id, chars } => {
            format!("task {task_id}: done ({chars} chars)")
        }
        TaskEvent::TaskFailed { task_id, error } => format!("task {task_id}: failed: {error}"),
        TaskEvent::RunFinished {
            stage,
            processed,
            failed,
            skipped,
        } => format!("{stage}: finished, {processed} processed, {failed} failed, {skipped} skipped"),
    }
}
