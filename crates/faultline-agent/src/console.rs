use std::io::{self, Write};
use std::sync::Mutex;

/// How streamed model output is shown while tasks run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoMode {
    Quiet,
    /// Fragments are printed as they arrive. Only sensible with one worker.
    Live,
    /// Each task's output is printed as one block when it finishes.
    Buffered,
}

impl EchoMode {
    pub fn for_workers(workers: usize, quiet: bool) -> Self {
        match (quiet, workers) {
            (true, _) => EchoMode::Quiet,
            (false, 0 | 1) => EchoMode::Live,
            (false, _) => EchoMode::Buffered,
        }
    }
}

/// Serializes progress output from concurrent workers onto stdout.
pub struct Console {
    mode: EchoMode,
    lock: Mutex<()>,
}

impl Console {
    pub fn new(mode: EchoMode) -> Self {
        Self {
            mode,
            lock: Mutex::new(()),
        }
    }

    pub fn mode(&self) -> EchoMode {
        self.mode
    }

    pub fn task<'a>(&'a self, task_id: &str, label: &str) -> TaskEcho<'a> {
        let header = format!("\n=== Task {task_id} {label} Start ===\n");
        let footer = format!("\n\n=== Task {task_id} {label} End ===\n");
        let echo = TaskEcho {
            console: self,
            header,
            footer,
            buffer: String::new(),
        };
        if self.mode == EchoMode::Live {
            self.print(&echo.header);
        }
        echo
    }

    fn print(&self, text: &str) {
        let _guard = self.lock.lock();
        let mut out = io::stdout().lock();
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }
}

/// Progress sink for one task.
pub struct TaskEcho<'a> {
    console: &'a Console,
    header: String,
    footer: String,
    buffer: String,
}

impl TaskEcho<'_> {
    pub fn fragment(&mut self, text: &str) {
        match self.console.mode {
            EchoMode::Quiet => {}
            EchoMode::Live => self.console.print(text),
            EchoMode::Buffered => self.buffer.push_str(text),
        }
    }

    /// Start a titled section inside the task block.
    pub fn section(&mut self, title: &str) {
        let marker = format!("\n--- {title} ---\n");
        match self.console.mode {
            EchoMode::Quiet => {}
            EchoMode::Live => self.console.print(&marker),
            EchoMode::Buffered => self.buffer.push_str(&marker),
        }
    }

    /// Drop buffered output from a failed attempt.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn finish(self) {
        match self.console.mode {
            EchoMode::Quiet => {}
            EchoMode::Live => self.console.print(&self.footer),
            EchoMode::Buffered => {
                let block = format!("{}{}{}", self.header, self.buffer, self.footer);
                self.console.print(&block);
            }
        }
    }
}
