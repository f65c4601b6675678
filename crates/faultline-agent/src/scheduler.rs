use crate::analyzer::{AnalysisPhase, CausalAnalyzer, StepsSource};
use crate::console::{Console, EchoMode};
use crate::errors::TaskError;
use crate::repair::{RepairGenerator, RepairPath};
use anyhow::{Context, Result};
use faultline_core::{
    AnalysisResult, RepairResult, SchedulerConfig, TaskEvent, TaskRecord, panic_message,
};
use faultline_extract::Extractor;
use faultline_observe::Observer;
use faultline_store::ResultLog;
use serde::Serialize;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Verdict {
    Processed,
    Failed,
    Skipped,
}

impl RunSummary {
    fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Processed => self.processed += 1,
            Verdict::Failed => self.failed += 1,
            Verdict::Skipped => self.skipped += 1,
        }
    }
}

/// Everything an analysis run needs besides the tasks.
pub struct AnalysisJob<'a> {
    pub analyzer: &'a CausalAnalyzer,
    pub extractor: &'a Extractor,
    /// Folder holding `<task_id>.<ext>` companion files.
    pub files_dir: Option<&'a Path>,
    pub log: &'a ResultLog,
}

pub struct RepairJob<'a> {
    pub generator: &'a RepairGenerator,
    /// Metadata by `task_id`.
    pub tasks: &'a HashMap<String, TaskRecord>,
}

/// Runs whole-task pipelines on a bounded worker pool and collects results
/// in completion order.
pub struct Scheduler<'a> {
    workers: usize,
    task_retries: u8,
    retry_base: Duration,
    observer: &'a Observer,
    console: Console,
}

impl<'a> Scheduler<'a> {
    pub fn new(cfg: &SchedulerConfig, observer: &'a Observer, echo: EchoMode) -> Self {
        Self {
            workers: cfg.workers.max(1),
            task_retries: cfg.task_retries,
            retry_base: Duration::from_millis(cfg.retry_base_ms),
            observer,
            console: Console::new(echo),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Analyze every task, appending one record per attempted task to the
    /// result log as it completes. Only a result-log failure aborts the run.
    pub fn run_analysis(&self, tasks: Vec<TaskRecord>, job: &AnalysisJob<'_>) -> Result<RunSummary> {
        let mut summary = RunSummary {
            total: tasks.len(),
            ..RunSummary::default()
        };
        self.observer.event(TaskEvent::RunStarted {
            stage: "analyze".to_string(),
            total_tasks: tasks.len(),
            workers: self.workers,
        });
        let outcome = self.run_pool(
            tasks,
            |task| self.analyze_task(task, job),
            |task, message| self.analysis_panicked(task, &message, job),
            |verdict| summary.record(verdict),
        );
        self.finish("analyze", &summary);
        outcome?;
        Ok(summary)
    }

    /// Repair every successful analysis. Results keep the analysis-log order.
    pub fn run_repair(
        &self,
        analyses: Vec<AnalysisResult>,
        job: &RepairJob<'_>,
    ) -> Result<(Vec<RepairResult>, RunSummary)> {
        let mut summary = RunSummary {
            total: analyses.len(),
            ..RunSummary::default()
        };
        self.observer.event(TaskEvent::RunStarted {
            stage: "repair".to_string(),
            total_tasks: analyses.len(),
            workers: self.workers,
        });
        let mut slots: Vec<Option<RepairResult>> = vec![None; analyses.len()];
        let items: Vec<(usize, AnalysisResult)> = analyses.into_iter().enumerate().collect();
        let outcome = self.run_pool(
            items,
            |(idx, analysis)| Ok((*idx, self.repair_task(analysis, job))),
            |(idx, analysis), message| Ok((*idx, self.repair_panicked(analysis, &message))),
            |(idx, (verdict, result))| {
                summary.record(verdict);
                slots[idx] = result;
            },
        );
        self.finish("repair", &summary);
        outcome?;
        Ok((slots.into_iter().flatten().collect(), summary))
    }

    fn finish(&self, stage: &str, summary: &RunSummary) {
        self.observer.event(TaskEvent::RunFinished {
            stage: stage.to_string(),
            processed: summary.processed,
            failed: summary.failed,
            skipped: summary.skipped,
        });
    }

    /// Run `work` for every item. A panicking job is turned into a result by
    /// `recover`; an `Err` from either stops new jobs and is returned.
    fn run_pool<T, R, F, P>(
        &self,
        items: Vec<T>,
        work: F,
        recover: P,
        mut on_done: impl FnMut(R),
    ) -> Result<()>
    where
        T: Send,
        R: Send,
        F: Fn(&T) -> Result<R, TaskError> + Sync,
        P: Fn(&T, String) -> Result<R, TaskError> + Sync,
    {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.workers)
            .thread_name(|i| format!("faultline-worker-{i}"))
            .build()
            .context("failed to start worker pool")?;
        let (tx, rx) = mpsc::channel::<Result<R, TaskError>>();
        let stop = AtomicBool::new(false);
        let mut fatal = None;

        pool.in_place_scope(|scope| {
            for item in items {
                let tx = tx.clone();
                let work = &work;
                let recover = &recover;
                let stop = &stop;
                scope.spawn(move |_| {
                    if stop.load(Ordering::SeqCst) {
                        return;
                    }
                    let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&item)))
                        .unwrap_or_else(|payload| recover(&item, panic_message(payload.as_ref())));
                    let _ = tx.send(outcome);
                });
            }
            drop(tx);
            for message in rx {
                match message {
                    Ok(result) => on_done(result),
                    Err(err) => {
                        stop.store(true, Ordering::SeqCst);
                        fatal = Some(err);
                        break;
                    }
                }
            }
        });

        match fatal {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    fn with_retries<T>(
        &self,
        task_id: &str,
        mut attempt: impl FnMut() -> Result<T, TaskError>,
    ) -> Result<T, TaskError> {
        let mut tries: u8 = 1;
        self.observer.event(TaskEvent::TaskStarted {
            task_id: task_id.to_string(),
            attempt: tries,
        });
        loop {
            match attempt() {
                Err(err) if err.is_retryable() && tries <= self.task_retries => {
                    let delay = self.backoff(tries);
                    tries = tries.saturating_add(1);
                    self.observer.event(TaskEvent::TaskRetried {
                        task_id: task_id.to_string(),
                        attempt: tries,
                        error: err.to_string(),
                    });
                    thread::sleep(delay);
                }
                other => return other,
            }
        }
    }

    fn backoff(&self, attempt: u8) -> Duration {
        let exp = u32::from(attempt.saturating_sub(1)).min(16);
        self.retry_base.saturating_mul(1 << exp)
    }

    fn analyze_task(&self, task: &TaskRecord, job: &AnalysisJob<'_>) -> Result<Verdict, TaskError> {
        if !task.is_analyzable() {
            self.observer
                .verbose_log(&format!("task {}: no steps and no question, skipped", task.task_id));
            return Ok(Verdict::Skipped);
        }

        let aux_text = match job.files_dir {
            Some(dir) => {
                let extraction = job.extractor.extract_detailed(&task.task_id, dir);
                if let Some(diagnostic) = &extraction.diagnostic {
                    self.observer.event(TaskEvent::ExtractionDiagnostic {
                        task_id: task.task_id.clone(),
                        diagnostic: diagnostic.clone(),
                    });
                }
                extraction.text
            }
            None => String::new(),
        };

        let mut echo = self.console.task(&task.task_id, AnalysisPhase::Causal.label());
        let mut phase = AnalysisPhase::Causal;
        let outcome = self.with_retries(&task.task_id, || {
            echo.reset();
            phase = AnalysisPhase::Causal;
            job.analyzer.analyze(
                task,
                &aux_text,
                &mut |next: AnalysisPhase, fragment: &str| {
                    if next != phase {
                        echo.section(next.label());
                        phase = next;
                    }
                    echo.fragment(fragment);
                },
            )
        });
        echo.finish();

        let (record, verdict) = match outcome {
            Ok(outcome) => {
                match &outcome.steps {
                    StepsSource::Provided => {}
                    StepsSource::Generated { chars } => {
                        self.observer.event(TaskEvent::PseudoStepsGenerated {
                            task_id: task.task_id.clone(),
                            chars: *chars,
                        })
                    }
                    StepsSource::QuestionFallback { reason } => {
                        self.observer.event(TaskEvent::PseudoStepsFallback {
                            task_id: task.task_id.clone(),
                            reason: reason.clone(),
                        })
                    }
                }
                self.observer.event(TaskEvent::TaskCompleted {
                    task_id: task.task_id.clone(),
                    chars: outcome.causal_analysis.chars().count(),
                });
                (
                    AnalysisResult {
                        task_id: outcome.task_id,
                        causal_analysis: outcome.causal_analysis,
                    },
                    Verdict::Processed,
                )
            }
            Err(err) => {
                self.observer.event(TaskEvent::TaskFailed {
                    task_id: task.task_id.clone(),
                    error: err.to_string(),
                });
                (
                    AnalysisResult::failed(task.task_id.clone(), &err.to_string()),
                    Verdict::Failed,
                )
            }
        };

        job.log
            .append(&record)
            .map_err(|e| TaskError::ResultLog(format!("{e:#}")))?;
        Ok(verdict)
    }

    fn analysis_panicked(
        &self,
        task: &TaskRecord,
        message: &str,
        job: &AnalysisJob<'_>,
    ) -> Result<Verdict, TaskError> {
        let error = format!("worker panicked: {message}");
        self.observer.event(TaskEvent::TaskFailed {
            task_id: task.task_id.clone(),
            error: error.clone(),
        });
        job.log
            .append(&AnalysisResult::failed(task.task_id.clone(), &error))
            .map_err(|e| TaskError::ResultLog(format!("{e:#}")))?;
        Ok(Verdict::Failed)
    }

    fn repair_panicked(
        &self,
        analysis: &AnalysisResult,
        message: &str,
    ) -> (Verdict, Option<RepairResult>) {
        let error = format!("worker panicked: {message}");
        self.observer.event(TaskEvent::TaskFailed {
            task_id: analysis.task_id.clone(),
            error: error.clone(),
        });
        (
            Verdict::Failed,
            Some(RepairResult::failed(analysis.task_id.clone(), &error)),
        )
    }

    fn repair_task(
        &self,
        analysis: &AnalysisResult,
        job: &RepairJob<'_>,
    ) -> (Verdict, Option<RepairResult>) {
        if analysis.is_failure() {
            self.observer.verbose_log(&format!(
                "task {}: analysis failed earlier, not repaired",
                analysis.task_id
            ));
            return (Verdict::Skipped, None);
        }
        let task = match job.tasks.get(&analysis.task_id) {
            Some(task) => task.clone(),
            None => {
                self.observer.warn_log(&format!(
                    "task {}: not found in metadata, repairing without a question",
                    analysis.task_id
                ));
                TaskRecord {
                    task_id: analysis.task_id.clone(),
                    ..TaskRecord::default()
                }
            }
        };

        let outcome = self.with_retries(&task.task_id, || {
            job.generator.repair(&task, &analysis.causal_analysis)
        });
        match outcome {
            Ok(outcome) => {
                if let Some(reason) = &outcome.downgraded {
                    self.observer.event(TaskEvent::RepairDowngraded {
                        task_id: task.task_id.clone(),
                        reason: reason.clone(),
                    });
                }
                let label = match outcome.path {
                    RepairPath::Code => "Code Repair",
                    RepairPath::Text => "Answer",
                };
                let mut echo = self.console.task(&task.task_id, label);
                echo.fragment(&outcome.submitted_answer);
                echo.finish();
                self.observer.event(TaskEvent::TaskCompleted {
                    task_id: task.task_id.clone(),
                    chars: outcome.submitted_answer.chars().count(),
                });
                (
                    Verdict::Processed,
                    Some(RepairResult {
                        task_id: outcome.task_id,
                        submitted_answer: outcome.submitted_answer,
                    }),
                )
            }
            Err(err) => {
                self.observer.event(TaskEvent::TaskFailed {
                    task_id: task.task_id.clone(),
                    error: err.to_string(),
                });
                (
                    Verdict::Failed,
                    Some(RepairResult::failed(task.task_id.clone(), &err.to_string())),
                )
            }
        }
    }
}
