use crate::experiment::RunDescriptor;
use crate::output::record_output;
use crate::process::{execute_shell, return_code_allowed};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_JOBS: usize = 4;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn clear(&self) -> bool {
        self.0.swap(false, Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { output: Option<PathBuf> },
    RejectedCode { code: Option<i32> },
    Failed { error: String },
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed { .. })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExperimentReport {
    pub name: String,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: bool,
}

impl ExperimentReport {
    pub fn not_started(&self) -> usize {
        self.total - self.succeeded - self.failed
    }
}

/// Progress events; every method defaults to doing nothing.
pub trait RunObserver: Sync {
    fn experiment_started(&self, _name: &str, _total: usize) {}
    fn run_finished(&self, _run: &RunDescriptor, _outcome: &RunOutcome) {}
    fn experiment_finished(&self, _report: &ExperimentReport) {}
    fn dry_run_command(&self, _name: &str, _command: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl RunObserver for NoopObserver {}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub jobs: usize,
    pub lock_timeout: Option<Duration>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            lock_timeout: None,
        }
    }
}

pub fn execute_run(run: &RunDescriptor, lock_timeout: Option<Duration>) -> RunOutcome {
    let result = match execute_shell(&run.command) {
        Ok(result) => result,
        Err(err) => {
            warn!("{:#}", err);
            return RunOutcome::Failed {
                error: format!("{:#}", err),
            };
        }
    };

    if !return_code_allowed(&run.allowed_return_codes, result.code) {
        warn!(
            "unexpected return code ({}) for command: {}\n\t{}",
            result.code_label(),
            run.command,
            result.stderr.trim().replace('\n', "\n\t")
        );
        return RunOutcome::RejectedCode { code: result.code };
    }

    match record_output(run, &result, lock_timeout) {
        Ok(output) => RunOutcome::Completed { output },
        Err(err) => {
            warn!("failed to record output of command: {}\n\t{:#}", run.command, err);
            RunOutcome::Failed {
                error: format!("{:#}", err),
            }
        }
    }
}

pub fn dispatch_experiment(
    name: &str,
    runs: Vec<RunDescriptor>,
    opts: EngineOptions,
    cancel: &CancelFlag,
    observer: &dyn RunObserver,
) -> ExperimentReport {
    let total = runs.len();
    let workers = opts.jobs.max(1).min(total.max(1));
    info!(experiment = name, runs = total, workers, "dispatching");
    observer.experiment_started(name, total);

    let queue = Mutex::new(runs.into_iter());
    let succeeded = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    thread::scope(|scope| {
        for worker in 0..workers {
            let queue = &queue;
            let succeeded = &succeeded;
            let failed = &failed;
            scope.spawn(move || loop {
                if cancel.is_cancelled() {
                    debug!(worker, "stopping after cancel");
                    break;
                }
                let next = queue.lock().unwrap_or_else(PoisonError::into_inner).next();
                let Some(run) = next else {
                    break;
                };
                let outcome = execute_run(&run, opts.lock_timeout);
                if outcome.is_success() {
                    succeeded.fetch_add(1, Ordering::SeqCst);
                } else {
                    failed.fetch_add(1, Ordering::SeqCst);
                }
                observer.run_finished(&run, &outcome);
            });
        }
    });

    let aborted = cancel.clear();
    if aborted {
        warn!("aborted during experiment {}", name);
    }
    let report = ExperimentReport {
        name: name.to_string(),
        total,
        succeeded: succeeded.into_inner(),
        failed: failed.into_inner(),
        aborted,
    };
    info!(
        experiment = name,
        succeeded = report.succeeded,
        failed = report.failed,
        aborted,
        "experiment finished"
    );
    observer.experiment_finished(&report);
    report
}
