use crate::engine::{
    dispatch_experiment, CancelFlag, EngineOptions, ExperimentReport, RunObserver, DEFAULT_JOBS,
};
use crate::experiment::Experiment;
use crate::registry::{Declared, Registry, Summary};
use crate::selection::Selection;
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub jobs: usize,
    pub selection: Selection,
    // `None` waits for output locks indefinitely.
    pub lock_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            jobs: DEFAULT_JOBS,
            selection: Selection::default(),
            lock_timeout: None,
        }
    }
}

impl SessionConfig {
    pub fn from_env() -> Self {
        Self {
            selection: Selection::from_env(),
            ..Self::default()
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub name: String,
    pub command: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub dry_run: bool,
    pub any_selected: bool,
    pub gathered: usize,
    pub experiments: Vec<ExperimentReport>,
    pub planned: Vec<PlannedCommand>,
    pub gather_time: Duration,
    pub run_time: Duration,
}

impl RunReport {
    pub fn succeeded(&self) -> usize {
        self.experiments.iter().map(|e| e.succeeded).sum()
    }

    pub fn failed(&self) -> usize {
        self.experiments.iter().map(|e| e.failed).sum()
    }

    pub fn aborted(&self) -> bool {
        self.experiments.iter().any(|e| e.aborted)
    }
}

#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    registry: Registry,
    cancel: CancelFlag,
    cycle_started: Instant,
}

impl Session {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            registry: Registry::new(),
            cancel: CancelFlag::new(),
            cycle_started: Instant::now(),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn selection(&self) -> &Selection {
        &self.config.selection
    }

    pub fn use_jobs(&mut self, jobs: usize) {
        self.config.jobs = jobs.max(1);
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn group(&mut self, label: &str) {
        self.registry.set_group(label);
    }

    pub fn declare(&mut self, experiment: &Experiment) -> Declared {
        self.registry.declare(experiment, &self.config.selection)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn summary(&self) -> Summary {
        self.registry.summary(&self.config.selection)
    }

    /// Executes (or, with `dry_run`, prints) every queued run, one experiment
    /// at a time, then resets all bookkeeping for the next cycle.
    pub fn run(&mut self, observer: &dyn RunObserver) -> RunReport {
        let gather_time = self.cycle_started.elapsed();
        let gathered = self.registry.total_runs();
        let any_selected = self.registry.any_selected(&self.config.selection);
        let dry_run = self.config.selection.is_dry_run();
        let queued = self.registry.drain();

        let started = Instant::now();
        let mut report = RunReport {
            dry_run,
            any_selected,
            gathered,
            gather_time,
            ..RunReport::default()
        };

        if dry_run {
            for (name, runs) in queued.into_iter().filter(|(_, runs)| !runs.is_empty()) {
                for run in runs {
                    observer.dry_run_command(&name, &run.command);
                    report.planned.push(PlannedCommand {
                        name: name.clone(),
                        command: run.command,
                    });
                }
            }
        } else {
            let opts = EngineOptions {
                jobs: self.config.jobs,
                lock_timeout: self.config.lock_timeout,
            };
            // interrupts raised between cycles are dropped
            self.cancel.clear();
            for (name, runs) in queued.into_iter().filter(|(_, runs)| !runs.is_empty()) {
                report
                    .experiments
                    .push(dispatch_experiment(&name, runs, opts, &self.cancel, observer));
            }
            if !any_selected {
                warn!("Did not try to run experiments as none were passed via the command line.");
            }
        }

        report.run_time = started.elapsed();
        info!(
            gathered,
            succeeded = report.succeeded(),
            failed = report.failed(),
            dry_run,
            "cycle finished"
        );
        self.cycle_started = Instant::now();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::NoopObserver;

    fn session(tokens: &[&str]) -> Session {
        Session::new(SessionConfig::default().with_selection(Selection::new(tokens.iter().copied())))
    }

    #[test]
    fn dry_run_plans_commands_without_executing() {
        let mut s = session(&["sum", "dry_run"]);
        s.declare(
            &Experiment::new("sum", "echo $(( [[a]] + [[b]] )) > /nonexistent/dir/x")
                .arg_list("a", [1, 2])
                .arg("b", 5),
        );
        let report = s.run(&NoopObserver);
        assert!(report.dry_run);
        assert!(report.experiments.is_empty());
        assert_eq!(
            report.planned,
            vec![
                PlannedCommand {
                    name: "sum".to_string(),
                    command: "echo $(( 1 + 5 )) > /nonexistent/dir/x".to_string()
                },
                PlannedCommand {
                    name: "sum".to_string(),
                    command: "echo $(( 2 + 5 )) > /nonexistent/dir/x".to_string()
                },
            ]
        );
    }

    #[test]
    fn run_resets_state_for_the_next_cycle() {
        let mut s = session(&["first", "dry_run"]);
        s.group("g");
        s.declare(&Experiment::new("first", "true"));
        let first = s.run(&NoopObserver);
        assert_eq!(first.gathered, 1);
        assert!(s.registry().is_empty());
        assert!(s.summary().groups.is_empty());

        s.declare(&Experiment::new("second", "true"));
        assert_eq!(s.registry().current_group(), "ungrouped");
        let second = s.run(&NoopObserver);
        assert_eq!(second.gathered, 1);
        assert!(second.planned.is_empty());
        assert!(!second.any_selected);
    }

    #[test]
    fn use_jobs_has_a_floor_of_one() {
        let mut s = session(&[]);
        assert_eq!(s.config().jobs, DEFAULT_JOBS);
        s.use_jobs(0);
        assert_eq!(s.config().jobs, 1);
    }

    #[test]
    fn unselected_cycle_runs_nothing() {
        let mut s = session(&["other"]);
        s.declare(&Experiment::new("sum", "exit 1"));
        let report = s.run(&NoopObserver);
        assert!(!report.any_selected);
        assert!(report.experiments.is_empty());
    }
}
