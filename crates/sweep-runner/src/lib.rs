//! Parameterized experiment runner.
//!
//! Experiments are declared as command templates plus argument lists. Each
//! combination of arguments becomes one run; runs are executed through the
//! shell on a bounded worker pool and their stdout is appended to shared
//! output files. Runs whose output already exists are skipped, so an
//! interrupted sweep can simply be started again.
//!
//! ```no_run
//! use sweep_runner::{Experiment, NoopObserver, Session, SessionConfig};
//!
//! let mut session = Session::new(SessionConfig::from_env());
//! session.group("basics");
//! session.declare(
//!     &Experiment::new("sum", "echo $(( [[a]] + [[b]] ))")
//!         .arg_list("a", [1, 2])
//!         .arg_list("b", [1, 2, 3])
//!         .stdout_file("output/[[a]]+[[b]].txt"),
//! );
//! let report = session.run(&NoopObserver);
//! println!("{} runs succeeded", report.succeeded());
//! ```

use anyhow::{Context, Result};
use std::fs;
use std::path::Path;

pub mod assignment;
pub mod blob;
pub mod combos;
pub mod engine;
pub mod experiment;
pub mod lock;
pub mod output;
pub mod plan;
pub mod process;
pub mod registry;
pub mod selection;
pub mod session;

pub use assignment::{render_value, Assignment};
pub use blob::{resolve_opt, substitute, Blob};
pub use combos::{expand, ArgSpec};
pub use engine::{
    dispatch_experiment, execute_run, CancelFlag, EngineOptions, ExperimentReport, NoopObserver,
    RunObserver, RunOutcome, DEFAULT_JOBS,
};
pub use experiment::{Experiment, HeaderSource, OutputTransform, RunDescriptor};
pub use lock::{acquire_path_lock, lock_path_for, PathLock};
pub use plan::{load_plan, parse_plan, Plan};
pub use process::{execute_shell, ExecutionResult};
pub use registry::{
    Declared, ExperimentSummary, GroupSummary, Registry, RunCounts, Summary, DEFAULT_GROUP,
};
pub use selection::{Selection, DRY_RUN_TOKEN};
pub use session::{PlannedCommand, RunReport, Session, SessionConfig};

pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create {}", path.display()))
}
