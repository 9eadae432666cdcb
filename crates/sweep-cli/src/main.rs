use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{json, Value};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use sweep_runner::{
    load_plan, CancelFlag, Declared, ExperimentReport, RunDescriptor, RunObserver, RunOutcome,
    RunReport, Selection, Session, SessionConfig, Summary, DEFAULT_JOBS,
};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sweep", version = "0.3.0", about = "Parameterized experiment runner")]
struct Cli {
    /// More log output (-v info, -vv debug); RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute the selected experiments of a plan.
    Run {
        plan: PathBuf,
        /// Experiment names, group names or glob patterns; `dry_run` prints
        /// the commands instead of executing them.
        tokens: Vec<String>,
        #[arg(long)]
        jobs: Option<usize>,
        /// Give up on a contended output file after this many seconds.
        #[arg(long)]
        lock_timeout: Option<u64>,
        #[arg(long)]
        no_progress: bool,
        #[arg(long)]
        json: bool,
    },
    /// Print the run table of a plan without executing anything.
    Describe {
        plan: PathBuf,
        tokens: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    /// Write a starter plan.
    Init {
        #[arg(long, default_value = "sweep.yaml")]
        path: PathBuf,
        #[arg(long)]
        force: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json_mode = command_json_mode(&cli.command);
    let result = run_command(cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", format!("{:#}", err), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::new(match verbose {
            0 => "warn",
            1 => "info",
            _ => "debug",
        }),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run {
            plan,
            tokens,
            jobs,
            lock_timeout,
            no_progress,
            json,
        } => {
            let loaded = load_plan(&plan)?;
            let mut config = SessionConfig::default().with_selection(Selection::new(tokens));
            config.lock_timeout = lock_timeout.map(Duration::from_secs);
            let mut session = Session::new(config);
            session.use_jobs(jobs.or(loaded.jobs()).unwrap_or(DEFAULT_JOBS));
            spawn_interrupt_handler(session.cancel_flag());

            let declared = loaded.declare_into(&mut session)?;
            let summary = session.summary();
            let dry_run = session.selection().is_dry_run();
            if !json {
                print_summary(&summary);
            }

            let report = if dry_run {
                session.run(&DryRunPrinter::new(!json))
            } else {
                if !json {
                    print_section("\nrunning the experiments:");
                }
                session.run(&ProgressObserver::new(!json && !no_progress))
            };

            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "plan": plan.display().to_string(),
                    "summary": summary_to_json(&summary),
                    "declared": declared.iter().map(declared_to_json).collect::<Vec<_>>(),
                    "report": report_to_json(&report),
                })));
            }
            if !dry_run {
                print_timing(&report);
            }
        }
        Commands::Describe { plan, tokens, json } => {
            let loaded = load_plan(&plan)?;
            let mut session =
                Session::new(SessionConfig::default().with_selection(Selection::new(tokens)));
            let declared = loaded.declare_into(&mut session)?;
            let summary = session.summary();
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "plan": plan.display().to_string(),
                    "jobs": loaded.jobs().unwrap_or(DEFAULT_JOBS),
                    "summary": summary_to_json(&summary),
                    "declared": declared.iter().map(declared_to_json).collect::<Vec<_>>(),
                })));
            }
            println!("plan: {}", plan.display());
            println!("experiments: {}", loaded.experiment_count());
            println!("jobs: {}", loaded.jobs().unwrap_or(DEFAULT_JOBS));
            print_summary(&summary);
            for value in declared.iter().flat_map(|d| d.return_strings.iter()) {
                println!("{}", value);
            }
        }
        Commands::Init { path, force } => {
            if !force && path.exists() {
                return Err(anyhow::anyhow!(format!(
                    "init file already exists (use --force): {}",
                    path.display()
                )));
            }
            write_starter_plan(&path)?;
            println!("wrote: {}", path.display());
            println!("next: sweep describe {}", path.display());
            println!("next: sweep run {} basics", path.display());
        }
    }
    Ok(None)
}

// a second Ctrl-C while the flag is still up exits immediately
fn spawn_interrupt_handler(cancel: CancelFlag) {
    let spawned = std::thread::Builder::new()
        .name("sweep-interrupt".to_string())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(err) => {
                    warn!("interrupt handling unavailable: {}", err);
                    return;
                }
            };
            runtime.block_on(async move {
                while tokio::signal::ctrl_c().await.is_ok() {
                    if cancel.is_cancelled() {
                        std::process::exit(130);
                    }
                    warn!("interrupted, waiting for running commands to finish");
                    cancel.cancel();
                }
            });
        });
    if let Err(err) = spawned {
        warn!("interrupt handling unavailable: {}", err);
    }
}

struct ProgressObserver {
    enabled: bool,
    bar: Mutex<Option<ProgressBar>>,
}

impl ProgressObserver {
    fn new(enabled: bool) -> Self {
        Self {
            enabled,
            bar: Mutex::new(None),
        }
    }
}

impl RunObserver for ProgressObserver {
    fn experiment_started(&self, name: &str, total: usize) {
        if !self.enabled {
            return;
        }
        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{prefix:.bold} [{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░  "),
        );
        bar.set_prefix(name.to_string());
        *self.bar.lock().unwrap_or_else(PoisonError::into_inner) = Some(bar);
    }

    fn run_finished(&self, _run: &RunDescriptor, outcome: &RunOutcome) {
        let guard = self.bar.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(bar) = guard.as_ref() {
            if let RunOutcome::RejectedCode { code } = outcome {
                bar.set_message(format!(
                    "last rejected code: {}",
                    code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
                ));
            }
            bar.inc(1);
        }
    }

    fn experiment_finished(&self, report: &ExperimentReport) {
        let taken = self
            .bar
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(bar) = taken {
            if report.aborted {
                bar.abandon_with_message(format!("aborted, {} not started", report.not_started()));
            } else if report.failed > 0 {
                bar.finish_with_message(format!("{} failed", report.failed));
            } else {
                bar.finish_with_message("done");
            }
        }
    }
}

struct DryRunPrinter {
    enabled: bool,
    current: Mutex<Option<String>>,
}

impl DryRunPrinter {
    fn new(enabled: bool) -> Self {
        if enabled {
            print_section("\ndry run: just printing, no doing");
        }
        Self {
            enabled,
            current: Mutex::new(None),
        }
    }
}

impl RunObserver for DryRunPrinter {
    fn dry_run_command(&self, name: &str, command: &str) {
        if !self.enabled {
            return;
        }
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() != Some(name) {
            print_section(&format!("\ncommands for experiment {}", name));
            *current = Some(name.to_string());
        }
        println!("{}", command);
    }
}

fn use_color() -> bool {
    std::io::stdout().is_terminal()
}

fn print_section(title: &str) {
    if use_color() {
        println!("\u{1b}[1m{}\u{1b}[0m", title);
    } else {
        println!("{}", title);
    }
}

fn paint_selected(text: &str, selected: bool) -> String {
    if !use_color() {
        return text.to_string();
    }
    let color = if selected { "32;1" } else { "91;2" };
    format!("\u{1b}[{}m{}\u{1b}[0m", color, text)
}

fn summary_lines(summary: &Summary) -> Vec<(String, bool)> {
    let width = summary.max_name_len() + 5;
    let mut lines = vec![(
        format!("{:<width$}{:>10}{:>10}{:>10}", "", "todo", "skipped", "total"),
        true,
    )];
    for group in &summary.groups {
        lines.push((group.name.clone(), group.selected));
        let last = group.experiments.len().saturating_sub(1);
        for (idx, exp) in group.experiments.iter().enumerate() {
            let prefix = if idx == last { " └─ " } else { " ├─ " };
            let label = format!("{}{}", prefix, exp.name);
            // tree glyphs are multi-byte; pad by characters
            let pad = width.saturating_sub(label.chars().count());
            lines.push((
                format!(
                    "{}{}{:>10}{:>10}{:>10}",
                    label,
                    " ".repeat(pad),
                    exp.todo,
                    exp.skipped,
                    exp.total
                ),
                exp.selected,
            ));
        }
    }
    lines
}

fn print_summary(summary: &Summary) {
    let mut lines = summary_lines(summary).into_iter();
    if let Some((header, _)) = lines.next() {
        print_section(&header);
    }
    for (line, selected) in lines {
        println!("{}", paint_selected(&line, selected));
    }
}

fn print_timing(report: &RunReport) {
    println!();
    println!(
        "time for gathering {} runs: {:.2} seconds",
        report.gathered,
        report.gather_time.as_secs_f64()
    );
    println!(
        "time for running the experiments: {:.2} seconds",
        report.run_time.as_secs_f64()
    );
    println!();
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. } | Commands::Describe { json, .. } => *json,
        Commands::Init { .. } => false,
    }
}

fn summary_to_json(summary: &Summary) -> Value {
    json!({
        "total_runs": summary.total_runs(),
        "groups": summary.groups.iter().map(|g| json!({
            "name": g.name,
            "selected": g.selected,
            "experiments": g.experiments.iter().map(|e| json!({
                "name": e.name,
                "todo": e.todo,
                "skipped": e.skipped,
                "total": e.total,
                "selected": e.selected,
            })).collect::<Vec<_>>(),
        })).collect::<Vec<_>>(),
    })
}

fn declared_to_json(declared: &Declared) -> Value {
    json!({
        "names": declared.names,
        "runs": declared.runs,
        "skipped": declared.skipped,
        "queued": declared.queued,
        "warnings": declared.warnings,
        "return_strings": declared.return_strings,
    })
}

fn report_to_json(report: &RunReport) -> Value {
    json!({
        "dry_run": report.dry_run,
        "any_selected": report.any_selected,
        "gathered": report.gathered,
        "succeeded": report.succeeded(),
        "failed": report.failed(),
        "aborted": report.aborted(),
        "gather_seconds": report.gather_time.as_secs_f64(),
        "run_seconds": report.run_time.as_secs_f64(),
        "experiments": report.experiments.iter().map(|e| json!({
            "name": e.name,
            "total": e.total,
            "succeeded": e.succeeded,
            "failed": e.failed,
            "aborted": e.aborted,
            "not_started": e.not_started(),
        })).collect::<Vec<_>>(),
        "planned": report.planned.iter().map(|p| json!({
            "name": p.name,
            "command": p.command,
        })).collect::<Vec<_>>(),
    })
}

const STARTER_PLAN: &str = "\
# Runs are skipped when their stdout_file (or creates_file) already exists.
# Select experiments by name, group or glob: sweep run sweep.yaml basics
jobs: 4
groups:
  - name: basics
    experiments:
      - name: sum
        command: \"echo $(( [[a]] + [[b]] ))\"
        args:
          a: [1, 2]
          b: [1, 2, 3]
        stdout_file: output/sum_[[a]]_[[b]].txt
      - name: sums_table
        command: \"echo $(( [[a]] + [[b]] ))\"
        args:
          a: [1, 2]
          b: [1, 2, 3]
        stdout_file: output/sums.csv
        header_string: a,b,sum
        stdout_res: \"[[a]],[[b]],[[stdout]]\"
  - name: error_handling
    experiments:
      - name: timeouts
        command: \"timeout 2 sleep [[time]] && echo waking up\"
        args:
          time: [0, 1, 2, 3]
        stdout_file: output/timeouts.txt
        stdout_res: \"sleeping [[time]]s -> [[stdout]]\"
        allowed_return_codes: [0, 124]
";

fn write_starter_plan(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            sweep_runner::ensure_dir(parent)?;
        }
    }
    std::fs::write(path, STARTER_PLAN)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sweep_runner::{parse_plan, ExperimentSummary, GroupSummary};

    #[test]
    fn starter_plan_parses() {
        let file = parse_plan(STARTER_PLAN).expect("starter plan");
        assert_eq!(file.jobs, Some(4));
        assert_eq!(file.groups.len(), 2);
        assert_eq!(file.groups[1].experiments[0].allowed_return_codes, vec![0, 124]);
    }

    #[test]
    fn summary_table_uses_tree_prefixes() {
        let summary = Summary {
            groups: vec![GroupSummary {
                name: "basics".to_string(),
                selected: true,
                experiments: vec![
                    ExperimentSummary {
                        name: "sum".to_string(),
                        todo: 4,
                        skipped: 2,
                        total: 6,
                        selected: true,
                    },
                    ExperimentSummary {
                        name: "prod".to_string(),
                        todo: 1,
                        skipped: 0,
                        total: 1,
                        selected: true,
                    },
                ],
            }],
        };
        let lines = summary_lines(&summary);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].0.ends_with("      todo   skipped     total"));
        assert_eq!(lines[1].0, "basics");
        assert!(lines[2].0.starts_with(" ├─ sum"));
        assert!(lines[2].0.ends_with("         4         2         6"));
        assert!(lines[3].0.starts_with(" └─ prod"));
        assert_eq!(
            lines[2].0.chars().count(),
            lines[3].0.chars().count(),
            "rows are aligned"
        );
    }

    #[test]
    fn json_mode_follows_flag() {
        let cli = Cli::try_parse_from(["sweep", "run", "plan.yaml", "sum", "--json"])
            .expect("parse");
        assert!(command_json_mode(&cli.command));
        match cli.command {
            Commands::Run { tokens, .. } => assert_eq!(tokens, vec!["sum"]),
            _ => panic!("expected run"),
        }
        let cli = Cli::try_parse_from(["sweep", "init"]).expect("parse");
        assert!(!command_json_mode(&cli.command));
    }

    #[test]
    fn error_payload_shape() {
        let payload = json_error("command_failed", "boom".to_string(), json!({}));
        assert_eq!(payload["ok"], json!(false));
        assert_eq!(payload["error"]["code"], json!("command_failed"));
    }
}
