//! Two declare/run cycles driven from code.
//!
//! cargo run -p sweep-runner --example basics -- blobs calculations copies

use anyhow::Result;
use serde_json::{json, Value};
use sweep_runner::{
    Assignment, Blob, Experiment, NoopObserver, OutputTransform, Session, SessionConfig,
};
use tracing_subscriber::EnvFilter;

fn op_name(args: &Assignment) -> Value {
    let name = match args.text("operator").as_deref() {
        Some("+") => "sum",
        Some("-") => "diff",
        Some("*") => "prod",
        Some("/") => "quot",
        _ => "unknown",
    };
    json!(name)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("warn"))
        .with_writer(std::io::stderr)
        .init();
    let mut session = Session::new(SessionConfig::from_env());

    session.group("blobs");
    let triples: Vec<Value> = (0..5)
        .flat_map(|a| (0..5).flat_map(move |b| (0..5).map(move |c| (a, b, c))))
        .filter(|(a, b, c)| a + b + c == 4)
        .map(|(a, b, c)| json!({"a": a, "b": b, "c": c}))
        .collect();
    let field = |name: &'static str| {
        Blob::derived(move |args| {
            args.get("triple")
                .and_then(|t| t.get(name))
                .cloned()
                .unwrap_or_default()
        })
    };
    session.declare(
        &Experiment::new(
            "sum_of_squares",
            "echo $(( [[a]] * [[a]] + [[b]] * [[b]] + [[c]] * [[c]] ))",
        )
        .arg("a", field("a"))
        .arg("b", field("b"))
        .arg("c", field("c"))
        .arg_list("triple", triples)
        .stdout_file("output/sum_of_squares_[[a]]_[[b]]_[[c]].txt"),
    );
    session.declare(
        &Experiment::new(
            "better_sum_of_squares",
            "echo $(( [[a]] * [[a]] + [[b]] * [[b]] + [[c]] * [[c]] ))",
        )
        .arg_list("a", 0..5)
        .arg_list("b", 0..5)
        .arg_list("c", 0..5)
        .stdout_file("output/sum_of_squares_[[a]]_[[b]]_[[c]]_good.txt")
        .filter(|args| {
            let n = |k: &str| args.get(k).and_then(Value::as_i64).unwrap_or(0);
            n("a") + n("b") + n("c") == 4
        }),
    );

    session.group("calculations");
    session.declare(
        &Experiment::new("calculate_[[op_name]]", "echo $(( [[a]] [[operator]] [[b]] ))")
            .arg_list("a", [1, 2])
            .arg_list("b", [3, 4])
            .arg_list("operator", ["+", "-", "*", "/"])
            .arg("op_name", Blob::derived(op_name))
            .stdout_file("output/result_[[op_name]].txt")
            .stdout_res("[[a]] [[operator]] [[b]] = [[stdout]]"),
    );

    session.group("error_handling");
    session.declare(
        &Experiment::new("timeouts", "timeout 2 sleep [[time]] && echo waking up")
            .arg_list("time", [0, 1, 2, 3, 4])
            .stdout_file("output/timeouts.txt")
            .allowed_return_codes([0, 124])
            .stdout_transform(OutputTransform::result(|_, res| {
                if res.code == Some(0) {
                    Blob::from("sleeping [[time]]s -> [[stdout]]")
                } else {
                    Blob::from("sleeping [[time]]s -> timeout")
                }
            })),
    );

    let first = session.run(&NoopObserver);
    println!(
        "first cycle: {} of {} runs succeeded",
        first.succeeded(),
        first.gathered
    );

    // second cycle sees whatever the first one produced
    let files: Vec<String> = glob::glob("output/*.txt")?
        .filter_map(|entry| entry.ok())
        .map(|path| path.display().to_string())
        .collect();
    session.group("copies");
    session.declare(
        &Experiment::new("copy_files", "cp [[file]] [[copy]]")
            .arg_list("file", files)
            .arg("copy", "[[file]].copy")
            .creates_file("[[copy]]"),
    );
    let second = session.run(&NoopObserver);
    println!(
        "second cycle: {} of {} runs succeeded",
        second.succeeded(),
        second.gathered
    );
    Ok(())
}
