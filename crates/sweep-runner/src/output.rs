use crate::ensure_dir;
use crate::experiment::{HeaderSource, RunDescriptor};
use crate::lock::acquire_path_lock;
use crate::process::{execute_shell, ExecutionResult};
use anyhow::{Context, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub fn render_output_line(run: &RunDescriptor, result: &ExecutionResult) -> String {
    let stdout = result.stdout.trim();
    let output = run.stdout_transform.apply(stdout, result, &run.args);
    match &run.stdout_res {
        Some(template) => template.resolve(&run.args.with("stdout", output)),
        None => output,
    }
}

/// Appends the run's line to its `stdout_file`, writing the header first
/// when this call creates the file. Returns the file written, if any.
pub fn record_output(
    run: &RunDescriptor,
    result: &ExecutionResult,
    lock_timeout: Option<Duration>,
) -> Result<Option<PathBuf>> {
    let Some(path) = run.stdout_file.as_deref() else {
        return Ok(None);
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            ensure_dir(parent)?;
        }
    }
    let line = render_output_line(run, result);

    let _lock = acquire_path_lock(path, lock_timeout)?;
    let header = if path.exists() {
        None
    } else {
        run.header
            .as_ref()
            .map(|source| materialize_header(run, source))
            .transpose()?
    };
    append_lines(path, header.as_deref(), &line)?;
    Ok(Some(path.to_path_buf()))
}

fn materialize_header(run: &RunDescriptor, source: &HeaderSource) -> Result<String> {
    let raw = match source {
        HeaderSource::Literal(text) => text.clone(),
        HeaderSource::Command(command) => {
            let res = execute_shell(command)
                .with_context(|| format!("header command failed for {}", run.name))?;
            if !res.success() {
                debug!(
                    command = %command,
                    code = %res.code_label(),
                    "header command exited non-zero"
                );
            }
            res.stdout.trim().to_string()
        }
    };
    Ok(run.header_text(&raw))
}

fn append_lines(path: &Path, header: Option<&str>, line: &str) -> Result<()> {
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let mut buf = String::new();
    if let Some(header) = header {
        buf.push_str(header);
        buf.push('\n');
    }
    buf.push_str(line);
    buf.push('\n');
    file.write_all(buf.as_bytes())
        .with_context(|| format!("failed to append to {}", path.display()))?;
    file.flush()?;
    Ok(())
}
