use anyhow::{Context, Result};
use std::process::{Command, Stdio};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub command: String,
    // `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    pub fn code_label(&self) -> String {
        self.code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string())
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

pub fn execute_shell(command: &str) -> Result<ExecutionResult> {
    let mut cmd = shell_command(command);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    debug!(command, "spawning");
    let output = cmd
        .output()
        .with_context(|| format!("failed to launch shell for command: {}", command))?;
    Ok(ExecutionResult {
        command: command.to_string(),
        code: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Empty set accepts every outcome, including signal termination.
pub fn return_code_allowed(allowed: &[i32], code: Option<i32>) -> bool {
    if allowed.is_empty() {
        return true;
    }
    match code {
        Some(c) => allowed.contains(&c),
        None => false,
    }
}
