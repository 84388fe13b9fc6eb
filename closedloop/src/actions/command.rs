//! Shell commands run in the workspace root.

use std::time::Duration;

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::io::process::{CaptureLimits, run_bounded, shell_command};
use crate::io::workspace::Workspace;

/// Output of one command action.
#[derive(Debug, Clone, PartialEq)]
pub(super) struct CommandRun {
    pub output: Value,
    /// Set when the command is empty, exits non-zero, or times out.
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct CommandLimits {
    pub timeout: Duration,
    pub stdout_chars: usize,
    pub stderr_chars: usize,
}

#[instrument(skip_all, fields(command = %command))]
pub(super) fn run_command<W: Workspace>(
    workspace: &W,
    command: &str,
    limits: CommandLimits,
) -> Result<CommandRun> {
    if command.is_empty() {
        return Ok(CommandRun {
            output: json!({ "command": "", "exit_code": 1, "stderr": "empty command" }),
            failure: Some("empty command".to_string()),
        });
    }

    info!(timeout_secs = limits.timeout.as_secs(), "running command");
    let result = run_bounded(
        shell_command(command, workspace.root()),
        None,
        limits.timeout,
        CaptureLimits::chars(limits.stdout_chars, limits.stderr_chars),
    )?;

    let exit_code = result.exit_code();
    let output = json!({
        "command": command,
        "exit_code": exit_code,
        "timed_out": result.timed_out,
        "stdout": result.stdout,
        "stderr": result.stderr,
    });
    let failure = if result.timed_out {
        warn!(timeout_secs = limits.timeout.as_secs(), "command timed out");
        Some(format!(
            "command timed out after {}s",
            limits.timeout.as_secs()
        ))
    } else if !result.succeeded() {
        Some(format!("command exited with code {exit_code}"))
    } else {
        None
    };
    Ok(CommandRun { output, failure })
}
