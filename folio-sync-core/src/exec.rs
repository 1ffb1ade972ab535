use std::ffi::{OsStr, OsString};
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, error};

use crate::error::CommandError;

/// Captured output of a successful external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Runs `program` with `args`, killing it if it exceeds `timeout`.
///
/// Non-zero exit codes become [`CommandError::Failed`] carrying the exit code
/// and stderr, so callers can tell "not found" apart from other failures.
pub async fn run<I, S>(program: &str, args: I, timeout: Duration) -> Result<CommandOutput, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<OsString> = args.into_iter().map(|a| a.as_ref().to_owned()).collect();
    debug!(program, ?args, timeout_secs = timeout.as_secs(), "Running external command");

    let child = Command::new(program)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            error!(program, error = ?e, "Failed to launch external command");
            CommandError::Launch {
                program: program.to_string(),
                source: e,
            }
        })?;

    // Dropping the pending future on timeout drops the child, which kills it.
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(CommandError::Launch {
                program: program.to_string(),
                source: e,
            })
        }
        Err(_) => {
            error!(program, timeout_secs = timeout.as_secs(), "External command timed out");
            return Err(CommandError::Timeout {
                program: program.to_string(),
                secs: timeout.as_secs(),
            });
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        debug!(program, code = ?output.status.code(), stderr = %stderr, "External command failed");
        return Err(CommandError::Failed {
            program: program.to_string(),
            code: output.status.code(),
            stderr: stderr.trim().to_string(),
        });
    }

    Ok(CommandOutput { stdout, stderr })
}
