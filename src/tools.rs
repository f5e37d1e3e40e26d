//! Bounded runner for optional external tools (smbclient, dig, feroxbuster,
//! sublist3r). Every invocation is wall-clock limited and the child is
//! killed and reaped on expiry or cancellation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{0} is not installed")]
    NotFound(String),
    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
    #[error("{tool} failed to start: {message}")]
    Spawn { tool: String, message: String },
}

/// Captured output of one finished tool run. A non-zero exit is data, not
/// an error; callers decide what counts as success.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    /// Exit code 0 is success. With `tolerate_stdout`, non-empty stdout
    /// despite a non-zero exit also counts; some tools (sublist3r) report
    /// failure exit codes on perfectly good runs.
    pub fn succeeded(&self, tolerate_stdout: bool) -> bool {
        self.status == Some(0) || (tolerate_stdout && !self.stdout.trim().is_empty())
    }
}

/// PATH lookup without running anything.
pub fn tool_available(name: &str) -> bool {
    find_in_path(name).is_some()
}

fn find_in_path(name: &str) -> Option<PathBuf> {
    if name.contains('/') {
        let p = Path::new(name);
        return p.is_file().then(|| p.to_path_buf());
    }
    let paths = std::env::var_os("PATH")?;
    std::env::split_paths(&paths)
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_file())
}

/// Run `program args...`, capturing stdout/stderr, bounded by `bound`.
/// Dropping the returned future (dispatch does this on cancellation) kills
/// the child via `kill_on_drop`.
pub async fn run_tool(
    program: &str,
    args: &[&str],
    bound: Duration,
) -> Result<ToolOutput, ToolError> {
    debug!(tool = program, ?args, "running external tool");

    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ToolError::NotFound(program.to_string())
            } else {
                ToolError::Spawn {
                    tool: program.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

    // Timing out drops the wait future, which kills the child.
    let output = match timeout(bound, child.wait_with_output()).await {
        Err(_) => {
            return Err(ToolError::Timeout {
                tool: program.to_string(),
                after: bound,
            })
        }
        Ok(Err(e)) => {
            return Err(ToolError::Spawn {
                tool: program.to_string(),
                message: e.to_string(),
            })
        }
        Ok(Ok(output)) => output,
    };

    Ok(ToolOutput {
        status: output.status.code(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rules() {
        let clean = ToolOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(clean.succeeded(false));

        let noisy_exit = ToolOutput {
            status: Some(1),
            stdout: "sub.example.com\n".into(),
            stderr: String::new(),
        };
        assert!(!noisy_exit.succeeded(false));
        assert!(noisy_exit.succeeded(true));

        let empty_failure = ToolOutput {
            status: Some(1),
            stdout: "   \n".into(),
            stderr: "boom".into(),
        };
        assert!(!empty_failure.succeeded(true));
    }

    #[test]
    fn path_lookup_finds_sh() {
        // /bin/sh exists on any platform these tests run on
        assert!(tool_available("sh"));
        assert!(!tool_available("definitely-not-a-real-tool-name"));
    }
}
