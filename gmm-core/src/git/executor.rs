//! External process execution for git subcommands

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;

/// Failure to run an external program to completion
#[derive(Error, Debug)]
pub enum ExecError {
    /// The program could not be started
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program exited unsuccessfully; `output` is for diagnostics only
    #[error("{program} exited with {}", exit_code_label(.code))]
    Exit {
        program: String,
        code: Option<i32>,
        output: String,
    },

    /// The program did not finish within the allotted time and was killed
    #[error("{program} timed out after {}", format_elapsed(.after))]
    TimedOut { program: String, after: Duration },
}

fn format_elapsed(after: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*after)
}

fn exit_code_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit status {}", code),
        None => "no exit status (terminated by signal)".to_string(),
    }
}

/// Runs a program in a working directory and returns its combined output
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// Execute `program` with `args`, in `directory` when given
    ///
    /// Returns stdout and stderr concatenated and trimmed. A non-zero exit is
    /// an error.
    async fn exec(
        &self,
        program: &str,
        directory: Option<&Path>,
        args: &[String],
    ) -> std::result::Result<String, ExecError>;
}

/// Executor backed by OS processes, bounded by a timeout
#[derive(Debug, Clone)]
pub struct ProcessExecutor {
    timeout: Duration,
}

impl ProcessExecutor {
    /// Create an executor that kills commands running longer than `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for ProcessExecutor {
    fn default() -> Self {
        Self::new(Duration::from_secs(600))
    }
}

#[async_trait]
impl CommandExecutor for ProcessExecutor {
    async fn exec(
        &self,
        program: &str,
        directory: Option<&Path>,
        args: &[String],
    ) -> std::result::Result<String, ExecError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = directory {
            cmd.current_dir(dir);
        }

        tracing::debug!(program, ?directory, ?args, "executing");

        // Dropping the output future on timeout kills the child
        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(result) => result.map_err(|source| ExecError::Spawn {
                program: program.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(ExecError::TimedOut {
                    program: program.to_string(),
                    after: self.timeout,
                })
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        let combined = combined.trim().to_string();

        if !output.status.success() {
            return Err(ExecError::Exit {
                program: program.to_string(),
                code: output.status.code(),
                output: combined,
            });
        }

        Ok(combined)
    }
}
