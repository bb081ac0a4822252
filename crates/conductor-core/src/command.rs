//! The `CommandRunner` seam: run a shell command line in a working
//! directory and return its combined output.
//!
//! Git, preflight checks, and criterion verifications all go through this
//! trait so tests can substitute a scripted fake.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// Errors from running a shell command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran but exited non-zero (or was killed by a signal).
    #[error("command {command:?} exited with {}: {output}", exit_detail(.code))]
    Exit {
        command: String,
        /// Exit code, or `None` if terminated by a signal.
        code: Option<i32>,
        /// Combined stdout+stderr, for diagnostics.
        output: String,
    },

    #[error("command {command:?} cancelled")]
    Cancelled { command: String },
}

fn exit_detail(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "signal".to_string(),
    }
}

impl CommandError {
    /// Whether this error is a cancellation (propagated unchanged by
    /// callers rather than classified).
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CommandError::Cancelled { .. })
    }
}

/// Runs a single shell command line (`sh -c <cmd>`) in a fixed working
/// directory, returning combined stdout+stderr.
///
/// Implementations must honour cancellation: a cancelled run kills the
/// child and returns [`CommandError::Cancelled`], never `Ok`.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, cancel: &CancellationToken, command: &str) -> Result<String, CommandError>;

    /// The working directory commands execute in.
    fn working_dir(&self) -> &Path;
}

// Compile-time assertion: CommandRunner must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn CommandRunner) {}
};

/// Default [`CommandRunner`] backed by `sh -c` via `tokio::process`.
#[derive(Debug, Clone)]
pub struct ShellRunner {
    working_dir: PathBuf,
}

impl ShellRunner {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl CommandRunner for ShellRunner {
    async fn run(&self, cancel: &CancellationToken, command: &str) -> Result<String, CommandError> {
        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                command: command.to_string(),
            });
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| CommandError::Spawn {
                command: command.to_string(),
                source: e,
            })?;

        // Read stdout/stderr concurrently with waiting for the process so a
        // chatty child cannot deadlock on a full pipe buffer.
        let mut stdout_pipe = child.stdout.take();
        let mut stderr_pipe = child.stderr.take();

        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            buf
        };
        let read_stderr = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stderr_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            buf
        };

        let wait_all = async { tokio::join!(child.wait(), read_stdout, read_stderr) };

        tokio::select! {
            (wait_result, stdout, stderr) = wait_all => {
                let status = wait_result.map_err(|e| CommandError::Spawn {
                    command: command.to_string(),
                    source: e,
                })?;

                let mut combined = String::from_utf8_lossy(&stdout).into_owned();
                combined.push_str(&String::from_utf8_lossy(&stderr));

                if status.success() {
                    Ok(combined)
                } else {
                    Err(CommandError::Exit {
                        command: command.to_string(),
                        code: status.code(),
                        output: combined,
                    })
                }
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(CommandError::Cancelled {
                    command: command.to_string(),
                })
            }
        }
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}
