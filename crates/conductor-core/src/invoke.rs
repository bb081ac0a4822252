//! Agent invocation seams.
//!
//! [`AgentInvoker`] runs the implementing agent for a task;
//! [`QcAgent`] answers a review prompt. [`ProcessInvoker`] is the
//! subprocess reference adapter: it launches a configured agent command,
//! writes the prompt to stdin, and captures combined output.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::model::Task;

/// Outcome of one agent invocation.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub output: String,
    pub exit_code: i32,
    pub duration: Duration,
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("failed to spawn agent {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("agent exited with {}: {output}", exit_detail(.code))]
    AgentFailed { code: Option<i32>, output: String },

    #[error("agent invocation cancelled")]
    Cancelled,
}

fn exit_detail(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "signal".to_string(),
    }
}

impl InvokeError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvokeError::Cancelled)
    }

    /// The raw output attached to the error, for classification.
    pub fn output(&self) -> &str {
        match self {
            InvokeError::AgentFailed { output, .. } => output,
            _ => "",
        }
    }
}

/// Spawns the implementing agent for a task.
///
/// Timeouts are the caller's concern: wrap the cancellation token.
#[async_trait]
pub trait AgentInvoker: Send + Sync {
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> Result<InvocationResult, InvokeError>;
}

/// Answers a QC review prompt with raw text (expected to contain the JSON
/// response object).
#[async_trait]
pub trait QcAgent: Send + Sync {
    /// Agent name used for feedback attribution.
    fn name(&self) -> &str;

    async fn review(&self, cancel: &CancellationToken, prompt: &str) -> anyhow::Result<String>;
}

// Compile-time assertions: both seams must be object-safe.
const _: () = {
    fn _assert_invoker(_: &dyn AgentInvoker) {}
    fn _assert_qc_agent(_: &dyn QcAgent) {}
};

/// Subprocess-based [`AgentInvoker`].
///
/// Runs `sh -c <command>` in the working directory with the task prompt on
/// stdin and `CONDUCTOR_TASK_NUMBER` / `CONDUCTOR_AGENT` in the
/// environment. Cancellation kills the child.
#[derive(Debug, Clone)]
pub struct ProcessInvoker {
    command: String,
    working_dir: PathBuf,
}

impl ProcessInvoker {
    pub fn new(command: impl Into<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl AgentInvoker for ProcessInvoker {
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> Result<InvocationResult, InvokeError> {
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }

        let start = Instant::now();
        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .env("CONDUCTOR_TASK_NUMBER", &task.number)
            .env("CONDUCTOR_AGENT", &task.agent)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InvokeError::Spawn {
                command: self.command.clone(),
                source: e,
            })?;

        // Hand the prompt over on stdin, then close it so the agent starts.
        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(task.prompt.as_bytes()).await {
                tracing::warn!(task = %task.number, error = %e, "failed to write prompt to agent stdin");
            }
            drop(stdin);
        }

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
                let status = wait_result.map_err(|e| InvokeError::Spawn {
                    command: self.command.clone(),
                    source: e,
                })?;

                let mut output = String::from_utf8_lossy(&stdout).into_owned();
                output.push_str(&String::from_utf8_lossy(&stderr));

                if status.success() {
                    Ok(InvocationResult {
                        output,
                        exit_code: 0,
                        duration: start.elapsed(),
                    })
                } else {
                    Err(InvokeError::AgentFailed {
                        code: status.code(),
                        output,
                    })
                }
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                Err(InvokeError::Cancelled)
            }
        }
    }
}

/// Subprocess-based [`QcAgent`]: runs a review command with the prompt on
/// stdin and returns its stdout+stderr as the raw reply.
#[derive(Debug, Clone)]
pub struct ProcessQcAgent {
    name: String,
    command: String,
    working_dir: PathBuf,
}

impl ProcessQcAgent {
    pub fn new(
        name: impl Into<String>,
        command: impl Into<String>,
        working_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            working_dir: working_dir.into(),
        }
    }
}

#[async_trait]
impl QcAgent for ProcessQcAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, cancel: &CancellationToken, prompt: &str) -> anyhow::Result<String> {
        if cancel.is_cancelled() {
            anyhow::bail!("QC agent {} cancelled", self.name);
        }

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&self.command)
            .current_dir(&self.working_dir)
            .env("CONDUCTOR_QC_AGENT", &self.name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to spawn QC agent {:?}: {e}", self.command))?;

        if let Some(mut stdin) = child.stdin.take() {
            if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                tracing::warn!(agent = %self.name, error = %e, "failed to write review prompt to stdin");
            }
            drop(stdin);
        }

        let mut stdout_pipe = child.stdout.take();
        let read_stdout = async {
            let mut buf = Vec::new();
            if let Some(ref mut pipe) = stdout_pipe {
                pipe.read_to_end(&mut buf).await.ok();
            }
            buf
        };
        let wait_all = async { tokio::join!(child.wait(), read_stdout) };

        tokio::select! {
            (wait_result, stdout) = wait_all => {
                let status = wait_result?;
                if !status.success() {
                    anyhow::bail!(
                        "QC agent {} exited with {}",
                        self.name,
                        status.code().map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string())
                    );
                }
                Ok(String::from_utf8_lossy(&stdout).into_owned())
            }
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                anyhow::bail!("QC agent {} cancelled", self.name)
            }
        }
    }
}
