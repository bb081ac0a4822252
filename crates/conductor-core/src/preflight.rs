//! Preflight dependency checks: ordered shell commands that must all
//! succeed before a task is attempted. The first failure aborts the task
//! and is not retried.

use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandError, CommandRunner};
use crate::model::Task;

#[derive(Debug, Error)]
pub enum PreflightError {
    #[error(
        "dependency check failed: {command:?} ({description}) after {:.1}s: {detail}",
        .elapsed.as_secs_f64()
    )]
    DependencyCheckFailed {
        command: String,
        description: String,
        elapsed: Duration,
        detail: String,
    },

    #[error("preflight cancelled")]
    Cancelled,
}

/// Run a task's dependency checks sequentially, in declaration order.
pub async fn run_dependency_checks(
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    task: &Task,
) -> Result<(), PreflightError> {
    for check in &task.dependency_checks {
        let start = Instant::now();
        match runner.run(cancel, &check.command).await {
            Ok(_) => {
                tracing::debug!(
                    task = %task.number,
                    command = %check.command,
                    "dependency check passed"
                );
            }
            Err(CommandError::Cancelled { .. }) => return Err(PreflightError::Cancelled),
            Err(e) => {
                return Err(PreflightError::DependencyCheckFailed {
                    command: check.command.clone(),
                    description: check.description.clone(),
                    elapsed: start.elapsed(),
                    detail: e.to_string(),
                });
            }
        }
    }
    Ok(())
}
