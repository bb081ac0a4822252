//! Checkpoint/rollback hook: creates a git checkpoint before each task,
//! decides whether to restore it afterwards, and garbage-collects stale
//! checkpoint branches.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;

use crate::git::GitCheckpointer;
use crate::model::{Metadata, TaskStatus};

use super::{PostTaskHook, PreTaskHook};

/// When a failed task's checkpoint is automatically restored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RollbackMode {
    /// Never restore automatically.
    #[default]
    Manual,
    /// Restore whenever the task ends RED or FAILED.
    AutoOnRed,
    /// Restore only once retries are exhausted.
    AutoOnMaxRetries,
}

impl FromStr for RollbackMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(RollbackMode::Manual),
            "auto_on_red" => Ok(RollbackMode::AutoOnRed),
            "auto_on_max_retries" => Ok(RollbackMode::AutoOnMaxRetries),
            other => Err(format!("invalid rollback mode: {other:?}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollbackConfig {
    pub enabled: bool,
    pub mode: RollbackMode,
    /// Checkpoints older than this many days are garbage-collected.
    /// Zero or negative disables the sweep.
    pub keep_checkpoint_days: i64,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: RollbackMode::Manual,
            keep_checkpoint_days: 7,
        }
    }
}

/// The checkpoint/rollback hook.
///
/// With no checkpointer attached every operation is a no-op, so the hook
/// can be wired unconditionally.
pub struct RollbackHook {
    checkpointer: Option<Arc<GitCheckpointer>>,
    config: RollbackConfig,
}

impl RollbackHook {
    pub fn new(checkpointer: Option<Arc<GitCheckpointer>>, config: RollbackConfig) -> Self {
        Self {
            checkpointer,
            config,
        }
    }

    fn active(&self) -> Option<&Arc<GitCheckpointer>> {
        if !self.config.enabled {
            return None;
        }
        self.checkpointer.as_ref()
    }

    /// Delete stale checkpoint branches.
    ///
    /// No-op when rollback is disabled, `keep_checkpoint_days <= 0`, or no
    /// checkpointer is attached. A checkpoint whose age is exactly the
    /// cutoff is deleted. Entries without a parseable creation time are
    /// skipped with a warning; individual delete failures are logged and
    /// not counted. Returns the number of deletions.
    pub async fn cleanup(
        &self,
        cancel: &CancellationToken,
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let Some(checkpointer) = self.active() else {
            return Ok(0);
        };
        if self.config.keep_checkpoint_days <= 0 {
            return Ok(0);
        }

        let cutoff = Duration::days(self.config.keep_checkpoint_days);
        let checkpoints = checkpointer.list(cancel).await?;

        let mut deleted = 0usize;
        for checkpoint in checkpoints {
            let Some(created_at) = checkpoint.created_at else {
                tracing::warn!(
                    branch = %checkpoint.branch_name,
                    "checkpoint has no parseable timestamp, skipping cleanup"
                );
                continue;
            };
            if now - created_at < cutoff {
                continue;
            }
            match checkpointer.delete(cancel, &checkpoint.branch_name).await {
                Ok(()) => {
                    tracing::info!(branch = %checkpoint.branch_name, "deleted stale checkpoint");
                    deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        branch = %checkpoint.branch_name,
                        error = %e,
                        "failed to delete stale checkpoint"
                    );
                }
            }
        }

        Ok(deleted)
    }
}

#[async_trait]
impl PreTaskHook for RollbackHook {
    /// Create a checkpoint and stash it in the task metadata. Checkpoint
    /// failure degrades to a warning; only cancellation aborts.
    async fn pre_task(
        &self,
        cancel: &CancellationToken,
        task_number: &str,
        metadata: &mut Metadata,
    ) -> anyhow::Result<()> {
        let Some(checkpointer) = self.active() else {
            return Ok(());
        };

        match checkpointer.create(cancel, task_number, Utc::now()).await {
            Ok(info) => {
                tracing::info!(
                    task = %task_number,
                    branch = %info.branch_name,
                    commit = %info.commit_hash,
                    "created rollback checkpoint"
                );
                metadata.set_checkpoint(&info);
                Ok(())
            }
            Err(e) if e.is_cancelled() => Err(e.into()),
            Err(e) => {
                tracing::warn!(
                    task = %task_number,
                    error = %e,
                    "checkpoint creation failed, continuing without rollback protection"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PostTaskHook for RollbackHook {
    async fn post_task(
        &self,
        cancel: &CancellationToken,
        task_number: &str,
        metadata: &mut Metadata,
        verdict: TaskStatus,
        attempt: u32,
        max_retries: u32,
        success: bool,
    ) -> anyhow::Result<()> {
        let Some(checkpointer) = self.active() else {
            return Ok(());
        };
        let Some(checkpoint) = metadata.take_checkpoint() else {
            return Ok(());
        };

        if success {
            // The work was accepted; the checkpoint branch is pure clutter.
            if let Err(e) = checkpointer.delete(cancel, &checkpoint.branch_name).await {
                tracing::warn!(
                    task = %task_number,
                    branch = %checkpoint.branch_name,
                    error = %e,
                    "failed to delete checkpoint after success"
                );
            }
            return Ok(());
        }

        let should_restore = match self.config.mode {
            RollbackMode::Manual => false,
            RollbackMode::AutoOnRed => {
                matches!(verdict, TaskStatus::Red | TaskStatus::Failed)
            }
            RollbackMode::AutoOnMaxRetries => attempt > max_retries,
        };

        if !should_restore {
            // Keep the branch around as a manual recovery point.
            tracing::info!(
                task = %task_number,
                branch = %checkpoint.branch_name,
                "keeping checkpoint for manual recovery"
            );
            return Ok(());
        }

        match checkpointer.restore(cancel, &checkpoint.commit_hash).await {
            Ok(()) => {
                tracing::info!(
                    task = %task_number,
                    commit = %checkpoint.commit_hash,
                    "restored pre-task checkpoint"
                );
            }
            Err(e) => {
                tracing::warn!(
                    task = %task_number,
                    commit = %checkpoint.commit_hash,
                    error = %e,
                    "checkpoint restore failed"
                );
            }
        }

        if let Err(e) = checkpointer.delete(cancel, &checkpoint.branch_name).await {
            tracing::warn!(
                task = %task_number,
                branch = %checkpoint.branch_name,
                error = %e,
                "failed to delete checkpoint branch after restore"
            );
        }

        Ok(())
    }
}
