//! Plan-level branch guard: runs once before any wave.
//!
//! Verifies the working tree is in an acceptable state, checkpoints the
//! current branch, and forks a work branch when the plan would otherwise
//! run directly on a protected branch.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::command::CommandRunner;
use crate::git::{CheckpointError, GitCheckpointer};
use crate::model::CheckpointInfo;

/// Task-number tag used for the plan-start safety checkpoint, keeping it in
/// the dated branch namespace.
const PLAN_CHECKPOINT_NUMBER: &str = "0";

#[derive(Debug, Error)]
pub enum BranchGuardError {
    #[error("working tree is not clean and require_clean_state is set")]
    DirtyWorkingTree,

    #[error("git unavailable for branch guard: {0}")]
    Git(#[from] CheckpointError),

    #[error("failed to fork work branch {branch:?}: {message}")]
    Fork { branch: String, message: String },

    #[error("branch guard cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct BranchGuardConfig {
    pub enabled: bool,
    /// Refuse to start on a dirty working tree.
    pub require_clean_state: bool,
    /// Branches the plan must never run on directly.
    pub protected_branches: Vec<String>,
}

impl Default for BranchGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            require_clean_state: false,
            protected_branches: vec!["main".to_string(), "master".to_string()],
        }
    }
}

/// What the guard did at plan start.
#[derive(Debug, Clone, Default)]
pub struct BranchGuardOutcome {
    pub original_branch: String,
    pub safety_checkpoint: Option<CheckpointInfo>,
    /// Work branch created because the original branch was protected.
    pub forked_branch: Option<String>,
}

/// The plan-start branch guard.
pub struct BranchGuard {
    checkpointer: Arc<GitCheckpointer>,
    runner: Arc<dyn CommandRunner>,
    config: BranchGuardConfig,
}

impl BranchGuard {
    pub fn new(
        checkpointer: Arc<GitCheckpointer>,
        runner: Arc<dyn CommandRunner>,
        config: BranchGuardConfig,
    ) -> Self {
        Self {
            checkpointer,
            runner,
            config,
        }
    }

    /// Run the guard. Git failures here are unrecoverable for the plan.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        plan_name: &str,
    ) -> Result<BranchGuardOutcome, BranchGuardError> {
        if !self.config.enabled {
            return Ok(BranchGuardOutcome::default());
        }
        if cancel.is_cancelled() {
            return Err(BranchGuardError::Cancelled);
        }

        let clean = self.checkpointer.is_clean(cancel).await?;
        if !clean {
            if self.config.require_clean_state {
                return Err(BranchGuardError::DirtyWorkingTree);
            }
            tracing::warn!("working tree is dirty; proceeding without clean-state guarantee");
        }

        let original_branch = self.checkpointer.current_branch(cancel).await?;

        // Safety checkpoint of the current branch before anything runs.
        let safety_checkpoint = self
            .checkpointer
            .create(cancel, PLAN_CHECKPOINT_NUMBER, Utc::now())
            .await?;
        tracing::info!(
            branch = %safety_checkpoint.branch_name,
            commit = %safety_checkpoint.commit_hash,
            "created plan-start safety checkpoint"
        );

        let forked_branch = if self
            .config
            .protected_branches
            .iter()
            .any(|b| b == &original_branch)
        {
            let work_branch = format!("conductor/{}", sanitize_branch_component(plan_name));
            tracing::info!(
                original = %original_branch,
                fork = %work_branch,
                "current branch is protected, forking work branch"
            );
            self.runner
                .run(cancel, &format!("git checkout -b '{work_branch}'"))
                .await
                .map_err(|e| {
                    if e.is_cancelled() {
                        BranchGuardError::Cancelled
                    } else {
                        BranchGuardError::Fork {
                            branch: work_branch.clone(),
                            message: e.to_string(),
                        }
                    }
                })?;
            Some(work_branch)
        } else {
            None
        };

        Ok(BranchGuardOutcome {
            original_branch,
            safety_checkpoint: Some(safety_checkpoint),
            forked_branch,
        })
    }
}

/// Reduce a plan name to a safe branch-name component.
fn sanitize_branch_component(name: &str) -> String {
    let sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "plan".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_plan_names() {
        assert_eq!(sanitize_branch_component("auth rollout"), "auth-rollout");
        assert_eq!(sanitize_branch_component("v1.2/final"), "v1.2-final");
        assert_eq!(sanitize_branch_component(""), "plan");
    }
}
