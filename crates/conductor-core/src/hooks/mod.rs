//! Task-lifecycle hooks.
//!
//! Hooks are small capability traits invoked by the executor around agent
//! work. Every hook is optional: the executor composes `Option<Arc<...>>`
//! values, and an absent hook is a disabled no-op.

pub mod architecture;
pub mod branch_guard;
pub mod rollback;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::{Metadata, TaskStatus};

pub use architecture::{
    ArchitectureAssessor, ArchitectureCheckpointHook, ArchitectureMode, Assessment, CheckOutcome,
};
pub use branch_guard::{BranchGuard, BranchGuardConfig, BranchGuardError, BranchGuardOutcome};
pub use rollback::{RollbackConfig, RollbackHook, RollbackMode};

/// Runs before a task's agent is invoked.
///
/// Errors are degradation signals: the executor logs them and continues,
/// except when the cancellation token has fired.
#[async_trait]
pub trait PreTaskHook: Send + Sync {
    async fn pre_task(
        &self,
        cancel: &CancellationToken,
        task_number: &str,
        metadata: &mut Metadata,
    ) -> anyhow::Result<()>;
}

/// Runs after a task reaches a terminal state.
///
/// `attempt` is the total number of agent invocations performed;
/// `success` is true for GREEN/YELLOW verdicts.
#[async_trait]
pub trait PostTaskHook: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn post_task(
        &self,
        cancel: &CancellationToken,
        task_number: &str,
        metadata: &mut Metadata,
        verdict: TaskStatus,
        attempt: u32,
        max_retries: u32,
        success: bool,
    ) -> anyhow::Result<()>;
}

// Compile-time assertions: hook traits must be object-safe.
const _: () = {
    fn _assert_pre(_: &dyn PreTaskHook) {}
    fn _assert_post(_: &dyn PostTaskHook) {}
};
