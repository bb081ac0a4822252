//! `conductor cleanup`: delete stale checkpoint branches.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use conductor_core::command::ShellRunner;
use conductor_core::git::GitCheckpointer;
use conductor_core::hooks::{RollbackConfig, RollbackHook};

use crate::config::ConductorConfig;
use crate::exit_codes;

/// Sweep stale checkpoints. Returns the process exit code.
pub async fn cleanup(
    working_dir: PathBuf,
    keep_days: Option<i64>,
    config: ConductorConfig,
    cancel: CancellationToken,
) -> Result<i32> {
    let runner = Arc::new(ShellRunner::new(&working_dir));
    let checkpointer = Arc::new(GitCheckpointer::new(
        runner,
        config.checkpoint_prefix.clone(),
    ));

    let hook = RollbackHook::new(
        Some(checkpointer),
        RollbackConfig {
            enabled: true,
            mode: config.rollback_mode,
            keep_checkpoint_days: keep_days.unwrap_or(config.keep_checkpoint_days),
        },
    );

    match hook.cleanup(&cancel, Utc::now()).await {
        Ok(deleted) => {
            println!("deleted {deleted} stale checkpoint(s)");
            Ok(exit_codes::ALL_GREEN)
        }
        Err(e) => {
            eprintln!("cleanup failed: {e}");
            Ok(exit_codes::EXTERNAL_FAILURE)
        }
    }
}
