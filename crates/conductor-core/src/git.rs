//! Git-branch checkpointing.
//!
//! A checkpoint is a branch pointing at the pre-task HEAD, named
//! `<prefix>task-<number>-<YYYYMMDD-HHMMSS>`. Restore is a hard reset to
//! the recorded commit; delete removes the branch. All git commands go
//! through the [`CommandRunner`] seam and are serialised per working
//! directory, since git does not tolerate concurrent mutations of one
//! repository.

use std::sync::Arc;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::command::{CommandError, CommandRunner};
use crate::model::CheckpointInfo;

/// Default prefix for checkpoint branch names.
pub const DEFAULT_CHECKPOINT_PREFIX: &str = "conductor-checkpoint-";

/// Timestamp format embedded in checkpoint branch names.
const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

static DATED_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{8}-\d{6})$").expect("static regex"));

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("git command failed: {0}")]
    Git(#[from] CommandError),

    #[error("cannot restore checkpoint: empty commit hash")]
    EmptyCommitHash,

    #[error("cannot delete checkpoint: empty branch name")]
    EmptyBranchName,
}

impl CheckpointError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CheckpointError::Git(e) if e.is_cancelled())
    }
}

/// Creates, restores, deletes and lists git-branch checkpoints.
#[derive(Clone)]
pub struct GitCheckpointer {
    runner: Arc<dyn CommandRunner>,
    prefix: String,
    /// Serialises git operations against one working tree.
    git_lock: Arc<Mutex<()>>,
}

impl std::fmt::Debug for GitCheckpointer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCheckpointer")
            .field("prefix", &self.prefix)
            .field("working_dir", &self.runner.working_dir())
            .finish()
    }
}

impl GitCheckpointer {
    /// Create a checkpointer. An empty or absent prefix falls back to
    /// [`DEFAULT_CHECKPOINT_PREFIX`].
    pub fn new(runner: Arc<dyn CommandRunner>, prefix: Option<String>) -> Self {
        let prefix = match prefix {
            Some(p) if !p.is_empty() => p,
            _ => DEFAULT_CHECKPOINT_PREFIX.to_string(),
        };
        Self {
            runner,
            prefix,
            git_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Current HEAD commit hash.
    pub async fn current_commit(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, CheckpointError> {
        let _lock = self.git_lock.lock().await;
        let out = self.runner.run(cancel, "git rev-parse HEAD").await?;
        Ok(out.trim().to_string())
    }

    /// Whether the working tree is clean (`git status --porcelain` empty).
    pub async fn is_clean(&self, cancel: &CancellationToken) -> Result<bool, CheckpointError> {
        let _lock = self.git_lock.lock().await;
        let out = self.runner.run(cancel, "git status --porcelain").await?;
        Ok(out.trim().is_empty())
    }

    /// Name of the currently checked-out branch (empty on detached HEAD).
    pub async fn current_branch(
        &self,
        cancel: &CancellationToken,
    ) -> Result<String, CheckpointError> {
        let _lock = self.git_lock.lock().await;
        let out = self.runner.run(cancel, "git branch --show-current").await?;
        Ok(out.trim().to_string())
    }

    /// Create a checkpoint branch at HEAD for the given task number.
    ///
    /// `now` is injected so branch names are deterministic under test.
    pub async fn create(
        &self,
        cancel: &CancellationToken,
        task_number: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckpointInfo, CheckpointError> {
        let _lock = self.git_lock.lock().await;

        let commit_hash = {
            let out = self.runner.run(cancel, "git rev-parse HEAD").await?;
            out.trim().to_string()
        };

        let branch_name = format!(
            "{}task-{}-{}",
            self.prefix,
            task_number,
            now.format(TIMESTAMP_FORMAT)
        );

        self.runner
            .run(cancel, &format!("git branch {}", shell_quote(&branch_name)))
            .await?;

        Ok(CheckpointInfo {
            branch_name,
            commit_hash,
            created_at: Some(now),
        })
    }

    /// Hard-reset the working tree to the recorded commit hash.
    pub async fn restore(
        &self,
        cancel: &CancellationToken,
        commit_hash: &str,
    ) -> Result<(), CheckpointError> {
        if commit_hash.trim().is_empty() {
            return Err(CheckpointError::EmptyCommitHash);
        }
        let _lock = self.git_lock.lock().await;
        self.runner
            .run(cancel, &format!("git reset --hard {}", shell_quote(commit_hash)))
            .await?;
        Ok(())
    }

    /// Delete a checkpoint branch.
    pub async fn delete(
        &self,
        cancel: &CancellationToken,
        branch_name: &str,
    ) -> Result<(), CheckpointError> {
        if branch_name.trim().is_empty() {
            return Err(CheckpointError::EmptyBranchName);
        }
        let _lock = self.git_lock.lock().await;
        self.runner
            .run(cancel, &format!("git branch -D {}", shell_quote(branch_name)))
            .await?;
        Ok(())
    }

    /// List all checkpoint branches carrying this checkpointer's prefix.
    ///
    /// Each line is trimmed and a leading `*` marker stripped. The creation
    /// time is parsed from the trailing `YYYYMMDD-HHMMSS` tail, or from a
    /// legacy `<prefix><unixSeconds>` name; anything else yields
    /// `created_at = None`.
    pub async fn list(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<CheckpointInfo>, CheckpointError> {
        let _lock = self.git_lock.lock().await;
        let out = self
            .runner
            .run(
                cancel,
                &format!("git branch --list {}", shell_quote(&format!("{}*", self.prefix))),
            )
            .await?;

        let mut checkpoints = Vec::new();
        for line in out.lines() {
            let name = line.trim().trim_start_matches('*').trim();
            if name.is_empty() {
                continue;
            }
            checkpoints.push(CheckpointInfo {
                branch_name: name.to_string(),
                commit_hash: String::new(),
                created_at: parse_checkpoint_timestamp(name, &self.prefix),
            });
        }
        Ok(checkpoints)
    }
}

/// Parse the creation time embedded in a checkpoint branch name.
///
/// Probes the dated `YYYYMMDD-HHMMSS` tail first, then the legacy
/// branch-guard form `<prefix><unixSeconds>`. The production path only ever
/// writes the dated format.
pub fn parse_checkpoint_timestamp(branch_name: &str, prefix: &str) -> Option<DateTime<Utc>> {
    if let Some(m) = DATED_TAIL.captures(branch_name).and_then(|c| c.get(1)) {
        if let Ok(naive) = NaiveDateTime::parse_from_str(m.as_str(), TIMESTAMP_FORMAT) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }

    // Legacy branch-guard form: the prefix followed by bare unix seconds.
    if let Some(tail) = branch_name.strip_prefix(prefix) {
        if !tail.is_empty() && tail.bytes().all(|b| b.is_ascii_digit()) {
            if let Ok(secs) = tail.parse::<i64>() {
                return Utc.timestamp_opt(secs, 0).single();
            }
        }
    }

    None
}

/// Quote a value for inclusion in a `sh -c` command line.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}
