//! Rollback-hook scenarios against a scripted git backend: checkpoint
//! hand-off, mode-driven restore decisions, and the stale-checkpoint sweep.

mod common;

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;

use common::ScriptedRunner;
use conductor_core::git::GitCheckpointer;
use conductor_core::hooks::{PostTaskHook, PreTaskHook, RollbackConfig, RollbackHook, RollbackMode};
use conductor_core::model::{Metadata, TaskStatus};

fn checkpointer(runner: Arc<ScriptedRunner>) -> Arc<GitCheckpointer> {
    Arc::new(GitCheckpointer::new(runner, None))
}

fn hook(runner: Arc<ScriptedRunner>, mode: RollbackMode, keep_days: i64) -> RollbackHook {
    RollbackHook::new(
        Some(checkpointer(runner)),
        RollbackConfig {
            enabled: true,
            mode,
            keep_checkpoint_days: keep_days,
        },
    )
}

#[tokio::test]
async fn pre_task_stores_checkpoint_in_metadata() {
    let runner = Arc::new(ScriptedRunner::new().respond("git rev-parse HEAD", "abc123\n"));
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);

    let mut metadata = Metadata::new();
    hook.pre_task(&CancellationToken::new(), "5", &mut metadata)
        .await
        .unwrap();

    let checkpoint = metadata.checkpoint().expect("checkpoint stored");
    assert_eq!(checkpoint.commit_hash, "abc123");
    assert!(checkpoint
        .branch_name
        .starts_with("conductor-checkpoint-task-5-"));
    assert!(checkpoint.created_at.is_some());
    assert_eq!(runner.count_with_prefix("git branch 'conductor-checkpoint-task-5-"), 1);
}

#[tokio::test]
async fn checkpoint_failure_degrades_without_aborting() {
    let runner = Arc::new(ScriptedRunner::new().fail("git rev-parse HEAD", 128));
    let hook = hook(runner, RollbackMode::Manual, 7);

    let mut metadata = Metadata::new();
    hook.pre_task(&CancellationToken::new(), "5", &mut metadata)
        .await
        .expect("degraded checkpoint failure is not an error");
    assert!(metadata.checkpoint().is_none());
}

#[tokio::test]
async fn auto_on_max_retries_restores_exactly_once_when_exhausted() {
    // Seed scenario: mode auto_on_max_retries, maxRetries=2, attempt=3,
    // verdict RED -> restore once, delete once.
    let runner = Arc::new(ScriptedRunner::new().respond("git rev-parse HEAD", "abc123\n"));
    let hook = hook(runner.clone(), RollbackMode::AutoOnMaxRetries, 7);

    let mut metadata = Metadata::new();
    hook.pre_task(&CancellationToken::new(), "5", &mut metadata)
        .await
        .unwrap();

    hook.post_task(
        &CancellationToken::new(),
        "5",
        &mut metadata,
        TaskStatus::Red,
        3,
        2,
        false,
    )
    .await
    .unwrap();

    assert_eq!(runner.count_with_prefix("git reset --hard 'abc123'"), 1);
    assert_eq!(runner.count_with_prefix("git branch -D"), 1);
}

#[tokio::test]
async fn auto_on_max_retries_keeps_checkpoint_while_retries_remain() {
    let runner = Arc::new(ScriptedRunner::new().respond("git rev-parse HEAD", "abc123\n"));
    let hook = hook(runner.clone(), RollbackMode::AutoOnMaxRetries, 7);

    let mut metadata = Metadata::new();
    hook.pre_task(&CancellationToken::new(), "5", &mut metadata)
        .await
        .unwrap();
    hook.post_task(
        &CancellationToken::new(),
        "5",
        &mut metadata,
        TaskStatus::Red,
        2,
        2,
        false,
    )
    .await
    .unwrap();

    assert_eq!(runner.count_with_prefix("git reset --hard"), 0);
    assert_eq!(runner.count_with_prefix("git branch -D"), 0);
}

#[tokio::test]
async fn auto_on_red_restores_on_red_and_failed() {
    for verdict in [TaskStatus::Red, TaskStatus::Failed] {
        let runner = Arc::new(ScriptedRunner::new().respond("git rev-parse HEAD", "abc123\n"));
        let hook = hook(runner.clone(), RollbackMode::AutoOnRed, 7);

        let mut metadata = Metadata::new();
        hook.pre_task(&CancellationToken::new(), "5", &mut metadata)
            .await
            .unwrap();
        hook.post_task(
            &CancellationToken::new(),
            "5",
            &mut metadata,
            verdict,
            1,
            2,
            false,
        )
        .await
        .unwrap();

        assert_eq!(runner.count_with_prefix("git reset --hard"), 1, "{verdict:?}");
        assert_eq!(runner.count_with_prefix("git branch -D"), 1, "{verdict:?}");
    }
}

#[tokio::test]
async fn manual_mode_never_restores() {
    let runner = Arc::new(ScriptedRunner::new().respond("git rev-parse HEAD", "abc123\n"));
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);

    let mut metadata = Metadata::new();
    hook.pre_task(&CancellationToken::new(), "5", &mut metadata)
        .await
        .unwrap();
    hook.post_task(
        &CancellationToken::new(),
        "5",
        &mut metadata,
        TaskStatus::Failed,
        3,
        2,
        false,
    )
    .await
    .unwrap();

    assert_eq!(runner.count_with_prefix("git reset --hard"), 0);
    assert_eq!(
        runner.count_with_prefix("git branch -D"),
        0,
        "failed manual tasks keep their checkpoint"
    );
}

#[tokio::test]
async fn success_always_deletes_the_checkpoint() {
    let runner = Arc::new(ScriptedRunner::new().respond("git rev-parse HEAD", "abc123\n"));
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);

    let mut metadata = Metadata::new();
    hook.pre_task(&CancellationToken::new(), "5", &mut metadata)
        .await
        .unwrap();
    hook.post_task(
        &CancellationToken::new(),
        "5",
        &mut metadata,
        TaskStatus::Green,
        1,
        2,
        true,
    )
    .await
    .unwrap();

    assert_eq!(runner.count_with_prefix("git reset --hard"), 0);
    assert_eq!(runner.count_with_prefix("git branch -D"), 1);
}

// ---------------------------------------------------------------------------
// Cleanup sweep
// ---------------------------------------------------------------------------

const BRANCH_LIST: &str = "\
  conductor-checkpoint-task-1-20260103-120000
  conductor-checkpoint-task-2-20260101-120000
* conductor-checkpoint-task-3-20260109-120000
";

#[tokio::test]
async fn cleanup_deletes_stale_checkpoints_inclusively() {
    // Seed scenario: now = 2026-01-10T12:00:00Z, keep 7 days; branches of
    // Jan 3 (exactly at cutoff) and Jan 1 go, Jan 9 stays.
    let runner = Arc::new(ScriptedRunner::new().respond("git branch --list", BRANCH_LIST));
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);

    let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    let deleted = hook.cleanup(&CancellationToken::new(), now).await.unwrap();

    assert_eq!(deleted, 2);
    assert_eq!(
        runner.count_with_prefix("git branch -D 'conductor-checkpoint-task-1-20260103-120000'"),
        1
    );
    assert_eq!(
        runner.count_with_prefix("git branch -D 'conductor-checkpoint-task-2-20260101-120000'"),
        1
    );
    assert_eq!(
        runner.count_with_prefix("git branch -D 'conductor-checkpoint-task-3-20260109-120000'"),
        0
    );
}

#[tokio::test]
async fn cleanup_is_idempotent_once_stale_branches_are_gone() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond("git branch --list", BRANCH_LIST)
            .respond(
                "git branch --list",
                "  conductor-checkpoint-task-3-20260109-120000\n",
            ),
    );
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);
    let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();

    assert_eq!(hook.cleanup(&CancellationToken::new(), now).await.unwrap(), 2);
    assert_eq!(hook.cleanup(&CancellationToken::new(), now).await.unwrap(), 0);
}

#[tokio::test]
async fn cleanup_skips_unparseable_timestamps() {
    let runner = Arc::new(ScriptedRunner::new().respond(
        "git branch --list",
        "  conductor-checkpoint-task-9-not-a-date\n",
    ));
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);

    let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    let deleted = hook.cleanup(&CancellationToken::new(), now).await.unwrap();
    assert_eq!(deleted, 0);
    assert_eq!(runner.count_with_prefix("git branch -D"), 0);
}

#[tokio::test]
async fn cleanup_accepts_legacy_unix_second_branches() {
    // A legacy branch-guard checkpoint from 2025 is well past any cutoff.
    let legacy = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap().timestamp();
    let listing = format!("  conductor-checkpoint-{legacy}\n");
    let runner = Arc::new(ScriptedRunner::new().respond("git branch --list", &listing));
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);

    let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    assert_eq!(hook.cleanup(&CancellationToken::new(), now).await.unwrap(), 1);
}

#[tokio::test]
async fn cleanup_with_zero_keep_days_is_a_no_op() {
    let runner = Arc::new(ScriptedRunner::new().respond("git branch --list", BRANCH_LIST));
    let hook = hook(runner.clone(), RollbackMode::Manual, 0);

    let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    assert_eq!(hook.cleanup(&CancellationToken::new(), now).await.unwrap(), 0);
    assert!(runner.commands().is_empty(), "no git commands at all");
}

#[tokio::test]
async fn cleanup_counts_only_successful_deletions() {
    let runner = Arc::new(
        ScriptedRunner::new()
            .respond("git branch --list", BRANCH_LIST)
            .fail("git branch -D 'conductor-checkpoint-task-1-", 1),
    );
    let hook = hook(runner.clone(), RollbackMode::Manual, 7);

    let now = Utc.with_ymd_and_hms(2026, 1, 10, 12, 0, 0).unwrap();
    let deleted = hook.cleanup(&CancellationToken::new(), now).await.unwrap();
    assert_eq!(deleted, 1, "the failed delete is not counted");
}
