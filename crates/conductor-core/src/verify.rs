//! Non-blocking verification signals: per-criterion verification commands
//! and commit-spec matching against recent git history.
//!
//! Verification never aborts a task. Results are collected and handed to
//! the QC prompt as evidence.

use tokio_util::sync::CancellationToken;

use crate::command::{CommandError, CommandRunner};
use crate::model::{CommitSpec, CriterionOutcome, Task};

/// Maximum bytes of command output kept per criterion.
const OUTPUT_SNIPPET_LIMIT: usize = 2048;

/// Run every structured criterion's verification command.
///
/// A criterion passes when its command exits zero and, if an expected
/// output is declared, the trimmed actual output equals the trimmed
/// expectation. Criteria without a verification block are skipped.
pub async fn run_criterion_verifications(
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    task: &Task,
) -> Vec<CriterionOutcome> {
    let mut outcomes = Vec::new();

    for (index, criterion) in task.structured_criteria.iter().enumerate() {
        let Some(verification) = &criterion.verification else {
            continue;
        };

        let outcome = match runner.run(cancel, &verification.command).await {
            Ok(output) => {
                let expected = verification.expected_output.trim();
                let passed = expected.is_empty() || output.trim() == expected;
                CriterionOutcome {
                    index,
                    criterion: criterion.text.clone(),
                    passed,
                    output: truncate_snippet(&output, OUTPUT_SNIPPET_LIMIT),
                    error: None,
                }
            }
            Err(CommandError::Cancelled { .. }) => {
                // Stop issuing commands; report what we have.
                tracing::debug!(task = %task.number, "criterion verification cancelled");
                break;
            }
            Err(e) => CriterionOutcome {
                index,
                criterion: criterion.text.clone(),
                passed: false,
                output: String::new(),
                error: Some(e.to_string()),
            },
        };

        if !outcome.passed {
            tracing::warn!(
                task = %task.number,
                criterion = %outcome.criterion,
                "criterion verification failed (non-blocking)"
            );
        }
        outcomes.push(outcome);
    }

    outcomes
}

/// Result of matching a commit spec against recent history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitCheck {
    pub matched: bool,
    pub detail: String,
}

/// Match a task's declared commit spec against recent `git log` subjects.
///
/// A subject matches when it starts with the declared conventional-commit
/// type (when one is declared) and contains the declared message fragment
/// (when one is declared).
pub async fn verify_commit(
    runner: &dyn CommandRunner,
    cancel: &CancellationToken,
    spec: &CommitSpec,
) -> Result<CommitCheck, CommandError> {
    let log = runner
        .run(cancel, "git log -15 --pretty=format:%s")
        .await?;

    for subject in log.lines().map(str::trim).filter(|s| !s.is_empty()) {
        if commit_subject_matches(subject, spec) {
            return Ok(CommitCheck {
                matched: true,
                detail: format!("matched commit: {subject}"),
            });
        }
    }

    Ok(CommitCheck {
        matched: false,
        detail: format!(
            "no recent commit matches type {:?} containing {:?}",
            spec.commit_type, spec.message_contains
        ),
    })
}

fn commit_subject_matches(subject: &str, spec: &CommitSpec) -> bool {
    if !spec.commit_type.is_empty() {
        // Conventional form: "type: ..." or "type(scope): ...".
        let type_ok = subject.starts_with(&format!("{}:", spec.commit_type))
            || subject.starts_with(&format!("{}(", spec.commit_type));
        if !type_ok {
            return false;
        }
    }
    if !spec.message_contains.is_empty() && !subject.contains(&spec.message_contains) {
        return false;
    }
    true
}

fn truncate_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}
