//! Core data model: tasks, waves, verdicts, results, and the per-task
//! metadata bag exchanged with hooks.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A criterion that can optionally be verified by running a command.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredCriterion {
    /// The criterion text, as shown to the QC agents.
    pub text: String,
    /// Optional verification block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<Verification>,
}

/// A shell command whose output is compared against an expected value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Verification {
    pub command: String,
    /// Expected trimmed output. Empty means "exit status only".
    #[serde(default)]
    pub expected_output: String,
}

/// Declared commit shape for post-hoc verification against `git log`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommitSpec {
    /// Conventional-commit type prefix (e.g. "feat", "fix").
    #[serde(default)]
    pub commit_type: String,
    /// Substring the commit subject must contain.
    #[serde(default)]
    pub message_contains: String,
}

/// A preflight dependency check: a shell command that must succeed before
/// the task is attempted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub command: String,
    #[serde(default)]
    pub description: String,
}

/// The atomic unit of a plan.
///
/// `number` is the scheduling key: unique within a plan, compared
/// numerically where parseable and lexicographically otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Task {
    pub number: String,
    pub name: String,
    #[serde(default)]
    pub prompt: String,
    /// Named agent role to invoke for this task.
    #[serde(default)]
    pub agent: String,
    /// Task type; `"integration"` activates the integration criteria.
    #[serde(default)]
    pub task_type: String,
    /// Paths the task will modify.
    #[serde(default)]
    pub files: Vec<String>,
    /// Dependency references: a local task number or
    /// `file:<plan>:task:<number>`.
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub success_criteria: Vec<String>,
    /// Extra criteria scored only for integration tasks.
    #[serde(default)]
    pub integration_criteria: Vec<String>,
    /// Guidance for the QC agents; never scored.
    #[serde(default)]
    pub key_points: Vec<String>,
    #[serde(default)]
    pub test_commands: Vec<String>,
    #[serde(default)]
    pub structured_criteria: Vec<StructuredCriterion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_spec: Option<CommitSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_time: Option<Duration>,
    /// Opaque grouping hint used for wave group info.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worktree_group: Option<String>,
    /// Ordered preflight checks.
    #[serde(default)]
    pub dependency_checks: Vec<DependencyCheck>,
    /// The plan file this task was loaded from.
    #[serde(default)]
    pub source_file: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Task {
    /// The criteria QC scores for this task: success criteria, plus the
    /// integration criteria when the task type is `"integration"`.
    /// Indexing is continuous and 0-based.
    pub fn scored_criteria(&self) -> Vec<&str> {
        let mut criteria: Vec<&str> = self.success_criteria.iter().map(String::as_str).collect();
        if self.task_type == "integration" {
            criteria.extend(self.integration_criteria.iter().map(String::as_str));
        }
        criteria
    }
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Metadata key holding the [`CheckpointInfo`] created by the rollback hook.
pub const KEY_ROLLBACK_CHECKPOINT: &str = "rollback_checkpoint";
/// Metadata key holding error strings detected by earlier components.
pub const KEY_DETECTED_ERRORS: &str = "detected_errors";

/// Free-form string-keyed bag handed across the hook boundary.
///
/// Well-known keys are wrapped in typed accessors so the rest of the engine
/// never touches raw JSON values.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, serde_json::Value>);

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Store the rollback checkpoint created in the pre-task phase.
    pub fn set_checkpoint(&mut self, info: &CheckpointInfo) {
        if let Ok(value) = serde_json::to_value(info) {
            self.insert(KEY_ROLLBACK_CHECKPOINT, value);
        }
    }

    /// Read back the rollback checkpoint, if one was stored.
    pub fn checkpoint(&self) -> Option<CheckpointInfo> {
        self.get(KEY_ROLLBACK_CHECKPOINT)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Remove and return the rollback checkpoint.
    pub fn take_checkpoint(&mut self) -> Option<CheckpointInfo> {
        self.remove(KEY_ROLLBACK_CHECKPOINT)
            .and_then(|v| serde_json::from_value(v).ok())
    }

    /// Errors detected by earlier components (classifier input for QC).
    pub fn detected_errors(&self) -> Vec<String> {
        self.get(KEY_DETECTED_ERRORS)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn set_detected_errors(&mut self, errors: &[String]) {
        self.insert(
            KEY_DETECTED_ERRORS,
            serde_json::Value::Array(
                errors
                    .iter()
                    .map(|e| serde_json::Value::String(e.clone()))
                    .collect(),
            ),
        );
    }
}

// ---------------------------------------------------------------------------
// Verdicts and status
// ---------------------------------------------------------------------------

/// Ternary QC outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Green,
    Yellow,
    Red,
}

impl Verdict {
    /// Severity rank for strictest-wins aggregation: RED > YELLOW > GREEN.
    pub fn severity(self) -> u8 {
        match self {
            Verdict::Green => 0,
            Verdict::Yellow => 1,
            Verdict::Red => 2,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Green => "GREEN",
            Verdict::Yellow => "YELLOW",
            Verdict::Red => "RED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GREEN" => Ok(Verdict::Green),
            "YELLOW" => Ok(Verdict::Yellow),
            "RED" => Ok(Verdict::Red),
            other => Err(format!("invalid verdict: {other:?}")),
        }
    }
}

/// Terminal state of a task execution.
///
/// `Red` means QC rejected the work; `Failed` means an earlier phase failed
/// non-recoverably (invocation error, blocked hook, cancellation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    Green,
    Yellow,
    Red,
    Failed,
}

impl TaskStatus {
    /// Whether the task reached an accepted terminal state.
    pub fn is_success(self) -> bool {
        matches!(self, TaskStatus::Green | TaskStatus::Yellow)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Green => "GREEN",
            TaskStatus::Yellow => "YELLOW",
            TaskStatus::Red => "RED",
            TaskStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Waves
// ---------------------------------------------------------------------------

/// A maximal antichain of the dependency DAG: tasks legal to run in
/// parallel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Wave {
    pub name: String,
    /// Member task numbers, numeric-parseable ascending first, then the
    /// rest lexicographically.
    pub task_numbers: Vec<String>,
    /// Parallelism bound; defaults to the member count.
    pub max_concurrency: usize,
    /// Worktree group -> member task numbers.
    pub group_info: BTreeMap<String, Vec<String>>,
}

// ---------------------------------------------------------------------------
// Checkpoints
// ---------------------------------------------------------------------------

/// A named git branch pointing at the pre-task HEAD, used as a rollback
/// target. `created_at` is `None` when the branch-name timestamp could not
/// be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointInfo {
    pub branch_name: String,
    pub commit_hash: String,
    pub created_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Outcome of running a single criterion verification command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CriterionOutcome {
    /// 0-based criterion index.
    pub index: usize,
    pub criterion: String,
    pub passed: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Final record of one task execution.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_number: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub duration: Duration,
    /// Number of agent invocations performed (attempt indices 0..attempts).
    pub attempts: u32,
    pub output: String,
    pub error: Option<String>,
    pub qc_verdict: Option<Verdict>,
    pub qc_feedback: String,
    pub checkpoint: Option<CheckpointInfo>,
    pub criteria_results: Vec<CriterionOutcome>,
    /// Set when the architecture hook injected an escalation prompt or
    /// reported confidence below threshold.
    pub architecture_escalated: bool,
    /// Estimated time carried over from the task, for anomaly detection.
    pub estimated_time: Option<Duration>,
}

impl TaskResult {
    /// A result shell for a task that has not finished any phase yet.
    pub fn pending(task: &Task) -> Self {
        Self {
            task_number: task.number.clone(),
            task_name: task.name.clone(),
            status: TaskStatus::Failed,
            duration: Duration::ZERO,
            attempts: 0,
            output: String::new(),
            error: None,
            qc_verdict: None,
            qc_feedback: String::new(),
            checkpoint: None,
            criteria_results: Vec::new(),
            architecture_escalated: false,
            estimated_time: task.estimated_time,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Whether the anomaly monitor counts this result as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Red | TaskStatus::Failed) || self.error.is_some()
    }
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    ConsecutiveFailures,
    HighErrorRate,
    DurationOutlier,
}

impl fmt::Display for AnomalyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AnomalyKind::ConsecutiveFailures => "consecutive_failures",
            AnomalyKind::HighErrorRate => "high_error_rate",
            AnomalyKind::DurationOutlier => "duration_outlier",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        write!(f, "{s}")
    }
}

/// A health signal emitted by the per-wave anomaly monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaveAnomaly {
    pub kind: AnomalyKind,
    pub severity: Severity,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_number: Option<String>,
    pub wave_name: String,
}
