//! Architecture checkpoint hook: optional pre-task architectural
//! assessment that can block a task, inject an escalation fragment into its
//! prompt, or flag low-confidence assessments for human attention.
//!
//! The assessment itself comes from an external [`ArchitectureAssessor`];
//! this hook only applies policy.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::model::Task;

/// Policy applied to assessment results.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ArchitectureMode {
    /// Tasks flagged for review fail immediately.
    Block,
    /// Flagged tasks proceed with the assessment appended to their prompt.
    Escalate,
    #[default]
    Off,
}

impl FromStr for ArchitectureMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "block" => Ok(ArchitectureMode::Block),
            "escalate" => Ok(ArchitectureMode::Escalate),
            "off" => Ok(ArchitectureMode::Off),
            other => Err(format!("invalid architecture mode: {other:?}")),
        }
    }
}

/// Result of assessing a task against the architecture.
#[derive(Debug, Clone, Default)]
pub struct Assessment {
    /// The task needs architectural review before it should run.
    pub requires_review: bool,
    /// Assessor confidence in `[0, 1]`.
    pub confidence: f64,
    /// Human-readable reason for the flag.
    pub reason: String,
    /// Text to inject into the task prompt in escalate mode.
    pub prompt_fragment: String,
}

/// External sub-assessor contract.
#[async_trait]
pub trait ArchitectureAssessor: Send + Sync {
    async fn assess(&self, task: &Task) -> anyhow::Result<Assessment>;
}

/// What the executor should do with the task.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Run the task as-is. `escalated` marks a low-confidence assessment.
    Proceed { escalated: bool },
    /// Run the task with the fragment appended to its prompt.
    Inject {
        prompt_fragment: String,
        escalated: bool,
    },
    /// Do not run the task.
    Block { reason: String },
}

/// The architecture checkpoint hook.
pub struct ArchitectureCheckpointHook {
    assessor: Option<Arc<dyn ArchitectureAssessor>>,
    mode: ArchitectureMode,
    confidence_threshold: f64,
}

impl ArchitectureCheckpointHook {
    pub fn new(
        assessor: Option<Arc<dyn ArchitectureAssessor>>,
        mode: ArchitectureMode,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            assessor,
            mode,
            confidence_threshold,
        }
    }

    /// Assess a task and apply the configured policy.
    ///
    /// Assessor failures degrade to a plain proceed; only blocking is ever
    /// fatal to the task.
    pub async fn check_task(&self, cancel: &CancellationToken, task: &Task) -> CheckOutcome {
        if self.mode == ArchitectureMode::Off {
            return CheckOutcome::Proceed { escalated: false };
        }
        let Some(assessor) = &self.assessor else {
            return CheckOutcome::Proceed { escalated: false };
        };
        if cancel.is_cancelled() {
            return CheckOutcome::Proceed { escalated: false };
        }

        let assessment = match assessor.assess(task).await {
            Ok(assessment) => assessment,
            Err(e) => {
                tracing::warn!(
                    task = %task.number,
                    error = %e,
                    "architecture assessment failed, proceeding without it"
                );
                return CheckOutcome::Proceed { escalated: false };
            }
        };

        let low_confidence = assessment.confidence < self.confidence_threshold;
        if low_confidence {
            tracing::warn!(
                task = %task.number,
                confidence = assessment.confidence,
                threshold = self.confidence_threshold,
                "architecture assessment confidence below threshold, flagging escalation"
            );
        }

        match self.mode {
            ArchitectureMode::Block if assessment.requires_review => {
                tracing::warn!(
                    task = %task.number,
                    reason = %assessment.reason,
                    "architecture checkpoint blocked task"
                );
                CheckOutcome::Block {
                    reason: assessment.reason,
                }
            }
            ArchitectureMode::Escalate if assessment.requires_review => CheckOutcome::Inject {
                prompt_fragment: assessment.prompt_fragment,
                escalated: true,
            },
            _ => CheckOutcome::Proceed {
                escalated: low_confidence,
            },
        }
    }
}
