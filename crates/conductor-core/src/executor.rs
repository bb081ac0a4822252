//! Task executor: runs one task end-to-end.
//!
//! Phases: pre-task hooks (checkpoint, architecture check), preflight,
//! agent invocation, criterion verification, QC review, retry decision,
//! post-task hooks. Hook failures degrade to warnings; preflight and
//! invocation failures fail the task; QC RED drives the retry loop.
//!
//! The executor always returns a [`TaskResult`]; nothing here panics the
//! wave driver.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::classify::ErrorClassifier;
use crate::command::CommandRunner;
use crate::hooks::{ArchitectureCheckpointHook, CheckOutcome, PostTaskHook, PreTaskHook, RollbackHook};
use crate::invoke::AgentInvoker;
use crate::model::{Metadata, Task, TaskResult, TaskStatus, Verdict};
use crate::preflight;
use crate::qc::{QcError, QcReview, QualityController};
use crate::store::{LearningStore, TaskExecution};
use crate::verify;

const CANCELLED_MESSAGE: &str = "task cancelled";

/// Executes a single task through hooks, invocation, verification, and QC.
pub struct TaskExecutor {
    invoker: Arc<dyn AgentInvoker>,
    runner: Arc<dyn CommandRunner>,
    qc: Arc<QualityController>,
    classifier: ErrorClassifier,
    rollback: Option<Arc<RollbackHook>>,
    architecture: Option<Arc<ArchitectureCheckpointHook>>,
    store: Option<Arc<dyn LearningStore>>,
}

impl TaskExecutor {
    pub fn new(
        invoker: Arc<dyn AgentInvoker>,
        runner: Arc<dyn CommandRunner>,
        qc: Arc<QualityController>,
    ) -> Self {
        Self {
            invoker,
            runner,
            qc,
            classifier: ErrorClassifier::new(),
            rollback: None,
            architecture: None,
            store: None,
        }
    }

    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_rollback(mut self, hook: Arc<RollbackHook>) -> Self {
        self.rollback = Some(hook);
        self
    }

    pub fn with_architecture(mut self, hook: Arc<ArchitectureCheckpointHook>) -> Self {
        self.architecture = Some(hook);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn LearningStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Run a task to a terminal state.
    pub async fn execute(&self, cancel: &CancellationToken, task: &Task) -> TaskResult {
        let start = Instant::now();
        let mut result = TaskResult::pending(task);
        let mut metadata = task.metadata.clone();

        tracing::info!(task = %task.number, name = %task.name, "starting task");

        // 1. Rollback pre-hook: create the checkpoint. Degrades on failure.
        if let Some(rollback) = &self.rollback {
            if let Err(e) = rollback.pre_task(cancel, &task.number, &mut metadata).await {
                if cancel.is_cancelled() {
                    result.error = Some(CANCELLED_MESSAGE.to_string());
                    result.duration = start.elapsed();
                    return result;
                }
                tracing::warn!(task = %task.number, error = %e, "rollback pre-hook failed");
            }
        }
        result.checkpoint = metadata.checkpoint();

        // 2. Architecture check: may block, or augment the prompt.
        let mut prompt = task.prompt.clone();
        if let Some(architecture) = &self.architecture {
            match architecture.check_task(cancel, task).await {
                CheckOutcome::Proceed { escalated } => {
                    result.architecture_escalated = escalated;
                }
                CheckOutcome::Inject {
                    prompt_fragment,
                    escalated,
                } => {
                    if !prompt_fragment.is_empty() {
                        prompt.push_str("\n\n");
                        prompt.push_str(&prompt_fragment);
                    }
                    result.architecture_escalated = escalated;
                }
                CheckOutcome::Block { reason } => {
                    result.status = TaskStatus::Failed;
                    result.error = Some(format!("blocked by architecture checkpoint: {reason}"));
                    self.finish(cancel, task, &mut metadata, &mut result, start).await;
                    return result;
                }
            }
        }

        // 3. Preflight: first failing dependency check fails the task.
        if let Err(e) = preflight::run_dependency_checks(self.runner.as_ref(), cancel, task).await {
            result.status = TaskStatus::Failed;
            result.error = Some(e.to_string());
            self.finish(cancel, task, &mut metadata, &mut result, start).await;
            return result;
        }

        // 4. Invoke / verify / QC retry loop. Attempt indices run
        //    0..=max_retries.
        let max_retries = self.qc.max_retries();
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                result.status = TaskStatus::Failed;
                result.error = Some(CANCELLED_MESSAGE.to_string());
                break;
            }

            let mut attempt_task = task.clone();
            attempt_task.prompt = prompt.clone();
            attempt_task.metadata = metadata.clone();

            let invocation = match self.invoker.invoke(cancel, &attempt_task).await {
                Ok(invocation) => invocation,
                Err(e) => {
                    if e.is_cancelled() {
                        result.status = TaskStatus::Failed;
                        result.error = Some(CANCELLED_MESSAGE.to_string());
                        break;
                    }
                    result.attempts = attempt + 1;
                    result.status = TaskStatus::Failed;
                    result.error = Some(e.to_string());

                    let text = if e.output().is_empty() {
                        e.to_string()
                    } else {
                        e.output().to_string()
                    };
                    let level = self.classifier.classify(cancel, &text).await;
                    self.record_execution(task, attempt, None, Some(&e.to_string()), start)
                        .await;

                    if level.is_agent_fixable() && attempt < max_retries {
                        tracing::warn!(
                            task = %task.number,
                            attempt = attempt,
                            error = %e,
                            "invocation failed with agent-fixable error, retrying"
                        );
                        attempt += 1;
                        continue;
                    }
                    tracing::error!(
                        task = %task.number,
                        level = ?level,
                        error = %e,
                        "invocation failed, not retrying"
                    );
                    break;
                }
            };

            result.attempts = attempt + 1;
            result.output = invocation.output.clone();

            // 5. Criterion verification: a non-blocking signal for QC.
            let verifications =
                verify::run_criterion_verifications(self.runner.as_ref(), cancel, &attempt_task)
                    .await;
            result.criteria_results = verifications.clone();

            // Commit verification is advisory only.
            if let Some(spec) = &task.commit_spec {
                match verify::verify_commit(self.runner.as_ref(), cancel, spec).await {
                    Ok(check) if !check.matched => {
                        tracing::warn!(task = %task.number, detail = %check.detail, "commit spec not satisfied");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(task = %task.number, error = %e, "commit verification unavailable");
                    }
                }
            }

            // 6. QC review.
            let review = match self
                .qc
                .review_task(cancel, &attempt_task, &invocation.output, &verifications)
                .await
            {
                Ok(review) => review,
                Err(QcError::Cancelled) => {
                    result.status = TaskStatus::Failed;
                    result.error = Some(CANCELLED_MESSAGE.to_string());
                    break;
                }
                Err(e) => {
                    result.status = TaskStatus::Failed;
                    result.error = Some(format!("QC review failed: {e}"));
                    break;
                }
            };

            result.qc_verdict = Some(review.verdict);
            result.qc_feedback = review.feedback.clone();
            self.record_execution(task, attempt, Some(&review), None, start)
                .await;

            match review.verdict {
                Verdict::Green => {
                    result.status = TaskStatus::Green;
                    break;
                }
                Verdict::Yellow => {
                    result.status = TaskStatus::Yellow;
                    break;
                }
                Verdict::Red => {
                    result.status = TaskStatus::Red;

                    if !self.qc.should_retry(&review, attempt) {
                        break;
                    }

                    // A PLAN- or ENV-level error forces escalation even
                    // when retries remain.
                    let detected = metadata.detected_errors();
                    let level = if detected.is_empty() {
                        self.classifier.classify(cancel, &review.feedback).await
                    } else {
                        self.classifier.classify_all(cancel, &detected).await
                    };
                    if !level.is_agent_fixable() {
                        tracing::warn!(
                            task = %task.number,
                            level = ?level,
                            "error level is not agent-fixable, escalating instead of retrying"
                        );
                        break;
                    }

                    tracing::info!(
                        task = %task.number,
                        attempt = attempt,
                        "QC rejected, retrying with feedback"
                    );
                    prompt = append_feedback(&prompt, attempt, &review.feedback);
                    attempt += 1;
                }
            }
        }

        self.finish(cancel, task, &mut metadata, &mut result, start).await;
        result
    }

    /// Post-task hooks and bookkeeping, shared by every exit path.
    async fn finish(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        metadata: &mut Metadata,
        result: &mut TaskResult,
        start: Instant,
    ) {
        if let Some(rollback) = &self.rollback {
            let success = result.status.is_success();
            if let Err(e) = rollback
                .post_task(
                    cancel,
                    &task.number,
                    metadata,
                    result.status,
                    result.attempts,
                    self.qc.max_retries(),
                    success,
                )
                .await
            {
                tracing::warn!(task = %task.number, error = %e, "rollback post-hook failed");
            }
        }

        result.duration = start.elapsed();
        tracing::info!(
            task = %task.number,
            status = %result.status,
            attempts = result.attempts,
            duration_secs = result.duration.as_secs_f64(),
            "task finished"
        );
    }

    async fn record_execution(
        &self,
        task: &Task,
        attempt: u32,
        review: Option<&QcReview>,
        error: Option<&str>,
        start: Instant,
    ) {
        let Some(store) = &self.store else {
            return;
        };

        let execution = TaskExecution {
            plan_file: task.source_file.clone(),
            task_number: task.number.clone(),
            attempt,
            agent: task.agent.clone(),
            success: review.map(|r| r.verdict != Verdict::Red).unwrap_or(false),
            verdict: review.map(|r| r.verdict),
            feedback: review.map(|r| r.feedback.clone()).unwrap_or_default(),
            error: error.map(str::to_owned),
            duration: start.elapsed(),
            recorded_at: chrono::Utc::now(),
        };

        if let Err(e) = store.record_execution(execution).await {
            tracing::warn!(task = %task.number, error = %e, "failed to record execution history");
        }
    }
}

/// Append QC feedback to the prompt for the next attempt.
fn append_feedback(prompt: &str, attempt: u32, feedback: &str) -> String {
    format!(
        "{prompt}\n\n## QC FEEDBACK FROM ATTEMPT {attempt}\nThe previous attempt was rejected. Address the following before anything else:\n{feedback}"
    )
}
