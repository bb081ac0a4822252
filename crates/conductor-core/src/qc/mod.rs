//! Quality Control: structured review of agent output by one or more QC
//! agents, with schema-enforced JSON responses and per-criterion
//! aggregation.
//!
//! Single-agent reviews recompute the verdict from the reported criterion
//! results; multi-agent reviews aggregate by criteria consensus (or
//! strictest-wins when the task has no criteria).

pub mod parse;
pub mod prompt;
mod review;

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::invoke::QcAgent;
use crate::model::{CriterionOutcome, Task, Verdict};
use crate::store::{LearningStore, SessionMetrics};

pub use parse::parse_qc_json;
pub use prompt::{build_structured_review_prompt, PromptContext};

/// Aggregation strategy labels reported on reviews.
pub const STRATEGY_SINGLE: &str = "single-agent";
pub const STRATEGY_CRITERIA_CONSENSUS: &str = "multi-agent-criteria-consensus";
pub const STRATEGY_STRICTEST_WINS: &str = "multi-agent-strictest-wins";

#[derive(Debug, Error)]
pub enum QcError {
    #[error("QC response is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("QC response is missing the verdict field")]
    MissingVerdict,

    #[error("no QC agents configured")]
    NoAgents,

    #[error("all QC agents failed: {0}")]
    AllAgentsFailed(String),

    #[error("QC agent {agent:?} failed: {message}")]
    AgentFailed { agent: String, message: String },

    #[error("QC review cancelled")]
    Cancelled,
}

/// An issue reported by a QC agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Per-criterion result inside a QC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CriterionResult {
    pub index: usize,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail_reason: Option<String>,
}

/// A parsed QC agent response (the JSON schema the agents must produce).
#[derive(Debug, Clone)]
pub struct QcResponse {
    pub verdict: Verdict,
    pub feedback: String,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub should_retry: bool,
    pub suggested_agent: String,
    pub criteria_results: Vec<CriterionResult>,
}

/// The aggregated outcome of a review.
#[derive(Debug, Clone)]
pub struct QcReview {
    pub verdict: Verdict,
    pub feedback: String,
    pub issues: Vec<Issue>,
    pub recommendations: Vec<String>,
    pub should_retry: bool,
    pub suggested_agent: String,
    pub criteria_results: Vec<CriterionResult>,
    /// Aggregation strategy label.
    pub strategy: &'static str,
    /// Number of agent responses that contributed.
    pub agent_count: usize,
}

/// QC agent-selection mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QcMode {
    /// The first configured agent reviews alone.
    #[default]
    Single,
    /// The explicitly listed agents review; one agent degenerates to single.
    Explicit,
    /// The controller picks; currently all configured agents.
    Auto,
    /// Mixed panel of all configured agents.
    Mixed,
}

impl FromStr for QcMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "" => Ok(QcMode::Single),
            "explicit" => Ok(QcMode::Explicit),
            "auto" => Ok(QcMode::Auto),
            "mixed" => Ok(QcMode::Mixed),
            other => Err(format!("invalid QC mode: {other:?}")),
        }
    }
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct QcConfig {
    pub mode: QcMode,
    pub max_retries: u32,
}

impl Default for QcConfig {
    fn default() -> Self {
        Self {
            mode: QcMode::Single,
            max_retries: 2,
        }
    }
}

/// Supplies behavioral-session metrics for the review prompt.
#[async_trait]
pub trait BehavioralMetricsProvider: Send + Sync {
    async fn metrics_for_task(&self, task: &Task) -> anyhow::Result<Option<SessionMetrics>>;
}

/// Orchestrates review prompts, agent fan-out, and verdict aggregation.
pub struct QualityController {
    agents: Vec<Arc<dyn QcAgent>>,
    config: QcConfig,
    store: Option<Arc<dyn LearningStore>>,
    metrics: Option<Arc<dyn BehavioralMetricsProvider>>,
}

impl QualityController {
    pub fn new(agents: Vec<Arc<dyn QcAgent>>, config: QcConfig) -> Self {
        Self {
            agents,
            config,
            store: None,
            metrics: None,
        }
    }

    /// Attach a learning store; its history feeds the review prompt.
    pub fn with_store(mut self, store: Arc<dyn LearningStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Attach a behavioral-metrics provider.
    pub fn with_metrics(mut self, metrics: Arc<dyn BehavioralMetricsProvider>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// Review a task's output, dispatching on the configured mode: single
    /// agent for [`QcMode::Single`] or an explicit panel of one, multi-agent
    /// otherwise.
    pub async fn review_task(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        agent_output: &str,
        verifications: &[CriterionOutcome],
    ) -> Result<QcReview, QcError> {
        let multi = match self.config.mode {
            QcMode::Single => false,
            QcMode::Explicit => self.agents.len() > 1,
            QcMode::Auto | QcMode::Mixed => self.agents.len() > 1,
        };

        if multi {
            self.review_multi_agent(cancel, task, agent_output, verifications)
                .await
        } else {
            self.review(cancel, task, agent_output, verifications).await
        }
    }

    /// Single-agent review with criterion-aware verdict recomputation.
    pub async fn review(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        agent_output: &str,
        verifications: &[CriterionOutcome],
    ) -> Result<QcReview, QcError> {
        let agent = self.agents.first().ok_or(QcError::NoAgents)?;
        let prompt = self.build_prompt(task, agent_output, verifications).await;

        if cancel.is_cancelled() {
            return Err(QcError::Cancelled);
        }

        let raw = agent
            .review(cancel, &prompt)
            .await
            .map_err(|e| QcError::AgentFailed {
                agent: agent.name().to_string(),
                message: e.to_string(),
            })?;
        let response = parse_qc_json(&raw)?;

        Ok(review::aggregate_single(task, response))
    }

    /// Multi-agent review: every configured agent gets the same prompt
    /// concurrently; verdicts are aggregated per criterion.
    pub async fn review_multi_agent(
        &self,
        cancel: &CancellationToken,
        task: &Task,
        agent_output: &str,
        verifications: &[CriterionOutcome],
    ) -> Result<QcReview, QcError> {
        if self.agents.is_empty() {
            return Err(QcError::NoAgents);
        }
        let prompt = self.build_prompt(task, agent_output, verifications).await;

        let (tx, mut rx) = mpsc::channel(self.agents.len());
        for agent in &self.agents {
            let agent = Arc::clone(agent);
            let tx = tx.clone();
            let prompt = prompt.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                let name = agent.name().to_string();
                let outcome = match agent.review(&cancel, &prompt).await {
                    Ok(raw) => parse_qc_json(&raw)
                        .map(|resp| (name.clone(), resp))
                        .map_err(|e| (name, e.to_string())),
                    Err(e) => Err((name, e.to_string())),
                };
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut responses = Vec::new();
        let mut failures = Vec::new();
        while let Some(outcome) = rx.recv().await {
            match outcome {
                Ok(entry) => responses.push(entry),
                Err((agent, message)) => {
                    tracing::warn!(agent = %agent, error = %message, "QC agent failed, skipping its verdict");
                    failures.push(format!("{agent}: {message}"));
                }
            }
        }

        if cancel.is_cancelled() {
            return Err(QcError::Cancelled);
        }
        if responses.is_empty() {
            return Err(QcError::AllAgentsFailed(failures.join("; ")));
        }

        // Deterministic aggregation regardless of completion order.
        responses.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(review::aggregate_multi(task, responses))
    }

    /// Retry gating: RED verdict with retries remaining.
    pub fn should_retry(&self, review: &QcReview, attempt: u32) -> bool {
        review.verdict == Verdict::Red && attempt < self.config.max_retries
    }

    async fn build_prompt(
        &self,
        task: &Task,
        agent_output: &str,
        verifications: &[CriterionOutcome],
    ) -> String {
        let history = match &self.store {
            Some(store) => match store.get_history(&task.source_file, &task.number).await {
                Ok(history) => Some(history),
                Err(e) => {
                    tracing::warn!(task = %task.number, error = %e, "failed to load QC history, omitting section");
                    Some(Vec::new())
                }
            },
            None => None,
        };

        let metrics = match &self.metrics {
            Some(provider) => match provider.metrics_for_task(task).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    tracing::warn!(task = %task.number, error = %e, "behavioral metrics unavailable");
                    None
                }
            },
            None => None,
        };

        let detected_errors = task.metadata.detected_errors();
        let ctx = PromptContext {
            task,
            agent_output,
            verifications,
            history: history.as_deref(),
            metrics: metrics.as_ref(),
            detected_errors: &detected_errors,
        };
        build_structured_review_prompt(&ctx)
    }
}
