//! Execution-history store contract.
//!
//! The engine only ever talks to persistence through [`LearningStore`]; the
//! concrete backend (database, JSONL ingest, ...) lives outside this crate.
//! [`MemoryStore`] is the in-process reference implementation used by tests
//! and the default CLI wiring.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::model::Verdict;

/// One recorded task execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecution {
    pub plan_file: String,
    pub task_number: String,
    pub attempt: u32,
    pub agent: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<Verdict>,
    #[serde(default)]
    pub feedback: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

/// Aggregated behavioral-session metrics keyed by an external session id.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub external_id: String,
    #[serde(default)]
    pub session_count: u64,
    #[serde(default)]
    pub total_cost_usd: f64,
    /// Tool name -> invocation count.
    #[serde(default)]
    pub tool_usage: BTreeMap<String, u64>,
    #[serde(default)]
    pub anomalies: Vec<String>,
}

/// Append-log store for execution history and session metrics.
///
/// Implementations must be safe for concurrent use; readers see a
/// consistent snapshot but need not observe in-flight writes.
#[async_trait]
pub trait LearningStore: Send + Sync {
    async fn record_execution(&self, execution: TaskExecution) -> anyhow::Result<()>;

    /// Past executions for a (plan file, task number) key, oldest first.
    async fn get_history(
        &self,
        plan_file: &str,
        task_number: &str,
    ) -> anyhow::Result<Vec<TaskExecution>>;

    async fn get_session_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<SessionMetrics>>;

    async fn record_session_metrics(&self, metrics: SessionMetrics) -> anyhow::Result<()>;
}

// Compile-time assertion: LearningStore must be object-safe.
const _: () = {
    fn _assert_object_safe(_: &dyn LearningStore) {}
};

/// In-memory [`LearningStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryStoreInner>,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    executions: Vec<TaskExecution>,
    sessions: BTreeMap<String, SessionMetrics>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LearningStore for MemoryStore {
    async fn record_execution(&self, execution: TaskExecution) -> anyhow::Result<()> {
        self.inner.write().await.executions.push(execution);
        Ok(())
    }

    async fn get_history(
        &self,
        plan_file: &str,
        task_number: &str,
    ) -> anyhow::Result<Vec<TaskExecution>> {
        let inner = self.inner.read().await;
        Ok(inner
            .executions
            .iter()
            .filter(|e| e.plan_file == plan_file && e.task_number == task_number)
            .cloned()
            .collect())
    }

    async fn get_session_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<SessionMetrics>> {
        Ok(self.inner.read().await.sessions.get(external_id).cloned())
    }

    async fn record_session_metrics(&self, metrics: SessionMetrics) -> anyhow::Result<()> {
        self.inner
            .write()
            .await
            .sessions
            .insert(metrics.external_id.clone(), metrics);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(plan: &str, number: &str, attempt: u32) -> TaskExecution {
        TaskExecution {
            plan_file: plan.to_string(),
            task_number: number.to_string(),
            attempt,
            agent: "implementer".to_string(),
            success: attempt > 0,
            verdict: Some(if attempt > 0 { Verdict::Green } else { Verdict::Red }),
            feedback: String::new(),
            error: None,
            duration: Duration::from_secs(1),
            recorded_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn history_is_keyed_by_plan_and_task() {
        let store = MemoryStore::new();
        store.record_execution(execution("a.md", "1", 0)).await.unwrap();
        store.record_execution(execution("a.md", "1", 1)).await.unwrap();
        store.record_execution(execution("a.md", "2", 0)).await.unwrap();
        store.record_execution(execution("b.md", "1", 0)).await.unwrap();

        let history = store.get_history("a.md", "1").await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].attempt, 0, "oldest first");
        assert_eq!(history[1].attempt, 1);

        assert!(store.get_history("c.md", "1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn session_metrics_round_trip() {
        let store = MemoryStore::new();
        assert!(store
            .get_session_by_external_id("sess-1")
            .await
            .unwrap()
            .is_none());

        let mut metrics = SessionMetrics {
            external_id: "sess-1".to_string(),
            session_count: 3,
            total_cost_usd: 1.25,
            ..SessionMetrics::default()
        };
        metrics.tool_usage.insert("bash".to_string(), 12);
        store.record_session_metrics(metrics).await.unwrap();

        let read = store
            .get_session_by_external_id("sess-1")
            .await
            .unwrap()
            .expect("metrics stored");
        assert_eq!(read.session_count, 3);
        assert_eq!(read.tool_usage["bash"], 12);
    }
}
