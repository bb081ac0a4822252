//! Wave/plan driver: runs the scheduled waves in order, fanning tasks out
//! up to each wave's concurrency bound and enforcing a strict barrier
//! between waves.
//!
//! Cancellation stops admission of new tasks; in-flight tasks drain through
//! their own cancellation handling and report FAILED results.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::executor::TaskExecutor;
use crate::hooks::{BranchGuard, BranchGuardError};
use crate::model::{Task, TaskResult, TaskStatus, WaveAnomaly};
use crate::monitor::AnomalyMonitor;
use crate::schedule::{
    calculate_waves_with, parse_dependency_ref, validate_registry_prerequisites, SchedulerError,
    SymbolRegistry, WaveOptions,
};

#[derive(Debug, Error)]
pub enum DriverError {
    /// Scheduling failed; nothing was executed.
    #[error(transparent)]
    Scheduling(#[from] SchedulerError),

    /// The branch guard refused to let the plan start.
    #[error(transparent)]
    BranchGuard(#[from] BranchGuardError),
}

/// Per-wave aggregate for the final report.
#[derive(Debug, Clone)]
pub struct WaveSummary {
    pub name: String,
    pub total: usize,
    pub green: usize,
    pub yellow: usize,
    pub red: usize,
    pub failed: usize,
    pub anomalies: Vec<WaveAnomaly>,
}

/// A failed task rendered as part of the error tree.
#[derive(Debug, Clone)]
pub struct TaskError {
    pub number: String,
    pub message: String,
    pub cause: Option<String>,
}

/// The outcome of driving a whole plan.
#[derive(Debug, Clone, Default)]
pub struct PlanReport {
    pub results: Vec<TaskResult>,
    pub waves: Vec<WaveSummary>,
    pub cancelled: bool,
}

impl PlanReport {
    pub fn all_green(&self) -> bool {
        !self.cancelled && self.results.iter().all(|r| r.status == TaskStatus::Green)
    }

    pub fn any_failure(&self) -> bool {
        self.cancelled || self.results.iter().any(|r| !r.is_success())
    }

    /// The failure chains for every non-accepted task.
    pub fn failures(&self) -> Vec<TaskError> {
        self.results
            .iter()
            .filter(|r| !r.is_success())
            .map(|r| TaskError {
                number: r.task_number.clone(),
                message: match r.status {
                    TaskStatus::Red => format!("QC rejected after {} attempts", r.attempts),
                    _ => r
                        .error
                        .clone()
                        .unwrap_or_else(|| "task failed".to_string()),
                },
                cause: match r.status {
                    TaskStatus::Red if !r.qc_feedback.is_empty() => {
                        Some(first_line(&r.qc_feedback))
                    }
                    _ => r.error.as_deref().map(first_line),
                },
            })
            .collect()
    }

    /// Render the error tree shown after a failed run.
    pub fn render_failures(&self) -> String {
        let mut out = String::new();
        for failure in self.failures() {
            out.push_str(&format!("task {}: {}\n", failure.number, failure.message));
            if let Some(cause) = &failure.cause {
                out.push_str(&format!("  caused by: {cause}\n"));
            }
        }
        out
    }
}

/// The per-task status line: `[GREEN] 3/5 Fix bug (2 attempts, 12.3s)`.
pub fn status_line(result: &TaskResult, total: usize) -> String {
    format!(
        "[{}] {}/{} {} ({} attempts, {:.1}s)",
        result.status,
        result.task_number,
        total,
        result.task_name,
        result.attempts,
        result.duration.as_secs_f64()
    )
}

fn first_line(s: &str) -> String {
    s.lines().next().unwrap_or("").to_string()
}

/// Message carrying one finished task back to the wave loop.
struct TaskDone {
    result: TaskResult,
}

/// Drives a plan: scheduling, branch guard, wave fan-out, result
/// aggregation.
pub struct PlanDriver {
    executor: Arc<TaskExecutor>,
    monitor: Arc<AnomalyMonitor>,
    branch_guard: Option<Arc<BranchGuard>>,
    wave_options: WaveOptions,
    plan_name: String,
}

impl PlanDriver {
    pub fn new(executor: Arc<TaskExecutor>, monitor: Arc<AnomalyMonitor>, plan_name: impl Into<String>) -> Self {
        Self {
            executor,
            monitor,
            branch_guard: None,
            wave_options: WaveOptions::default(),
            plan_name: plan_name.into(),
        }
    }

    pub fn with_branch_guard(mut self, guard: Arc<BranchGuard>) -> Self {
        self.branch_guard = Some(guard);
        self
    }

    pub fn with_wave_options(mut self, options: WaveOptions) -> Self {
        self.wave_options = options;
        self
    }

    /// Run the whole plan.
    ///
    /// Scheduling errors abort before anything executes. The branch guard
    /// (when configured) runs once, before the first wave.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        tasks: &[Task],
        registry: Option<&SymbolRegistry>,
    ) -> Result<PlanReport, DriverError> {
        let waves = calculate_waves_with(tasks, &self.wave_options)?;
        validate_registry_prerequisites(tasks, registry)?;

        if let Some(guard) = &self.branch_guard {
            let outcome = guard.run(cancel, &self.plan_name).await?;
            if let Some(fork) = &outcome.forked_branch {
                tracing::info!(branch = %fork, "plan running on forked work branch");
            }
        }

        let tasks_by_number: HashMap<&str, &Task> =
            tasks.iter().map(|t| (t.number.as_str(), t)).collect();
        let total = tasks.len();

        let mut report = PlanReport::default();
        let mut finished: HashMap<String, TaskStatus> = HashMap::new();

        for wave in &waves {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            tracing::info!(
                wave = %wave.name,
                tasks = wave.task_numbers.len(),
                max_concurrency = wave.max_concurrency,
                "starting wave"
            );

            let semaphore = Arc::new(Semaphore::new(wave.max_concurrency.max(1)));
            let (tx, mut rx) = mpsc::channel::<TaskDone>(wave.task_numbers.len().max(1));
            let mut in_flight = 0usize;
            let mut wave_results: Vec<TaskResult> = Vec::new();

            for number in &wave.task_numbers {
                let Some(task) = tasks_by_number.get(number.as_str()) else {
                    continue;
                };

                if cancel.is_cancelled() {
                    // Stop admitting; already-spawned tasks drain below.
                    report.cancelled = true;
                    break;
                }

                // A task whose dependency did not succeed is skipped, with
                // the failed dependency as its cause.
                let failed_dep = task.depends_on.iter().find(|dep| {
                    let target = parse_dependency_ref(dep).target();
                    finished
                        .get(target)
                        .map(|status| !status.is_success())
                        .unwrap_or(false)
                });
                if let Some(dep) = failed_dep {
                    let target = parse_dependency_ref(dep).target();
                    let mut result = TaskResult::pending(task);
                    result.status = TaskStatus::Failed;
                    result.error = Some(format!("dependency task {target} did not succeed"));
                    tracing::warn!(
                        task = %task.number,
                        dependency = %target,
                        "skipping task, dependency did not succeed"
                    );
                    wave_results.push(result);
                    continue;
                }

                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };

                let executor = Arc::clone(&self.executor);
                let task = (*task).clone();
                let cancel = cancel.clone();
                let tx = tx.clone();
                in_flight += 1;

                tokio::spawn(async move {
                    let result = executor.execute(&cancel, &task).await;
                    drop(permit);
                    let _ = tx.send(TaskDone { result }).await;
                });
            }
            drop(tx);

            // Barrier: every spawned task must reach a terminal state
            // before the next wave starts.
            while in_flight > 0 {
                let Some(done) = rx.recv().await else {
                    break;
                };
                in_flight -= 1;
                wave_results.push(done.result);
            }

            let mut summary = WaveSummary {
                name: wave.name.clone(),
                total: wave_results.len(),
                green: 0,
                yellow: 0,
                red: 0,
                failed: 0,
                anomalies: Vec::new(),
            };

            for result in &wave_results {
                match result.status {
                    TaskStatus::Green => summary.green += 1,
                    TaskStatus::Yellow => summary.yellow += 1,
                    TaskStatus::Red => summary.red += 1,
                    TaskStatus::Failed => summary.failed += 1,
                }

                let anomalies = self.monitor.record_result(&wave.name, result);
                for anomaly in &anomalies {
                    tracing::warn!(
                        wave = %wave.name,
                        kind = %anomaly.kind,
                        severity = %anomaly.severity,
                        "{}", anomaly.description
                    );
                }
                summary.anomalies.extend(anomalies);

                tracing::info!("{}", status_line(result, total));
                finished.insert(result.task_number.clone(), result.status);
            }

            tracing::info!(
                wave = %wave.name,
                green = summary.green,
                yellow = summary.yellow,
                red = summary.red,
                failed = summary.failed,
                "wave complete"
            );

            report.results.extend(wave_results);
            report.waves.push(summary);
        }

        if cancel.is_cancelled() {
            report.cancelled = true;
        }

        Ok(report)
    }
}
