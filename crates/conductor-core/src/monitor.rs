//! Per-wave anomaly monitor: tracks consecutive failures, error rate, and
//! duration outliers as results arrive.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::{AnomalyKind, Severity, TaskResult, WaveAnomaly};

/// Detection thresholds.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Consecutive failures before an anomaly is emitted.
    pub consecutive_failure_threshold: u32,
    /// Error-rate ceiling, checked once a wave has at least
    /// [`MIN_SAMPLES_FOR_RATE`] results.
    pub error_rate_threshold: f64,
    /// Duration / estimate ratio at which a task is an outlier.
    pub duration_deviation_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            consecutive_failure_threshold: 3,
            error_rate_threshold: 0.5,
            duration_deviation_threshold: 2.0,
        }
    }
}

/// Minimum results before the error rate is meaningful.
const MIN_SAMPLES_FOR_RATE: u64 = 3;

#[derive(Debug, Default, Clone)]
struct WaveStats {
    total: u64,
    failures: u64,
    consecutive: u32,
}

impl WaveStats {
    fn error_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.failures as f64 / self.total as f64
    }
}

/// Tracks health per wave. Safe for concurrent recording.
#[derive(Debug, Default)]
pub struct AnomalyMonitor {
    config: MonitorConfig,
    waves: Mutex<HashMap<String, WaveStats>>,
}

impl AnomalyMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            config,
            waves: Mutex::new(HashMap::new()),
        }
    }

    /// Record a task result and return any anomalies it triggers.
    pub fn record_result(&self, wave_name: &str, result: &TaskResult) -> Vec<WaveAnomaly> {
        let mut waves = self.waves.lock().unwrap_or_else(|e| e.into_inner());
        let stats = waves.entry(wave_name.to_string()).or_default();

        let mut anomalies = Vec::new();

        stats.total += 1;
        if result.is_failure() {
            stats.failures += 1;
            stats.consecutive += 1;

            if stats.consecutive >= self.config.consecutive_failure_threshold {
                anomalies.push(WaveAnomaly {
                    kind: AnomalyKind::ConsecutiveFailures,
                    severity: consecutive_severity(
                        stats.consecutive,
                        self.config.consecutive_failure_threshold,
                    ),
                    description: format!(
                        "{} consecutive failures in {wave_name}",
                        stats.consecutive
                    ),
                    task_number: Some(result.task_number.clone()),
                    wave_name: wave_name.to_string(),
                });
            }
        } else {
            stats.consecutive = 0;
        }

        if stats.total >= MIN_SAMPLES_FOR_RATE
            && stats.error_rate() > self.config.error_rate_threshold
        {
            let rate = stats.error_rate();
            anomalies.push(WaveAnomaly {
                kind: AnomalyKind::HighErrorRate,
                severity: rate_severity(rate),
                description: format!(
                    "error rate {:.0}% across {} tasks in {wave_name}",
                    rate * 100.0,
                    stats.total
                ),
                task_number: None,
                wave_name: wave_name.to_string(),
            });
        }

        if let Some(estimate) = result.estimated_time {
            let actual = result.duration;
            if estimate.as_secs_f64() > 0.0 && actual.as_secs_f64() > 0.0 {
                let ratio = actual.as_secs_f64() / estimate.as_secs_f64();
                if ratio >= self.config.duration_deviation_threshold {
                    anomalies.push(WaveAnomaly {
                        kind: AnomalyKind::DurationOutlier,
                        severity: ratio_severity(ratio, self.config.duration_deviation_threshold),
                        description: format!(
                            "task {} took {:.1}x its estimate ({:.1}s vs {:.1}s)",
                            result.task_number,
                            ratio,
                            actual.as_secs_f64(),
                            estimate.as_secs_f64()
                        ),
                        task_number: Some(result.task_number.clone()),
                        wave_name: wave_name.to_string(),
                    });
                }
            }
        }

        anomalies
    }

    /// Re-derive a wave's standing anomalies from its accumulated stats.
    /// Healthy iff the dry re-scan emits nothing.
    pub fn check_wave_health(&self, wave_name: &str) -> (bool, Vec<WaveAnomaly>) {
        let waves = self.waves.lock().unwrap_or_else(|e| e.into_inner());
        let Some(stats) = waves.get(wave_name) else {
            return (true, Vec::new());
        };

        let mut anomalies = Vec::new();

        if stats.consecutive >= self.config.consecutive_failure_threshold {
            anomalies.push(WaveAnomaly {
                kind: AnomalyKind::ConsecutiveFailures,
                severity: consecutive_severity(
                    stats.consecutive,
                    self.config.consecutive_failure_threshold,
                ),
                description: format!(
                    "{} consecutive failures in {wave_name}",
                    stats.consecutive
                ),
                task_number: None,
                wave_name: wave_name.to_string(),
            });
        }

        if stats.total >= MIN_SAMPLES_FOR_RATE
            && stats.error_rate() > self.config.error_rate_threshold
        {
            let rate = stats.error_rate();
            anomalies.push(WaveAnomaly {
                kind: AnomalyKind::HighErrorRate,
                severity: rate_severity(rate),
                description: format!(
                    "error rate {:.0}% across {} tasks in {wave_name}",
                    rate * 100.0,
                    stats.total
                ),
                task_number: None,
                wave_name: wave_name.to_string(),
            });
        }

        (anomalies.is_empty(), anomalies)
    }
}

fn consecutive_severity(consecutive: u32, threshold: u32) -> Severity {
    if consecutive == threshold {
        Severity::Low
    } else if consecutive == threshold + 1 {
        Severity::Medium
    } else {
        Severity::High
    }
}

fn rate_severity(rate: f64) -> Severity {
    if rate >= 0.8 {
        Severity::High
    } else if rate >= 0.65 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

fn ratio_severity(ratio: f64, threshold: f64) -> Severity {
    if ratio >= threshold * 2.0 {
        Severity::High
    } else if ratio >= threshold * 1.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}
