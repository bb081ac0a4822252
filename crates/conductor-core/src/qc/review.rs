//! Verdict aggregation.
//!
//! Single agent: the verdict is recomputed from the per-criterion results
//! whenever the task has criteria. Multi-agent: criteria consensus
//! (unanimous among reporters, every criterion needs a reporter) when the
//! task has criteria, strictest-wins otherwise.

use crate::model::{Task, Verdict};

use super::{
    CriterionResult, QcResponse, QcReview, STRATEGY_CRITERIA_CONSENSUS, STRATEGY_SINGLE,
    STRATEGY_STRICTEST_WINS,
};

/// Aggregate a single agent's response.
pub(crate) fn aggregate_single(task: &Task, response: QcResponse) -> QcReview {
    let scored = task.scored_criteria();

    let (verdict, feedback) = if scored.is_empty() {
        // No criteria: the agent's own verdict stands.
        (response.verdict, response.feedback)
    } else if response.criteria_results.is_empty() {
        let mut feedback = response.feedback;
        if !feedback.is_empty() {
            feedback.push('\n');
        }
        feedback.push_str(
            "QC response omitted criteria_results for a task with criteria; downgraded to YELLOW",
        );
        (Verdict::Yellow, feedback)
    } else {
        let all_passed = response.criteria_results.iter().all(|c| c.passed);
        let verdict = if all_passed { Verdict::Green } else { Verdict::Red };
        (verdict, response.feedback)
    };

    QcReview {
        verdict,
        feedback,
        issues: response.issues,
        recommendations: response.recommendations,
        should_retry: verdict == Verdict::Red,
        suggested_agent: response.suggested_agent,
        criteria_results: response.criteria_results,
        strategy: STRATEGY_SINGLE,
        agent_count: 1,
    }
}

/// Aggregate a panel of agent responses.
pub(crate) fn aggregate_multi(task: &Task, responses: Vec<(String, QcResponse)>) -> QcReview {
    let scored = task.scored_criteria();
    let agent_count = responses.len();

    let feedback = responses
        .iter()
        .filter(|(_, r)| !r.feedback.is_empty())
        .map(|(agent, r)| format!("[{agent}] {}", r.feedback))
        .collect::<Vec<_>>()
        .join("\n");

    let issues = responses
        .iter()
        .flat_map(|(_, r)| r.issues.iter().cloned())
        .collect();
    let recommendations = responses
        .iter()
        .flat_map(|(_, r)| r.recommendations.iter().cloned())
        .collect();
    let suggested_agent = responses
        .iter()
        .map(|(_, r)| r.suggested_agent.as_str())
        .find(|s| !s.is_empty())
        .unwrap_or("")
        .to_string();

    let (verdict, criteria_results, strategy) = if scored.is_empty() {
        // Strictest-wins over the fixed severity lattice.
        let verdict = responses
            .iter()
            .map(|(_, r)| r.verdict)
            .max_by_key(|v| v.severity())
            .unwrap_or(Verdict::Red);
        (verdict, Vec::new(), STRATEGY_STRICTEST_WINS)
    } else {
        // Criteria consensus: a criterion passes iff every agent that
        // reported it reported passed; an unreported criterion fails the
        // whole review.
        let mut merged = Vec::with_capacity(scored.len());
        let mut all_pass = true;

        for index in 0..scored.len() {
            let reporters: Vec<&CriterionResult> = responses
                .iter()
                .flat_map(|(_, r)| r.criteria_results.iter())
                .filter(|c| c.index == index)
                .collect();

            if reporters.is_empty() {
                all_pass = false;
                merged.push(CriterionResult {
                    index,
                    passed: false,
                    evidence: None,
                    fail_reason: Some("no agent reported this criterion".to_string()),
                });
                continue;
            }

            let passed = reporters.iter().all(|c| c.passed);
            if !passed {
                all_pass = false;
            }
            merged.push(CriterionResult {
                index,
                passed,
                evidence: reporters.iter().find_map(|c| c.evidence.clone()),
                fail_reason: reporters.iter().find_map(|c| c.fail_reason.clone()),
            });
        }

        let verdict = if all_pass { Verdict::Green } else { Verdict::Red };
        (verdict, merged, STRATEGY_CRITERIA_CONSENSUS)
    };

    QcReview {
        verdict,
        feedback,
        issues,
        recommendations,
        should_retry: verdict == Verdict::Red,
        suggested_agent,
        criteria_results,
        strategy,
        agent_count,
    }
}
