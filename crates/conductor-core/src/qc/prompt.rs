//! Review-prompt construction.
//!
//! The prompt walks the QC agent through the task, its criteria (0-indexed,
//! integration criteria continuing the numbering), guidance, test commands,
//! the raw agent output, and any history / behavioral / error context, then
//! pins the response to the JSON schema.

use std::fmt::Write as _;

use crate::model::{CriterionOutcome, Task};
use crate::store::{SessionMetrics, TaskExecution};

/// Everything the prompt builder needs.
///
/// `history` is `None` when no learning store is attached (the section is
/// omitted entirely); `Some(&[])` renders the header with "No previous
/// attempts found".
pub struct PromptContext<'a> {
    pub task: &'a Task,
    pub agent_output: &'a str,
    pub verifications: &'a [CriterionOutcome],
    pub history: Option<&'a [TaskExecution]>,
    pub metrics: Option<&'a SessionMetrics>,
    pub detected_errors: &'a [String],
}

/// Build the structured review prompt for a task.
pub fn build_structured_review_prompt(ctx: &PromptContext) -> String {
    let task = ctx.task;
    let mut prompt = String::new();

    writeln!(prompt, "# QC Review: {}", task.name).unwrap();
    writeln!(prompt).unwrap();
    writeln!(prompt, "## TASK PROMPT").unwrap();
    writeln!(prompt, "{}", task.prompt).unwrap();

    let mut index = 0usize;
    if !task.success_criteria.is_empty() {
        writeln!(prompt).unwrap();
        writeln!(prompt, "## SUCCESS CRITERIA").unwrap();
        for criterion in &task.success_criteria {
            writeln!(prompt, "{index}. [ ] {criterion}").unwrap();
            index += 1;
        }
    }

    if task.task_type == "integration" && !task.integration_criteria.is_empty() {
        writeln!(prompt).unwrap();
        writeln!(prompt, "## INTEGRATION CRITERIA").unwrap();
        for criterion in &task.integration_criteria {
            writeln!(prompt, "{index}. [ ] {criterion}").unwrap();
            index += 1;
        }
    }
    let total_criteria = index;

    if !task.key_points.is_empty() {
        writeln!(prompt).unwrap();
        writeln!(prompt, "## KEY POINTS (GUIDANCE - NOT SCORED)").unwrap();
        for point in &task.key_points {
            writeln!(prompt, "- {point}").unwrap();
        }
        if task.key_points.len() > total_criteria {
            tracing::warn!(
                task = %task.number,
                key_points = task.key_points.len(),
                criteria = total_criteria,
                "task has more key points than criteria"
            );
            writeln!(
                prompt,
                "WARNING: this task lists more key points ({}) than scored criteria ({}).",
                task.key_points.len(),
                total_criteria
            )
            .unwrap();
        }
    }

    if !task.test_commands.is_empty() {
        writeln!(prompt).unwrap();
        writeln!(prompt, "## TEST COMMANDS").unwrap();
        for command in &task.test_commands {
            writeln!(prompt, "{command}").unwrap();
        }
    }

    if !ctx.verifications.is_empty() {
        writeln!(prompt).unwrap();
        writeln!(prompt, "## CRITERION VERIFICATION RESULTS").unwrap();
        for outcome in ctx.verifications {
            let status = if outcome.passed { "PASS" } else { "FAIL" };
            write!(prompt, "{}. [{status}] {}", outcome.index, outcome.criterion).unwrap();
            if let Some(error) = &outcome.error {
                write!(prompt, " -- {error}").unwrap();
            } else if !outcome.passed && !outcome.output.is_empty() {
                write!(prompt, " -- output: {}", outcome.output.trim()).unwrap();
            }
            writeln!(prompt).unwrap();
        }
    }

    writeln!(prompt).unwrap();
    writeln!(prompt, "## AGENT OUTPUT").unwrap();
    writeln!(prompt, "{}", ctx.agent_output).unwrap();

    if let Some(history) = ctx.history {
        writeln!(prompt).unwrap();
        writeln!(prompt, "=== Historical Attempts ===").unwrap();
        if history.is_empty() {
            writeln!(prompt, "No previous attempts found").unwrap();
        } else {
            for execution in history {
                let verdict = execution
                    .verdict
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "-".to_string());
                write!(
                    prompt,
                    "- attempt {}: success={} verdict={verdict}",
                    execution.attempt, execution.success
                )
                .unwrap();
                if !execution.feedback.is_empty() {
                    write!(prompt, " feedback: {}", snippet(&execution.feedback, 200)).unwrap();
                }
                if let Some(error) = &execution.error {
                    write!(prompt, " error: {}", snippet(error, 200)).unwrap();
                }
                writeln!(prompt).unwrap();
            }
        }
    }

    if let Some(metrics) = ctx.metrics {
        writeln!(prompt).unwrap();
        writeln!(prompt, "## BEHAVIORAL CONTEXT").unwrap();
        writeln!(
            prompt,
            "Sessions: {}, total cost: ${:.2}",
            metrics.session_count, metrics.total_cost_usd
        )
        .unwrap();
        if !metrics.tool_usage.is_empty() {
            let usage: Vec<String> = metrics
                .tool_usage
                .iter()
                .map(|(tool, count)| format!("{tool}={count}"))
                .collect();
            writeln!(prompt, "Tool usage: {}", usage.join(", ")).unwrap();
        }
        for anomaly in &metrics.anomalies {
            writeln!(prompt, "Anomaly: {anomaly}").unwrap();
        }
    }

    if !ctx.detected_errors.is_empty() {
        writeln!(prompt).unwrap();
        writeln!(prompt, "## DETECTED ERRORS").unwrap();
        for error in ctx.detected_errors {
            writeln!(prompt, "- {error}").unwrap();
        }
    }

    writeln!(prompt).unwrap();
    writeln!(prompt, "{}", json_schema_instruction(total_criteria)).unwrap();

    prompt
}

fn json_schema_instruction(total_criteria: usize) -> String {
    let mut s = String::from(
        "Respond with a single JSON object and nothing else:\n\
         {\n\
         \x20 \"verdict\": \"GREEN\" | \"YELLOW\" | \"RED\",\n\
         \x20 \"feedback\": \"<summary of your assessment>\",\n\
         \x20 \"issues\": [{\"severity\": \"...\", \"description\": \"...\", \"location\": \"...\"}],\n\
         \x20 \"recommendations\": [\"...\"],\n\
         \x20 \"should_retry\": true | false,\n\
         \x20 \"suggested_agent\": \"<agent name or empty string>\",\n\
         \x20 \"criteria_results\": [{\"index\": 0, \"passed\": true, \"evidence\": \"...\", \"fail_reason\": \"...\"}]\n\
         }",
    );
    if total_criteria > 0 {
        s.push_str(&format!(
            "\ncriteria_results must contain one entry for every criterion index 0..{}.",
            total_criteria - 1
        ));
    }
    s
}

fn snippet(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    let truncated: String = s.chars().take(max_chars).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_task() -> Task {
        Task {
            number: "3".to_string(),
            name: "Fix bug".to_string(),
            prompt: "Fix the race in the cache".to_string(),
            success_criteria: vec!["tests pass".to_string(), "no data race".to_string()],
            ..Task::default()
        }
    }

    fn ctx<'a>(task: &'a Task, output: &'a str) -> PromptContext<'a> {
        PromptContext {
            task,
            agent_output: output,
            verifications: &[],
            history: None,
            metrics: None,
            detected_errors: &[],
        }
    }

    #[test]
    fn criteria_are_zero_indexed() {
        let task = base_task();
        let prompt = build_structured_review_prompt(&ctx(&task, "done"));
        assert!(prompt.contains("0. [ ] tests pass"));
        assert!(prompt.contains("1. [ ] no data race"));
    }

    #[test]
    fn integration_criteria_continue_the_index() {
        let mut task = base_task();
        task.task_type = "integration".to_string();
        task.integration_criteria = vec!["end-to-end flow works".to_string()];

        let prompt = build_structured_review_prompt(&ctx(&task, "done"));
        assert!(prompt.contains("## INTEGRATION CRITERIA"));
        assert!(prompt.contains("2. [ ] end-to-end flow works"));
    }

    #[test]
    fn integration_criteria_omitted_for_regular_tasks() {
        let mut task = base_task();
        task.integration_criteria = vec!["should not appear".to_string()];

        let prompt = build_structured_review_prompt(&ctx(&task, "done"));
        assert!(!prompt.contains("INTEGRATION CRITERIA"));
        assert!(!prompt.contains("should not appear"));
    }

    #[test]
    fn excess_key_points_produce_a_warning() {
        let mut task = base_task();
        task.key_points = vec!["a".into(), "b".into(), "c".into()];

        let prompt = build_structured_review_prompt(&ctx(&task, "done"));
        assert!(prompt.contains("KEY POINTS (GUIDANCE - NOT SCORED)"));
        assert!(prompt.contains("WARNING: this task lists more key points (3) than scored criteria (2)"));
    }

    #[test]
    fn history_section_states_when_empty() {
        let task = base_task();
        let mut c = ctx(&task, "done");
        let empty: Vec<TaskExecution> = Vec::new();
        c.history = Some(&empty);

        let prompt = build_structured_review_prompt(&c);
        assert!(prompt.contains("=== Historical Attempts ==="));
        assert!(prompt.contains("No previous attempts found"));
    }

    #[test]
    fn no_history_section_without_store() {
        let task = base_task();
        let prompt = build_structured_review_prompt(&ctx(&task, "done"));
        assert!(!prompt.contains("Historical Attempts"));
    }

    #[test]
    fn detected_errors_render_their_section() {
        let task = base_task();
        let errors = vec!["panic at cache.go:10".to_string()];
        let mut c = ctx(&task, "done");
        c.detected_errors = &errors;

        let prompt = build_structured_review_prompt(&c);
        assert!(prompt.contains("## DETECTED ERRORS"));
        assert!(prompt.contains("panic at cache.go:10"));
    }

    #[test]
    fn schema_instruction_pins_criteria_range() {
        let task = base_task();
        let prompt = build_structured_review_prompt(&ctx(&task, "done"));
        assert!(prompt.contains("\"verdict\": \"GREEN\" | \"YELLOW\" | \"RED\""));
        assert!(prompt.contains("every criterion index 0..1"));
    }

    #[test]
    fn agent_output_and_test_commands_are_verbatim() {
        let mut task = base_task();
        task.test_commands = vec!["go test ./...".to_string()];

        let prompt = build_structured_review_prompt(&ctx(&task, "raw agent transcript"));
        assert!(prompt.contains("## TEST COMMANDS\ngo test ./..."));
        assert!(prompt.contains("## AGENT OUTPUT\nraw agent transcript"));
    }
}
