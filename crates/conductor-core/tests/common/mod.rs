//! Shared fakes for integration tests: a scripted command runner, a
//! scripted agent invoker, and a scripted QC agent.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use conductor_core::command::{CommandError, CommandRunner};
use conductor_core::invoke::{AgentInvoker, InvocationResult, InvokeError, QcAgent};
use conductor_core::model::Task;

/// A rule matched against commands by prefix, yielding queued responses.
/// The last response repeats once the queue drains.
struct Rule {
    prefix: String,
    responses: VecDeque<Result<String, i32>>,
    last: Result<String, i32>,
}

/// [`CommandRunner`] that records every command and answers from scripted
/// prefix rules. Unmatched commands succeed with empty output.
pub struct ScriptedRunner {
    working_dir: PathBuf,
    commands: Mutex<Vec<String>>,
    rules: Mutex<Vec<Rule>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self {
            working_dir: std::env::temp_dir(),
            commands: Mutex::new(Vec::new()),
            rules: Mutex::new(Vec::new()),
        }
    }

    /// Queue a successful response for commands starting with `prefix`.
    pub fn respond(self, prefix: &str, output: &str) -> Self {
        self.push_rule(prefix, Ok(output.to_string()));
        self
    }

    /// Queue a failing response (non-zero exit) for commands starting with
    /// `prefix`.
    pub fn fail(self, prefix: &str, code: i32) -> Self {
        self.push_rule(prefix, Err(code));
        self
    }

    fn push_rule(&self, prefix: &str, response: Result<String, i32>) {
        let mut rules = self.rules.lock().unwrap();
        if let Some(rule) = rules.iter_mut().find(|r| r.prefix == prefix) {
            rule.responses.push_back(response.clone());
            rule.last = response;
        } else {
            rules.push(Rule {
                prefix: prefix.to_string(),
                responses: VecDeque::from([response.clone()]),
                last: response,
            });
        }
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    /// How many commands started with `prefix`.
    pub fn count_with_prefix(&self, prefix: &str) -> usize {
        self.commands()
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, cancel: &CancellationToken, command: &str) -> Result<String, CommandError> {
        self.commands.lock().unwrap().push(command.to_string());

        if cancel.is_cancelled() {
            return Err(CommandError::Cancelled {
                command: command.to_string(),
            });
        }

        let response = {
            let mut rules = self.rules.lock().unwrap();
            match rules.iter_mut().find(|r| command.starts_with(&r.prefix)) {
                Some(rule) => rule.responses.pop_front().unwrap_or_else(|| rule.last.clone()),
                None => Ok(String::new()),
            }
        };

        match response {
            Ok(output) => Ok(output),
            Err(code) => Err(CommandError::Exit {
                command: command.to_string(),
                code: Some(code),
                output: String::new(),
            }),
        }
    }

    fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}

/// [`AgentInvoker`] answering from a queue of scripted outcomes and
/// recording every prompt it receives.
pub struct ScriptedInvoker {
    outcomes: Mutex<VecDeque<Result<String, InvokeError>>>,
    prompts: Mutex<Vec<String>>,
    invoked_numbers: Mutex<Vec<String>>,
}

impl ScriptedInvoker {
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
            invoked_numbers: Mutex::new(Vec::new()),
        }
    }

    pub fn succeed(self, output: &str) -> Self {
        self.outcomes
            .lock()
            .unwrap()
            .push_back(Ok(output.to_string()));
        self
    }

    pub fn fail_with(self, error: InvokeError) -> Self {
        self.outcomes.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn invoked_numbers(&self) -> Vec<String> {
        self.invoked_numbers.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentInvoker for ScriptedInvoker {
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        task: &Task,
    ) -> Result<InvocationResult, InvokeError> {
        if cancel.is_cancelled() {
            return Err(InvokeError::Cancelled);
        }
        self.prompts.lock().unwrap().push(task.prompt.clone());
        self.invoked_numbers
            .lock()
            .unwrap()
            .push(task.number.clone());

        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok("done".to_string()));

        outcome.map(|output| InvocationResult {
            output,
            exit_code: 0,
            duration: Duration::from_millis(5),
        })
    }
}

/// [`QcAgent`] answering from a queue of raw JSON replies. The last reply
/// repeats once the queue drains.
pub struct ScriptedQcAgent {
    name: String,
    replies: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedQcAgent {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            replies: Mutex::new(VecDeque::new()),
            last: Mutex::new(green_reply("ok")),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, raw: &str) -> Self {
        self.replies.lock().unwrap().push_back(raw.to_string());
        *self.last.lock().unwrap() = raw.to_string();
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl QcAgent for ScriptedQcAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn review(&self, cancel: &CancellationToken, prompt: &str) -> anyhow::Result<String> {
        if cancel.is_cancelled() {
            anyhow::bail!("review cancelled");
        }
        self.prompts.lock().unwrap().push(prompt.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.last.lock().unwrap().clone());
        Ok(reply)
    }
}

/// A GREEN QC reply with no criteria results.
pub fn green_reply(feedback: &str) -> String {
    serde_json::json!({
        "verdict": "GREEN",
        "feedback": feedback,
        "issues": [],
        "recommendations": [],
        "should_retry": false,
        "suggested_agent": "",
        "criteria_results": [],
    })
    .to_string()
}

/// A RED QC reply with no criteria results.
pub fn red_reply(feedback: &str) -> String {
    serde_json::json!({
        "verdict": "RED",
        "feedback": feedback,
        "issues": [],
        "recommendations": [],
        "should_retry": true,
        "suggested_agent": "",
        "criteria_results": [],
    })
    .to_string()
}

/// A QC reply carrying explicit criteria results.
pub fn criteria_reply(verdict: &str, criteria: &[(usize, bool)]) -> String {
    let results: Vec<serde_json::Value> = criteria
        .iter()
        .map(|(index, passed)| serde_json::json!({"index": index, "passed": passed}))
        .collect();
    serde_json::json!({
        "verdict": verdict,
        "feedback": "criteria reviewed",
        "issues": [],
        "recommendations": [],
        "should_retry": verdict == "RED",
        "suggested_agent": "",
        "criteria_results": results,
    })
    .to_string()
}
