//! Error-level classification: decides whether raw error output points at
//! something the agent can fix (CODE), a defect in the plan itself (PLAN),
//! or a broken environment (ENV).
//!
//! Classification drives retry gating: only CODE-level errors are
//! agent-fixable; PLAN and ENV force escalation.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::RegexBuilder;
use tokio_util::sync::CancellationToken;

/// Soft deadline for the optional AI-based classification; the regex table
/// answers on timeout.
const AI_CLASSIFY_DEADLINE: Duration = Duration::from_secs(5);

/// Who has to act to fix an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorLevel {
    /// The agent can fix it by changing code. Retryable.
    Code,
    /// The plan itself is wrong. Escalate.
    Plan,
    /// The environment is broken. Escalate.
    Env,
}

impl ErrorLevel {
    pub fn is_agent_fixable(self) -> bool {
        matches!(self, ErrorLevel::Code)
    }
}

/// Optional AI-backed classifier consulted when the regex table has no
/// opinion.
#[async_trait]
pub trait AiClassifier: Send + Sync {
    async fn classify(&self, error_text: &str) -> anyhow::Result<ErrorLevel>;
}

struct Pattern {
    regex: regex::Regex,
    level: ErrorLevel,
}

fn pattern(expr: &str, level: ErrorLevel) -> Pattern {
    Pattern {
        regex: RegexBuilder::new(expr)
            .case_insensitive(true)
            .build()
            .expect("static classifier regex"),
        level,
    }
}

/// Ordered pattern table. Environment signatures win over plan signatures,
/// which win over code signatures, so the most escalation-worthy reading of
/// an ambiguous message is taken.
static PATTERNS: LazyLock<Vec<Pattern>> = LazyLock::new(|| {
    vec![
        // ENV: the machine, not the work.
        pattern(r"permission denied", ErrorLevel::Env),
        pattern(r"command not found", ErrorLevel::Env),
        pattern(r"executable file not found", ErrorLevel::Env),
        pattern(r"no such file or directory", ErrorLevel::Env),
        pattern(r"connection (refused|reset|timed out)", ErrorLevel::Env),
        pattern(r"network is unreachable", ErrorLevel::Env),
        pattern(r"no space left on device", ErrorLevel::Env),
        pattern(r"disk quota exceeded", ErrorLevel::Env),
        pattern(r"rate.?limit", ErrorLevel::Env),
        pattern(r"(api|auth(entication)?) (key|token) .*(invalid|expired|missing)", ErrorLevel::Env),
        // PLAN: the instructions, not the code.
        pattern(r"depends on non-existent", ErrorLevel::Plan),
        pattern(r"unknown dependency", ErrorLevel::Plan),
        pattern(r"circular|cycle detected", ErrorLevel::Plan),
        pattern(r"conflicting (requirement|instruction)s?", ErrorLevel::Plan),
        pattern(r"criteri(on|a) .*(ambiguous|contradict)", ErrorLevel::Plan),
        pattern(r"referenced (file|module|symbol) does not exist", ErrorLevel::Plan),
        // CODE: the work itself.
        pattern(r"(syntax|parse) error", ErrorLevel::Code),
        pattern(r"(compil|build) (error|failed)", ErrorLevel::Code),
        pattern(r"type (error|mismatch)", ErrorLevel::Code),
        pattern(r"undefined (variable|function|reference)", ErrorLevel::Code),
        pattern(r"test(s)? fail", ErrorLevel::Code),
        pattern(r"assertion failed", ErrorLevel::Code),
        pattern(r"panic(ked)? at", ErrorLevel::Code),
        pattern(r"nil pointer|null pointer|segmentation fault", ErrorLevel::Code),
    ]
});

/// Regex-first classifier with an optional AI fallback.
#[derive(Clone, Default)]
pub struct ErrorClassifier {
    ai: Option<Arc<dyn AiClassifier>>,
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("ai", &self.ai.is_some())
            .finish()
    }
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self { ai: None }
    }

    pub fn with_ai(ai: Arc<dyn AiClassifier>) -> Self {
        Self { ai: Some(ai) }
    }

    /// Classify raw error output.
    ///
    /// The regex table is consulted first; when nothing matches, the AI
    /// classifier (if configured) is asked under a 5-second soft deadline.
    /// Timeouts, AI errors, and unmatched output all default to CODE, the
    /// retry-friendly level.
    pub async fn classify(&self, cancel: &CancellationToken, error_text: &str) -> ErrorLevel {
        if let Some(level) = classify_by_pattern(error_text) {
            return level;
        }

        if let Some(ai) = &self.ai {
            let attempt = tokio::time::timeout(AI_CLASSIFY_DEADLINE, ai.classify(error_text));
            tokio::select! {
                result = attempt => match result {
                    Ok(Ok(level)) => return level,
                    Ok(Err(e)) => {
                        tracing::warn!(error = %e, "AI error classification failed, defaulting to CODE");
                    }
                    Err(_) => {
                        tracing::warn!("AI error classification timed out, defaulting to CODE");
                    }
                },
                _ = cancel.cancelled() => {
                    tracing::debug!("AI error classification cancelled, defaulting to CODE");
                }
            }
        }

        ErrorLevel::Code
    }

    /// Classify a batch of detected error strings; the most
    /// escalation-worthy level wins (ENV > PLAN > CODE).
    pub async fn classify_all(
        &self,
        cancel: &CancellationToken,
        errors: &[String],
    ) -> ErrorLevel {
        let mut worst = ErrorLevel::Code;
        for error in errors {
            match self.classify(cancel, error).await {
                ErrorLevel::Env => return ErrorLevel::Env,
                ErrorLevel::Plan => worst = ErrorLevel::Plan,
                ErrorLevel::Code => {}
            }
        }
        worst
    }
}

fn classify_by_pattern(error_text: &str) -> Option<ErrorLevel> {
    PATTERNS
        .iter()
        .find(|p| p.regex.is_match(error_text))
        .map(|p| p.level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn env_errors_are_recognised() {
        let classifier = ErrorClassifier::new();
        let cancel = CancellationToken::new();
        for text in [
            "sh: claude: command not found",
            "open /etc/secret: permission denied",
            "dial tcp 127.0.0.1:5432: connection refused",
            "write /tmp/out: no space left on device",
        ] {
            assert_eq!(
                classifier.classify(&cancel, text).await,
                ErrorLevel::Env,
                "{text}"
            );
        }
    }

    #[tokio::test]
    async fn plan_errors_are_recognised() {
        let classifier = ErrorClassifier::new();
        let cancel = CancellationToken::new();
        assert_eq!(
            classifier
                .classify(&cancel, "task \"3\" depends on non-existent task \"9\"")
                .await,
            ErrorLevel::Plan
        );
        assert_eq!(
            classifier
                .classify(&cancel, "dependency cycle detected involving tasks: 1, 2")
                .await,
            ErrorLevel::Plan
        );
    }

    #[tokio::test]
    async fn code_errors_are_recognised() {
        let classifier = ErrorClassifier::new();
        let cancel = CancellationToken::new();
        assert_eq!(
            classifier.classify(&cancel, "syntax error near line 40").await,
            ErrorLevel::Code
        );
        assert_eq!(
            classifier.classify(&cancel, "3 tests failed").await,
            ErrorLevel::Code
        );
    }

    #[tokio::test]
    async fn unmatched_output_defaults_to_code() {
        let classifier = ErrorClassifier::new();
        assert_eq!(
            classifier
                .classify(&CancellationToken::new(), "something inexplicable happened")
                .await,
            ErrorLevel::Code
        );
    }

    #[tokio::test]
    async fn ai_fallback_is_consulted_for_unmatched_output() {
        struct AlwaysPlan;
        #[async_trait]
        impl AiClassifier for AlwaysPlan {
            async fn classify(&self, _error_text: &str) -> anyhow::Result<ErrorLevel> {
                Ok(ErrorLevel::Plan)
            }
        }

        let classifier = ErrorClassifier::with_ai(Arc::new(AlwaysPlan));
        assert_eq!(
            classifier
                .classify(&CancellationToken::new(), "mysterious failure")
                .await,
            ErrorLevel::Plan
        );
        // A pattern hit skips the AI entirely.
        assert_eq!(
            classifier
                .classify(&CancellationToken::new(), "assertion failed: left == right")
                .await,
            ErrorLevel::Code
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_ai_falls_back_to_code() {
        struct NeverAnswers;
        #[async_trait]
        impl AiClassifier for NeverAnswers {
            async fn classify(&self, _error_text: &str) -> anyhow::Result<ErrorLevel> {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(ErrorLevel::Env)
            }
        }

        let classifier = ErrorClassifier::with_ai(Arc::new(NeverAnswers));
        let level = classifier
            .classify(&CancellationToken::new(), "mysterious failure")
            .await;
        assert_eq!(level, ErrorLevel::Code, "timeout falls back to CODE");
    }

    #[tokio::test]
    async fn classify_all_takes_the_worst_level() {
        let classifier = ErrorClassifier::new();
        let cancel = CancellationToken::new();
        let errors = vec![
            "tests failed".to_string(),
            "permission denied".to_string(),
        ];
        assert_eq!(
            classifier.classify_all(&cancel, &errors).await,
            ErrorLevel::Env
        );
    }
}
