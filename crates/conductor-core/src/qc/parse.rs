//! Tolerant parsing of QC agent responses.
//!
//! Agents are asked for a bare JSON object, but CLI harnesses wrap their
//! result in a `{"type":"result","result":"<escaped JSON>"}` envelope and
//! models love Markdown code fences. Both are unwrapped before decoding.

use serde::Deserialize;

use crate::model::Verdict;

use super::{CriterionResult, Issue, QcError, QcResponse};

#[derive(Debug, Deserialize)]
struct RawQcResponse {
    verdict: Option<Verdict>,
    #[serde(default)]
    feedback: String,
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    recommendations: Vec<String>,
    #[serde(default)]
    should_retry: bool,
    #[serde(default)]
    suggested_agent: String,
    #[serde(default)]
    criteria_results: Vec<CriterionResult>,
}

/// Parse a raw QC agent reply into a [`QcResponse`].
///
/// Unwraps a CLI result envelope, strips a surrounding triple-backtick code
/// fence if it exactly wraps the payload, then decodes the JSON object. A
/// missing `verdict` is an error.
pub fn parse_qc_json(raw: &str) -> Result<QcResponse, QcError> {
    let mut payload = raw.trim().to_string();

    // Envelope: {"type":"result", "result":"<escaped JSON>"}.
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) {
        if value.get("type").and_then(|t| t.as_str()) == Some("result") {
            if let Some(inner) = value.get("result").and_then(|r| r.as_str()) {
                payload = inner.to_string();
            }
        }
    }

    let stripped = strip_code_fence(payload.trim());

    let raw_response: RawQcResponse = serde_json::from_str(stripped)?;
    let verdict = raw_response.verdict.ok_or(QcError::MissingVerdict)?;

    Ok(QcResponse {
        verdict,
        feedback: raw_response.feedback,
        issues: raw_response.issues,
        recommendations: raw_response.recommendations,
        should_retry: raw_response.should_retry,
        suggested_agent: raw_response.suggested_agent,
        criteria_results: raw_response.criteria_results,
    })
}

/// Strip a triple-backtick fence that exactly wraps the payload
/// (optionally tagged, e.g. ```json).
fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let Some(body) = rest.strip_suffix("```") else {
        return s;
    };
    // Drop the fence's language tag line, if any.
    match body.find('\n') {
        Some(idx) => body[idx + 1..].trim(),
        None => body.trim(),
    }
}
