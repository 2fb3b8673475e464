//! LLM response parsing into entity responses.
//!
//! The LLM is asked for a JSON object carrying its reasoning and the
//! structured signals cross-entity analysis runs on. Models do not always
//! comply, so parsing degrades step by step: clean JSON, JSON inside a
//! markdown code block, JSON with trailing commas. Text that still does not
//! parse is kept as the response content with no signals. Only an empty
//! answer is rejected outright.

use cascade_core::{BackendError, GeneratedResponse};
use cascade_types::{ResponseSignals, Stance};
use tracing::warn;

use crate::error::RunnerError;

/// Bounds of the stance movement a response may report.
const MIN_STANCE_SHIFT: f64 = -2.0;
const MAX_STANCE_SHIFT: f64 = 2.0;

/// Intermediate struct for deserializing the LLM's raw JSON response.
#[derive(Debug, serde::Deserialize)]
struct RawEntityResponse {
    #[serde(default, alias = "reasoning", alias = "response")]
    content: Option<String>,
    #[serde(default)]
    stance: Option<String>,
    #[serde(default)]
    stance_shift: Option<f64>,
    #[serde(default)]
    concerns: Vec<String>,
    #[serde(default, alias = "actions")]
    proposed_actions: Vec<String>,
    #[serde(default)]
    themes: Vec<String>,
}

/// Parse an LLM response string into a [`GeneratedResponse`].
///
/// Attempts multiple recovery strategies if the raw text is not clean JSON:
/// 1. Direct `serde_json` deserialization
/// 2. Extract JSON from markdown code blocks
/// 3. Strip trailing commas and retry
///
/// # Errors
///
/// Returns [`BackendError::Invalid`] only when the response is empty.
pub fn parse_llm_response(raw: &str) -> Result<GeneratedResponse, BackendError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(BackendError::Invalid(String::from("empty response")));
    }
    match try_parse(trimmed) {
        Ok(parsed) => Ok(convert_raw_response(parsed, trimmed)),
        Err(e) => {
            warn!(
                error = %e,
                raw_response = trimmed,
                "failed to parse LLM response, keeping text without signals"
            );
            Ok(GeneratedResponse {
                content: trimmed.to_owned(),
                signals: ResponseSignals::default(),
            })
        }
    }
}

/// Attempt to parse the response through multiple recovery strategies.
fn try_parse(trimmed: &str) -> Result<RawEntityResponse, RunnerError> {
    // Strategy 1: direct parse
    if let Ok(parsed) = serde_json::from_str::<RawEntityResponse>(trimmed) {
        return Ok(parsed);
    }

    let block = extract_json_from_codeblock(trimmed);

    // Strategy 2: extract from markdown code block
    if let Some(parsed) = block.and_then(|json| serde_json::from_str(json).ok()) {
        return Ok(parsed);
    }

    // Strategy 3: strip trailing commas, from the code block when present
    let cleaned = strip_trailing_commas(block.unwrap_or(trimmed));
    serde_json::from_str::<RawEntityResponse>(&cleaned)
        .map_err(|e| RunnerError::Parse(format!("all parse strategies failed: {e}")))
}

/// Convert a deserialized raw response into signals, normalizing labels.
fn convert_raw_response(raw: RawEntityResponse, text: &str) -> GeneratedResponse {
    let stance = raw.stance.as_deref().and_then(Stance::parse_label);
    if let (None, Some(label)) = (stance, raw.stance.as_deref()) {
        warn!(stance = label, "unrecognized stance label");
    }
    let stance_shift = raw
        .stance_shift
        .filter(|shift| shift.is_finite())
        .map(|shift| shift.clamp(MIN_STANCE_SHIFT, MAX_STANCE_SHIFT));

    let content = raw
        .content
        .map(|c| c.trim().to_owned())
        .filter(|c| !c.is_empty())
        .unwrap_or_else(|| text.to_owned());

    GeneratedResponse {
        content,
        signals: ResponseSignals {
            stance,
            stance_shift,
            concerns: clean_labels(raw.concerns),
            proposed_actions: clean_labels(raw.proposed_actions),
            themes: clean_labels(raw.themes),
        },
    }
}

/// Trim labels and drop empty ones.
fn clean_labels(labels: Vec<String>) -> Vec<String> {
    labels
        .into_iter()
        .map(|l| l.trim().to_owned())
        .filter(|l| !l.is_empty())
        .collect()
}

/// Extract JSON content from a markdown code block.
fn extract_json_from_codeblock(text: &str) -> Option<&str> {
    let (tag_start, tag_len) = text
        .find("```json")
        .map(|i| (i, 7))
        .or_else(|| text.find("```").map(|i| (i, 3)))?;
    let after_tag = tag_start.checked_add(tag_len)?;
    let body = text.get(after_tag..)?;
    let start = body.find('\n').and_then(|nl| nl.checked_add(1)).unwrap_or(0);
    let body = body.get(start..)?;
    let end = body.find("```")?;
    body.get(..end).map(str::trim)
}

/// Strip trailing commas before closing braces and brackets (common LLM error).
fn strip_trailing_commas(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == ',' {
            let rest = chars.clone().find(|n| !n.is_whitespace());
            if matches!(rest, Some('}' | ']')) {
                continue;
            }
        }
        result.push(c);
    }
    result
}
