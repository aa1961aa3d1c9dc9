//! Extraction of the JSON object embedded in model output.
//!
//! Models often wrap the requested JSON in prose or code fences. The
//! extractor takes the span from the first `{` to the last `}` and parses
//! it. If that span is not valid JSON (for example trailing prose contains
//! a stray brace), it falls back to the first balanced `{...}` span,
//! scanning with awareness of JSON string literals.

use serde_json::{Map, Value};
use thiserror::Error;

/// Why no object could be extracted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("No JSON output found in model response")]
    NoJson,

    #[error("Unexpected response format from model: {0}")]
    Malformed(String),
}

/// Extract the first JSON object embedded in `text`.
pub fn extract_json_object(text: &str) -> Result<Map<String, Value>, ExtractError> {
    let start = text.find('{').ok_or(ExtractError::NoJson)?;
    let end = text.rfind('}').ok_or(ExtractError::NoJson)?;
    if end < start {
        return Err(ExtractError::NoJson);
    }

    let widest = &text[start..=end];
    let first_error = match serde_json::from_str::<Value>(widest) {
        Ok(value) => return into_object(value),
        Err(e) => e,
    };

    match balanced_span(&text[start..]) {
        Some(span) if span.len() < widest.len() => {
            let value: Value = serde_json::from_str(span)
                .map_err(|e| ExtractError::Malformed(e.to_string()))?;
            into_object(value)
        }
        _ => Err(ExtractError::Malformed(first_error.to_string())),
    }
}

fn into_object(value: Value) -> Result<Map<String, Value>, ExtractError> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ExtractError::Malformed(format!(
            "expected a JSON object, got {}",
            other
        ))),
    }
}

/// The shortest prefix of `text` (which starts with `{`) whose braces
/// balance, ignoring braces inside string literals.
fn balanced_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
