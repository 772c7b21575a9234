//! Output Validator
//!
//! Pure checks for structured-output contracts. Models asked for JSON
//! frequently wrap the payload in a fenced code block or prose; the
//! validator first tries the raw text, then rescues the contents of fenced
//! blocks before declaring the output invalid. No I/O, no shared state,
//! deterministic for identical input.

use serde::{Deserialize, Serialize};

/// Contract the model output must satisfy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuredFormat {
    /// Output must parse as a JSON document.
    Json,
}

/// Validate `raw` against an optional structured contract.
///
/// Returns the payload to hand to the caller: the raw text unchanged when no
/// contract applies, the (possibly extracted) JSON text when the contract is
/// satisfied, or `None` when it is not. Parse failures never propagate.
pub fn validate_and_extract(raw: &str, format: Option<StructuredFormat>) -> Option<String> {
    match format {
        None => Some(raw.to_string()),
        Some(StructuredFormat::Json) => extract_json(raw),
    }
}

fn extract_json(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if parses_as_json(trimmed) {
        return Some(trimmed.to_string());
    }
    for block in fenced_blocks(raw) {
        let candidate = block.trim();
        if parses_as_json(candidate) {
            return Some(candidate.to_string());
        }
    }
    None
}

fn parses_as_json(text: &str) -> bool {
    !text.is_empty() && serde_json::from_str::<serde_json::Value>(text).is_ok()
}

/// Contents of every ``` fence pair, in order of appearance. An optional
/// language tag on the opening fence line is stripped.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut blocks = Vec::new();
    let mut rest = text;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        let Some(close) = after_open.find("```") else {
            break;
        };
        let body = &after_open[..close];
        // Drop the language tag line ("json", "text", ...) if present.
        let content = match body.find('\n') {
            Some(nl) if body[..nl].trim().chars().all(|c| c.is_alphanumeric()) => &body[nl + 1..],
            _ => body,
        };
        blocks.push(content);
        rest = &after_open[close + 3..];
    }
    blocks
}
