//! ResultExtractor — decodes the JSON object embedded in a final answer.
//!
//! Models wrap their final JSON in many ways. Strategies, in order:
//! 1. The whole text is a JSON object.
//! 2. The first ```` ```json ```` fenced block (then the first bare ```` ``` ```` block).
//! 3. The first balanced `{...}` span, tracking strings and escapes so braces
//!    inside string values do not close the span early.
//!
//! Failure is always an error carrying the raw text, never an empty default.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::inference::response::content_to_text;

use super::errors::AgentError;
use super::message::AssistantMessage;

/// The decoded final answer.
pub type StructuredResult = Map<String, Value>;

/// Extract the result object from a terminal assistant message.
pub fn extract(message: &AssistantMessage) -> Result<StructuredResult, AgentError> {
    match message.text.as_deref() {
        Some(text) => extract_text(text),
        None => Err(AgentError::Extraction {
            reason: "final message has no text content".into(),
            raw: String::new(),
        }),
    }
}

/// Extract from raw content: a string, an already-decoded object, or a list
/// of content blocks (each block's text is tried in order).
pub fn extract_content(content: &Value) -> Result<StructuredResult, AgentError> {
    match content {
        Value::Object(map) => Ok(map.clone()),
        Value::String(s) => extract_text(s),
        Value::Array(blocks) => {
            for block in blocks {
                let text = match block {
                    Value::String(s) => Some(s.as_str()),
                    Value::Object(map) => map.get("text").and_then(|t| t.as_str()),
                    _ => None,
                };
                if let Some(found) = text.and_then(find_object) {
                    return Ok(found);
                }
            }
            Err(AgentError::Extraction {
                reason: "no content block contains a JSON object".into(),
                raw: content_to_text(content).unwrap_or_else(|| content.to_string()),
            })
        }
        other => Err(AgentError::Extraction {
            reason: "content is neither text nor content blocks".into(),
            raw: other.to_string(),
        }),
    }
}

/// Extract from free text.
pub fn extract_text(text: &str) -> Result<StructuredResult, AgentError> {
    find_object(text).ok_or_else(|| AgentError::Extraction {
        reason: "no JSON object found (tried direct parse, fenced block, brace scan)".into(),
        raw: text.to_string(),
    })
}

/// First JSON array in free text, for helper calls that answer with a list.
pub fn extract_array(text: &str) -> Option<Vec<Value>> {
    let trimmed = text.trim();
    if let Ok(Value::Array(items)) = serde_json::from_str(trimmed) {
        return Some(items);
    }
    for block in fenced_blocks(text) {
        if let Ok(Value::Array(items)) = serde_json::from_str(block.trim()) {
            return Some(items);
        }
    }
    balanced_spans(text, b'[', b']').find_map(|span| match serde_json::from_str(span) {
        Ok(Value::Array(items)) => Some(items),
        _ => None,
    })
}

// ─── Strategies ─────────────────────────────────────────────────────────────

fn find_object(text: &str) -> Option<StructuredResult> {
    let as_object = |s: &str| match serde_json::from_str::<Value>(s) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    };

    if let Some(map) = as_object(text.trim()) {
        return Some(map);
    }

    for block in fenced_blocks(text) {
        if let Some(map) = as_object(block.trim()) {
            return Some(map);
        }
    }

    balanced_spans(text, b'{', b'}').find_map(as_object)
}

/// Contents of ```` ```json ```` blocks first, then of any other fenced block.
fn fenced_blocks(text: &str) -> Vec<&str> {
    let mut json_blocks = Vec::new();
    let mut other_blocks = Vec::new();
    let mut rest = text;

    while let Some(open) = rest.find("```") {
        let after_ticks = &rest[open + 3..];
        // The info string runs to the end of the opening line.
        let line_end = after_ticks.find('\n').unwrap_or(after_ticks.len());
        let info = after_ticks[..line_end].trim().to_ascii_lowercase();
        let body_start = (line_end + 1).min(after_ticks.len());
        let body = &after_ticks[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        if info == "json" {
            json_blocks.push(&body[..close]);
        } else if info.is_empty() {
            other_blocks.push(&body[..close]);
        }
        rest = &body[close + 3..];
    }

    json_blocks.extend(other_blocks);
    json_blocks
}

/// Balanced spans opened by `open`, in order of their opening position.
///
/// Quotes are tracked so delimiters inside JSON strings are ignored, and a
/// backslash inside a string skips the next byte. Spans are produced lazily.
fn balanced_spans(text: &str, open: u8, close: u8) -> impl Iterator<Item = &str> {
    let bytes = text.as_bytes();
    let mut matches: HashMap<usize, Option<usize>> = HashMap::new();
    let mut next = 0usize;

    std::iter::from_fn(move || {
        while next < bytes.len() {
            let start = next;
            next += 1;
            if bytes[start] != open {
                continue;
            }
            if !matches.contains_key(&start) {
                match_from(bytes, start, open, close, &mut matches);
            }
            if let Some(Some(end)) = matches.get(&start) {
                return Some(&text[start..=*end]);
            }
        }
        None
    })
}

/// Scan from the opener at `start` and record the closing position of every
/// opener reached outside a string (`None` if it never closes).
///
/// A scan begun at any of those openers would see the same string state, so
/// one pass settles all of them. Openers inside strings are left for their
/// own scan.
fn match_from(
    bytes: &[u8],
    start: usize,
    open: u8,
    close: u8,
    matches: &mut HashMap<usize, Option<usize>>,
) {
    let mut stack: Vec<usize> = Vec::new();
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b if b == open => stack.push(i),
            b if b == close => {
                if let Some(opened) = stack.pop() {
                    matches.insert(opened, Some(i));
                }
            }
            _ => {}
        }
    }

    for opened in stack {
        matches.insert(opened, None);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
