//! Tool call parsing — normalizes wire tool calls to `ToolCall` structs.
//!
//! The chat-completions API returns each call's arguments as a JSON-encoded
//! string. Models occasionally emit slightly malformed JSON there; the parser
//! applies a short list of repairs seen in practice. A call that stays broken
//! is still returned, so the dispatcher can report it back to the model.

use uuid::Uuid;

use super::types::ToolCall;

/// Name given to a wire tool call that arrived without one. No tool is
/// registered under it, so dispatch reports it as unknown.
pub const UNNAMED_TOOL: &str = "<unnamed>";

// ─── Native JSON Parsing ─────────────────────────────────────────────────────

/// Parse one wire tool call into a `ToolCall`.
///
/// Missing ids get a generated `call_<uuid>`. Empty or whitespace-only
/// arguments are treated as `{}`. Arguments that cannot be repaired are
/// kept as the raw string, which argument validation rejects.
pub fn parse_native_json_tool_call(id: Option<&str>, name: &str, arguments_json: &str) -> ToolCall {
    let call_id = id
        .filter(|s| !s.is_empty())
        .map(String::from)
        .unwrap_or_else(|| format!("call_{}", Uuid::new_v4()));

    let name = if name.trim().is_empty() {
        tracing::warn!(call_id = %call_id, "tool call without a name");
        UNNAMED_TOOL
    } else {
        name
    };

    let trimmed = arguments_json.trim();
    let arguments = if trimmed.is_empty() {
        serde_json::json!({})
    } else {
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(v) => v,
            Err(e) => match repair_malformed_tool_call_json(trimmed) {
                Some(repaired) => {
                    tracing::info!(tool = %name, "repaired malformed tool call arguments");
                    repaired
                }
                None => {
                    tracing::warn!(tool = %name, error = %e, "unparseable tool call arguments");
                    serde_json::Value::String(arguments_json.to_string())
                }
            },
        }
    };

    ToolCall {
        id: call_id,
        name: name.to_string(),
        arguments,
    }
}

// ─── Malformed JSON Repair ──────────────────────────────────────────────────

/// Attempt to repair malformed JSON arguments from a model tool call.
///
/// Repairs, applied cumulatively:
/// 1. Markdown code fence around the object
/// 2. Trailing commas: `{"a":1,}`
/// 3. Missing closing braces
/// 4. Unescaped control characters
///
/// Returns `Some(value)` if repair succeeds, `None` if irreparable.
pub fn repair_malformed_tool_call_json(raw: &str) -> Option<serde_json::Value> {
    if let Ok(v) = serde_json::from_str::<serde_json::Value>(raw) {
        return Some(v);
    }

    let repairs: [fn(&str) -> String; 4] = [
        strip_code_fence,
        repair_trailing_commas,
        repair_unbalanced_braces,
        repair_control_characters,
    ];

    let mut repaired = raw.to_string();
    for repair in repairs {
        repaired = repair(&repaired);
        if let Ok(v) = serde_json::from_str::<serde_json::Value>(&repaired) {
            return Some(v);
        }
    }

    None
}

/// Drop a surrounding ```` ``` ```` / ```` ```json ```` fence.
fn strip_code_fence(input: &str) -> String {
    let trimmed = input.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return input.to_string();
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
        .to_string()
}

/// Remove trailing commas before `}` or `]`.
fn repair_trailing_commas(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut result = String::with_capacity(input.len());

    for (i, &ch) in chars.iter().enumerate() {
        if ch == ',' {
            let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        result.push(ch);
    }

    result
}

/// Append closing braces to balance unmatched opening braces.
fn repair_unbalanced_braces(input: &str) -> String {
    let mut brace_depth: i32 = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for ch in input.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => brace_depth += 1,
            '}' if !in_string => brace_depth -= 1,
            _ => {}
        }
    }

    let mut result = input.to_string();
    for _ in 0..brace_depth.max(0) {
        result.push('}');
    }
    result
}

/// Remove non-printable control characters that break JSON parsing.
/// Preserves `\n`, `\r`, `\t`.
fn repair_control_characters(input: &str) -> String {
    input
        .chars()
        .filter(|&c| !c.is_control() || c == '\n' || c == '\r' || c == '\t')
        .collect()
}

// ─── Tests ───────────────────────────────────────────────────────────────────
