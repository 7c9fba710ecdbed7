//! Chat-completion response parsing.
//!
//! Turns a non-streaming `/chat/completions` body into an [`AssistantReply`].
//! `content` may arrive as a plain string or as a list of content blocks
//! (`[{"type": "text", "text": "..."}]`); blocks are concatenated in order.

use serde::Deserialize;

use super::errors::InferenceError;
use super::tool_call_parser::parse_native_json_tool_call;
use super::types::AssistantReply;

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<serde_json::Value>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: Option<String>,
    function: WireFunction,
}

#[derive(Deserialize)]
struct WireFunction {
    #[serde(default)]
    name: String,
    /// Usually a JSON-encoded string; a few servers send an object.
    #[serde(default)]
    arguments: Option<serde_json::Value>,
}

/// Parse a non-streaming chat completion body.
pub fn parse_completion_response(body: &str) -> Result<AssistantReply, InferenceError> {
    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseParse {
            reason: format!("failed to parse chat completion: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::ResponseParse {
            reason: "empty choices array".into(),
        })?;

    let content = choice
        .message
        .content
        .as_ref()
        .and_then(content_to_text)
        .filter(|c| !c.is_empty());

    let mut tool_calls = Vec::new();
    for tc in choice.message.tool_calls.unwrap_or_default() {
        let raw_args = match tc.function.arguments {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        tool_calls.push(parse_native_json_tool_call(
            tc.id.as_deref(),
            &tc.function.name,
            &raw_args,
        ));
    }

    Ok(AssistantReply {
        content,
        tool_calls,
        finish_reason: choice.finish_reason,
    })
}

/// Flatten message content (string or content-block list) to text.
pub fn content_to_text(content: &serde_json::Value) -> Option<String> {
    match content {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Array(blocks) => {
            let parts: Vec<&str> = blocks
                .iter()
                .filter_map(|block| match block {
                    serde_json::Value::String(s) => Some(s.as_str()),
                    serde_json::Value::Object(map) => map.get("text").and_then(|t| t.as_str()),
                    _ => None,
                })
                .collect();
            if parts.is_empty() {
                None
            } else {
                Some(parts.join("\n"))
            }
        }
        _ => None,
    }
}
