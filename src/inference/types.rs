//! Shared types for the inference client.
//!
//! These mirror the OpenAI Chat Completions API types, used for both
//! request building and response parsing.

use serde::{Deserialize, Serialize};

// ─── Request Types ───────────────────────────────────────────────────────────

/// A single message in the request.
///
/// Serialization notes:
/// - `content` is sent as `""` (not `null`) for assistant messages that only
///   carry tool calls; several OpenAI-compatible servers reject `null`.
/// - `tool_call_id` and `tool_calls` are skipped when `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(serialize_with = "serialize_content")]
    pub content: Option<String>,
    /// Tool call results are sent back as `tool` role messages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Assistant messages may contain tool calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallResponse>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self::plain(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::plain(Role::User, text)
    }

    fn plain(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Some(text.into()),
            tool_call_id: None,
            tool_calls: None,
        }
    }
}

/// Emit `""` instead of `null` when content is `None`.
fn serialize_content<S>(value: &Option<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match value {
        Some(s) => serializer.serialize_str(s),
        None => serializer.serialize_str(""),
    }
}

/// Message role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// Tool definition sent in the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub r#type: String,
    pub function: FunctionDefinition,
}

/// Function definition within a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Request body for `POST {base_url}/chat/completions`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<ToolDefinition>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<String>,
    /// Only sent when tools are present; some servers reject it otherwise.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_tool_calls: Option<bool>,
    pub temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    pub stream: bool,
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// A parsed tool call extracted from the model's response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call (generated if the model doesn't provide one).
    pub id: String,
    /// Tool name, e.g. `"parse_jira_date"`.
    pub name: String,
    /// JSON arguments.
    pub arguments: serde_json::Value,
}

/// Tool call as it appears on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub r#type: String,
    pub function: FunctionCallResponse,
}

/// Function call details on the wire. `arguments` is a JSON-encoded string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCallResponse {
    pub name: String,
    pub arguments: String,
}

impl From<&ToolCall> for ToolCallResponse {
    fn from(tc: &ToolCall) -> Self {
        ToolCallResponse {
            id: tc.id.clone(),
            r#type: "function".to_string(),
            function: FunctionCallResponse {
                name: tc.name.clone(),
                arguments: tc.arguments.to_string(),
            },
        }
    }
}

/// One complete assistant reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    /// Text content, with content-block lists already concatenated.
    pub content: Option<String>,
    /// Requested tool calls, in the order the model emitted them.
    pub tool_calls: Vec<ToolCall>,
    /// `"stop"`, `"tool_calls"`, `"length"`, or `None` if the server omitted it.
    pub finish_reason: Option<String>,
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tools: Option<Vec<ToolDefinition>>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            model: "test".to_string(),
            messages: vec![],
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            parallel_tool_calls: None,
            tools,
            temperature: 0.0,
            max_tokens: None,
            stream: false,
        }
    }

    #[test]
    fn test_null_content_serialized_as_empty_string() {
        let msg = ChatMessage {
            role: Role::Assistant,
            content: None,
            tool_call_id: None,
            tool_calls: Some(vec![]),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["content"], "");
        assert!(json.get("tool_call_id").is_none());
    }

    #[test]
    fn test_optional_fields_omitted() {
        let json = serde_json::to_string(&request(None)).unwrap();
        assert!(!json.contains("max_tokens"));
        assert!(!json.contains("tool_choice"));
        assert!(!json.contains("parallel_tool_calls"));
    }

    #[test]
    fn test_tool_call_wire_arguments_are_string() {
        let tc = ToolCall {
            id: "call_1".into(),
            name: "check_jql".into(),
            arguments: serde_json::json!({"jql": "project = MOB"}),
        };
        let wire = ToolCallResponse::from(&tc);
        assert_eq!(wire.r#type, "function");
        assert_eq!(wire.function.arguments, r#"{"jql":"project = MOB"}"#);
    }
}
