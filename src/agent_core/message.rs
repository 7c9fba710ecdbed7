//! Message model threaded through the agent loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use crate::inference::types::ToolCall;

// ─── Message ─────────────────────────────────────────────────────────────────

/// One entry in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// Instructions for the model. At most one, always first.
    System { text: String },
    /// The user's natural-language request.
    Human { text: String },
    /// A model reply. Terminal iff it carries no tool calls.
    Assistant(AssistantMessage),
    /// The outcome of one tool call, answering the call with the same id.
    ToolResult(ToolResult),
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Message::System { text: text.into() }
    }

    pub fn human(text: impl Into<String>) -> Self {
        Message::Human { text: text.into() }
    }

    pub fn role_name(&self) -> &'static str {
        match self {
            Message::System { .. } => "system",
            Message::Human { .. } => "human",
            Message::Assistant(_) => "assistant",
            Message::ToolResult(_) => "tool",
        }
    }

    pub fn as_assistant(&self) -> Option<&AssistantMessage> {
        match self {
            Message::Assistant(a) => Some(a),
            _ => None,
        }
    }
}

/// A reply produced by the model invoker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl AssistantMessage {
    /// A final answer with no tool calls.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    /// A reply that only requests tool calls.
    pub fn calls(tool_calls: Vec<ToolCall>) -> Self {
        Self {
            text: None,
            tool_calls,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.tool_calls.is_empty()
    }
}

// ─── Tool results ────────────────────────────────────────────────────────────

/// Whether a tool call succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    Success,
    Error,
}

/// The answer to one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Handler output, or `{"error": ...}` when `status` is `Error`.
    pub payload: Value,
    pub status: ToolStatus,
}

impl ToolResult {
    pub fn success(call: &ToolCall, payload: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            payload,
            status: ToolStatus::Success,
        }
    }

    pub fn error(call: &ToolCall, payload: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            tool_name: call.name.clone(),
            payload,
            status: ToolStatus::Error,
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == ToolStatus::Error
    }

    /// Text sent back to the model as the `tool` message content.
    pub fn content_text(&self) -> String {
        match &self.payload {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}
