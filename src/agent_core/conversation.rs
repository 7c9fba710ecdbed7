//! ConversationState — the ordered, append-only message log of one agent run.
//!
//! Responsibilities:
//! - Idempotent system-prompt injection
//! - Appending human, assistant, and tool-result messages in protocol order
//! - Tracking which tool calls are still unanswered
//! - Building `Vec<ChatMessage>` for the inference client
//! - Rendering a plain-text transcript for tracing

use std::collections::HashSet;

use crate::inference::types::{ChatMessage, Role, ToolCallResponse};

use super::message::{AssistantMessage, Message, ToolCall, ToolResult};

// ─── ConversationState ──────────────────────────────────────────────────────

/// Message log owned by exactly one agent run.
///
/// The only mutators append. The single exception is
/// [`ensure_system_prompt`](Self::ensure_system_prompt), which may place the
/// system message in front of a human message seeded before it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationState {
    messages: Vec<Message>,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the system prompt unless one is already present.
    ///
    /// Returns `true` if the prompt was inserted. Once the model has replied,
    /// the log is frozen at the front and a missing prompt is not added.
    pub fn ensure_system_prompt(&mut self, prompt: &str) -> bool {
        if self.has_system_prompt() {
            return false;
        }
        if self.messages.iter().any(|m| !matches!(m, Message::Human { .. })) {
            tracing::warn!("system prompt not injected: conversation already has model turns");
            return false;
        }
        self.messages.insert(0, Message::system(prompt));
        true
    }

    pub fn has_system_prompt(&self) -> bool {
        self.messages
            .iter()
            .any(|m| matches!(m, Message::System { .. }))
    }

    pub fn push_human(&mut self, text: impl Into<String>) {
        self.messages.push(Message::human(text));
    }

    pub fn push_assistant(&mut self, reply: AssistantMessage) {
        self.messages.push(Message::Assistant(reply));
    }

    pub fn push_tool_result(&mut self, result: ToolResult) {
        self.messages.push(Message::ToolResult(result));
    }

    // ─── Queries ─────────────────────────────────────────────────────────

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The most recent assistant message, if any.
    pub fn last_assistant(&self) -> Option<&AssistantMessage> {
        self.messages.iter().rev().find_map(Message::as_assistant)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Tool calls of the latest assistant message that have no result yet.
    pub fn unanswered_tool_calls(&self) -> Vec<&ToolCall> {
        let Some(idx) = self
            .messages
            .iter()
            .rposition(|m| matches!(m, Message::Assistant(_)))
        else {
            return Vec::new();
        };

        let answered: HashSet<&str> = self.messages[idx + 1..]
            .iter()
            .filter_map(|m| match m {
                Message::ToolResult(r) => Some(r.tool_call_id.as_str()),
                _ => None,
            })
            .collect();

        match &self.messages[idx] {
            Message::Assistant(a) => a
                .tool_calls
                .iter()
                .filter(|tc| !answered.contains(tc.id.as_str()))
                .collect(),
            _ => Vec::new(),
        }
    }

    // ─── Rendering ───────────────────────────────────────────────────────

    /// Build the wire messages for the inference client, in log order.
    pub fn to_chat_messages(&self) -> Vec<ChatMessage> {
        to_chat_messages(&self.messages)
    }

    /// Human-readable transcript, one block per message.
    pub fn transcript(&self) -> String {
        let mut out = String::new();
        for (i, msg) in self.messages.iter().enumerate() {
            let body = match msg {
                Message::System { text } | Message::Human { text } => text.clone(),
                Message::Assistant(a) => {
                    let mut lines = Vec::new();
                    if let Some(ref text) = a.text {
                        lines.push(text.clone());
                    }
                    for tc in &a.tool_calls {
                        lines.push(format!("-> {}({}) [{}]", tc.name, tc.arguments, tc.id));
                    }
                    lines.join("\n")
                }
                Message::ToolResult(r) => format!(
                    "{} [{}] {:?}: {}",
                    r.tool_name,
                    r.tool_call_id,
                    r.status,
                    r.content_text()
                ),
            };
            out.push_str(&format!("[{i}] {}\n{body}\n\n", msg.role_name().to_uppercase()));
        }
        out
    }

    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

/// Convert a message slice into wire messages, preserving order.
pub fn to_chat_messages(messages: &[Message]) -> Vec<ChatMessage> {
    messages
        .iter()
        .map(|msg| match msg {
            Message::System { text } => ChatMessage::system(text.clone()),
            Message::Human { text } => ChatMessage::user(text.clone()),
            Message::Assistant(a) => ChatMessage {
                role: Role::Assistant,
                content: a.text.clone(),
                tool_call_id: None,
                tool_calls: if a.tool_calls.is_empty() {
                    None
                } else {
                    Some(a.tool_calls.iter().map(ToolCallResponse::from).collect())
                },
            },
            Message::ToolResult(r) => ChatMessage {
                role: Role::Tool,
                content: Some(r.content_text()),
                tool_call_id: Some(r.tool_call_id.clone()),
                tool_calls: None,
            },
        })
        .collect()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: json!({}),
        }
    }

    #[test]
    fn test_system_prompt_injected_once() {
        let mut conv = ConversationState::new();
        assert!(conv.ensure_system_prompt("You write JQL."));
        assert!(!conv.ensure_system_prompt("You write JQL."));
        assert!(!conv.ensure_system_prompt("Another prompt"));
        assert_eq!(conv.len(), 1);
    }

    #[test]
    fn test_system_prompt_goes_before_seeded_human() {
        let mut conv = ConversationState::new();
        conv.push_human("open bugs");
        assert!(conv.ensure_system_prompt("sys"));
        assert!(matches!(conv.messages()[0], Message::System { .. }));
        assert!(matches!(conv.messages()[1], Message::Human { .. }));
    }

    #[test]
    fn test_system_prompt_not_injected_after_model_turn() {
        let mut conv = ConversationState::new();
        conv.push_human("open bugs");
        conv.push_assistant(AssistantMessage::text("{}"));
        assert!(!conv.ensure_system_prompt("sys"));
        assert!(!conv.has_system_prompt());
    }

    #[test]
    fn test_unanswered_tool_calls() {
        let mut conv = ConversationState::new();
        conv.push_human("q");
        let calls = vec![call("a", "think"), call("b", "check_jql")];
        conv.push_assistant(AssistantMessage::calls(calls.clone()));
        assert_eq!(conv.unanswered_tool_calls().len(), 2);

        conv.push_tool_result(ToolResult::success(&calls[0], json!("ok")));
        let pending = conv.unanswered_tool_calls();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");

        conv.push_tool_result(ToolResult::success(&calls[1], json!("ok")));
        assert!(conv.unanswered_tool_calls().is_empty());
    }

    #[test]
    fn test_to_chat_messages_preserves_order_and_roles() {
        let mut conv = ConversationState::new();
        conv.ensure_system_prompt("sys");
        conv.push_human("bugs last month");
        let c = call("call_1", "parse_jira_date");
        conv.push_assistant(AssistantMessage::calls(vec![c.clone()]));
        conv.push_tool_result(ToolResult::success(&c, json!({"date": "2025-07-01"})));
        conv.push_assistant(AssistantMessage::text(r#"{"jql": ""}"#));

        let wire = conv.to_chat_messages();
        let roles: Vec<Role> = wire.iter().map(|m| m.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        assert_eq!(wire[2].tool_calls.as_ref().map(|t| t.len()), Some(1));
        assert_eq!(wire[3].tool_call_id.as_deref(), Some("call_1"));
        assert_eq!(wire[3].content.as_deref(), Some(r#"{"date":"2025-07-01"}"#));
        assert!(wire[4].tool_calls.is_none());
    }

    #[test]
    fn test_transcript_mentions_tool_calls() {
        let mut conv = ConversationState::new();
        conv.push_human("q");
        conv.push_assistant(AssistantMessage::calls(vec![call("x1", "think")]));
        let t = conv.transcript();
        assert!(t.contains("[0] HUMAN"));
        assert!(t.contains("-> think({}) [x1]"));
    }
}
