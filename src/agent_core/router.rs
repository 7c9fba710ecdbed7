//! Router — decides whether the loop dispatches tools or stops.

use super::errors::AgentError;
use super::message::{Message, ToolCall};

/// Routing decision for the latest message.
#[derive(Debug, Clone, PartialEq)]
pub enum Route<'a> {
    /// Dispatch these tool calls, then invoke the model again.
    Continue(&'a [ToolCall]),
    /// Stop; the last message is the final answer.
    Terminate,
}

/// Route on a single message: `Continue` iff it is an assistant message
/// with at least one tool call.
pub fn route_message(last: &Message) -> Route<'_> {
    match last {
        Message::Assistant(a) if !a.tool_calls.is_empty() => Route::Continue(&a.tool_calls),
        _ => Route::Terminate,
    }
}

/// Route on a conversation. An empty conversation is a caller error.
pub fn route(messages: &[Message]) -> Result<Route<'_>, AgentError> {
    messages
        .last()
        .map(route_message)
        .ok_or(AgentError::EmptyConversation)
}
