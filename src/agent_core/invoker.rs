//! ModelInvoker — one chat-completion call turning a message log into a reply.

use async_trait::async_trait;

use crate::inference::{InferenceClient, InferenceError, ToolDefinition};

use super::conversation::to_chat_messages;
use super::message::{AssistantMessage, Message};

/// Produces the next assistant message for a conversation.
///
/// Implementations must not mutate the messages and must return a complete
/// reply. Tool names in the reply are not checked here; unknown names are
/// reported by the dispatcher.
#[async_trait]
pub trait ModelInvoker: Send + Sync {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantMessage, InferenceError>;
}

#[async_trait]
impl ModelInvoker for InferenceClient {
    async fn invoke(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<AssistantMessage, InferenceError> {
        let tools = if tools.is_empty() {
            None
        } else {
            Some(tools.to_vec())
        };
        let reply = self.chat_completion(to_chat_messages(messages), tools).await?;
        Ok(AssistantMessage {
            text: reply.content,
            tool_calls: reply.tool_calls,
        })
    }
}
