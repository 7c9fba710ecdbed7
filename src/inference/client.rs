//! OpenAI-compatible inference client.
//!
//! Sends non-streaming chat completion requests and returns one complete
//! assistant reply. There is no retry or fallback here: a failed call is
//! reported to the caller, which decides whether to rerun the whole agent.

use std::time::Duration;

use reqwest::Client as HttpClient;

use crate::config::LlmConfig;

use super::errors::InferenceError;
use super::response::parse_completion_response;
use super::types::{AssistantReply, ChatCompletionRequest, ChatMessage, ToolDefinition};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── InferenceClient ─────────────────────────────────────────────────────────

/// Client for an OpenAI-compatible chat-completions endpoint.
#[derive(Debug, Clone)]
pub struct InferenceClient {
    http: HttpClient,
    config: LlmConfig,
    /// Sent as `parallel_tool_calls` when tools are present.
    parallel_tool_calls: Option<bool>,
}

impl InferenceClient {
    /// Create a client from the `llm` config section.
    ///
    /// Does NOT check connectivity; that happens on the first request.
    pub fn from_config(config: LlmConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| InferenceError::ConfigError {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            config,
            parallel_tool_calls: None,
        })
    }

    /// Ask the model to request at most one tool per turn (`false`) or allow several.
    pub fn with_parallel_tool_calls(mut self, allowed: bool) -> Self {
        self.parallel_tool_calls = Some(allowed);
        self
    }

    pub fn model_name(&self) -> &str {
        &self.config.model
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }

    // ─── Chat Completion ─────────────────────────────────────────────────

    /// Send a non-streaming chat completion request.
    pub async fn chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        tools: Option<Vec<ToolDefinition>>,
    ) -> Result<AssistantReply, InferenceError> {
        let url = self.endpoint();
        let tools = tools.filter(|t| !t.is_empty());

        let body = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            parallel_tool_calls: tools.as_ref().and(self.parallel_tool_calls),
            tools,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            stream: false,
        };

        // Request metadata only; bodies can be large.
        tracing::info!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "=== LLM REQUEST ==="
        );

        let mut request = self.http.post(&url).json(&body);
        if let Some(ref key) = self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.config.request_timeout_secs,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), "LLM request failed");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::ResponseParse {
                reason: format!("failed to read response body: {e}"),
            })?;

        let reply = parse_completion_response(&body_text)?;
        tracing::info!(
            tool_calls = reply.tool_calls.len(),
            has_content = reply.content.is_some(),
            finish_reason = reply.finish_reason.as_deref().unwrap_or("none"),
            "=== LLM RESPONSE ==="
        );
        Ok(reply)
    }

    /// One-shot text completion without tools, used by helper sub-calls.
    pub async fn complete_text(&self, system: &str, user: &str) -> Result<String, InferenceError> {
        let reply = self
            .chat_completion(vec![ChatMessage::system(system), ChatMessage::user(user)], None)
            .await?;
        Ok(reply.content.unwrap_or_default())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(base_url: &str) -> LlmConfig {
        LlmConfig {
            base_url: base_url.to_string(),
            model: "test-model".to_string(),
            api_key: None,
            temperature: 0.0,
            max_tokens: Some(256),
            request_timeout_secs: 5,
        }
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let client = InferenceClient::from_config(config("http://localhost:11434/v1/")).unwrap();
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
        assert_eq!(client.model_name(), "test-model");
    }

    #[tokio::test]
    async fn test_connection_refused_is_connection_failed() {
        // Port 9 (discard) is not expected to run an HTTP server.
        let client = InferenceClient::from_config(config("http://127.0.0.1:9/v1")).unwrap();
        let err = client
            .chat_completion(vec![ChatMessage::user("hi")], None)
            .await
            .unwrap_err();
        assert!(
            matches!(
                err,
                InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. }
            ),
            "unexpected error: {err:?}"
        );
    }
}
