//! Errors from the chat-completions client.

use thiserror::Error;

/// Errors that can occur during inference operations.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed { endpoint: String, reason: String },

    /// The model endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout { duration_secs: u64 },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// The response body was not a valid chat completion.
    #[error("response parse error: {reason}")]
    ResponseParse { reason: String },

    /// Client construction or configuration error.
    #[error("config error: {reason}")]
    ConfigError { reason: String },
}

impl InferenceError {
    /// Authentication or authorization failure (bad or missing API key).
    pub fn is_auth_error(&self) -> bool {
        matches!(
            self,
            InferenceError::HttpError {
                status: 401 | 403,
                ..
            }
        )
    }
}
