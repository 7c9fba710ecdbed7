//! Jira client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JiraError {
    /// The request never produced a response.
    #[error("Jira request to {endpoint} failed: {reason}")]
    Http { endpoint: String, reason: String },

    /// Jira answered with a non-success status.
    #[error("Jira returned HTTP {status}: {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("failed to decode Jira response: {reason}")]
    Decode { reason: String },

    /// Base URL or credentials are missing.
    #[error("Jira is not configured: {reason}")]
    Config { reason: String },
}

impl JiraError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, JiraError::Api { status: 404, .. })
    }
}
