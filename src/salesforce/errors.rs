//! Salesforce client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SalesforceError {
    #[error("Salesforce request to {endpoint} failed: {reason}")]
    Http { endpoint: String, reason: String },

    /// Salesforce rejected the request, e.g. `MALFORMED_QUERY` or `INVALID_FIELD`.
    #[error("{}", api_message(.status, .error_code, .message))]
    Api {
        status: u16,
        error_code: Option<String>,
        message: String,
    },

    #[error("failed to decode Salesforce response: {reason}")]
    Decode { reason: String },

    #[error("Salesforce is not configured: {reason}")]
    Config { reason: String },
}

fn api_message(status: &u16, error_code: &Option<String>, message: &str) -> String {
    match error_code {
        Some(code) => format!("{code}: {message}"),
        None => format!("HTTP {status}: {message}"),
    }
}
