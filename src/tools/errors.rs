//! Tool error types.

use thiserror::Error;

/// Errors raised while registering, validating, or executing a tool.
///
/// Everything except `DuplicateTool` is recovered into the conversation as
/// an error `ToolResult`; `DuplicateTool` is a startup configuration error.
#[derive(Debug, Error)]
pub enum ToolError {
    /// The model asked for a tool that is not registered.
    #[error("unknown tool: '{name}'")]
    UnknownTool {
        name: String,
        suggestions: Vec<String>,
    },

    /// Tool call arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The handler ran and failed.
    #[error("{reason}")]
    Execution { reason: String },

    /// The handler did not finish within the dispatcher timeout.
    #[error("tool '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// Two tools were registered under the same name.
    #[error("duplicate tool name: '{name}'")]
    DuplicateTool { name: String },
}

impl ToolError {
    /// Shorthand for a handler failure.
    pub fn execution(reason: impl Into<String>) -> Self {
        ToolError::Execution {
            reason: reason.into(),
        }
    }

    /// Build the JSON payload reported back to the model.
    pub fn to_payload(&self) -> serde_json::Value {
        let mut payload = serde_json::json!({ "error": self.to_string() });
        match self {
            ToolError::UnknownTool { suggestions, .. } if !suggestions.is_empty() => {
                payload["did_you_mean"] = serde_json::json!(suggestions);
            }
            ToolError::InvalidArguments { .. } => {
                payload["kind"] = serde_json::json!("invalid_arguments");
            }
            ToolError::Timeout { timeout_ms, .. } => {
                payload["timeout_ms"] = serde_json::json!(timeout_ms);
            }
            _ => {}
        }
        payload
    }
}

impl From<serde_json::Error> for ToolError {
    fn from(e: serde_json::Error) -> Self {
        ToolError::Execution {
            reason: format!("serialization error: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tool_payload_includes_suggestions() {
        let err = ToolError::UnknownTool {
            name: "chek_jql".into(),
            suggestions: vec!["check_jql".into()],
        };
        let payload = err.to_payload();
        assert_eq!(payload["error"], "unknown tool: 'chek_jql'");
        assert_eq!(payload["did_you_mean"][0], "check_jql");
    }

    #[test]
    fn test_unknown_tool_payload_without_suggestions() {
        let err = ToolError::UnknownTool {
            name: "frobnicate".into(),
            suggestions: vec![],
        };
        assert!(err.to_payload().get("did_you_mean").is_none());
    }

    #[test]
    fn test_execution_message_is_verbatim() {
        let err = ToolError::execution("Unrecognized date format: 'someday'");
        assert_eq!(err.to_string(), "Unrecognized date format: 'someday'");
    }
}
