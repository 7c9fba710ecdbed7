//! Agent Core error types.
//!
//! Only loop-level failures live here. Tool failures never escape the loop:
//! they are recorded in the conversation for the model to act on.

use thiserror::Error;

use crate::inference::InferenceError;
use crate::tools::ToolError;

/// Errors surfaced from an agent run.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The model kept requesting tools until the turn budget ran out.
    #[error("aborted: no final answer after {turns} model turns")]
    Aborted { turns: u32 },

    /// The final answer contained no decodable JSON object.
    #[error("could not extract a JSON result: {reason}")]
    Extraction { reason: String, raw: String },

    /// The model call itself failed (transport, auth, timeout).
    #[error("model invocation failed: {0}")]
    Invoker(#[from] InferenceError),

    /// Routing was asked to decide on a conversation with no messages.
    #[error("cannot route an empty conversation")]
    EmptyConversation,

    /// The agent could not be assembled (duplicate tool, missing client config).
    #[error("agent setup failed: {reason}")]
    Setup { reason: String },
}

impl AgentError {
    /// The raw final text, for extraction failures.
    pub fn raw_text(&self) -> Option<&str> {
        match self {
            AgentError::Extraction { raw, .. } => Some(raw),
            _ => None,
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Aborted { .. } => 2,
            AgentError::Extraction { .. } => 3,
            AgentError::Invoker(_) => 4,
            AgentError::EmptyConversation | AgentError::Setup { .. } => 1,
        }
    }
}

impl From<ToolError> for AgentError {
    fn from(e: ToolError) -> Self {
        AgentError::Setup {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let codes = [
            AgentError::Aborted { turns: 3 }.exit_code(),
            AgentError::Extraction {
                reason: "r".into(),
                raw: "x".into(),
            }
            .exit_code(),
            AgentError::Invoker(InferenceError::Timeout { duration_secs: 1 }).exit_code(),
        ];
        assert_eq!(codes, [2, 3, 4]);
    }

    #[test]
    fn test_duplicate_tool_is_setup_error() {
        let err: AgentError = ToolError::DuplicateTool {
            name: "think".into(),
        }
        .into();
        assert!(matches!(err, AgentError::Setup { .. }));
        assert!(err.to_string().contains("think"));
    }
}
