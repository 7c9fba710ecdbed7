//! Agent Core — the manager ⇄ tools loop.
//!
//! Submodules:
//! - `message`: Message model (system / human / assistant / tool result)
//! - `conversation`: Append-only message log of one run
//! - `invoker`: `ModelInvoker` seam over the inference client
//! - `router`: Continue-or-terminate decision on the last message
//! - `dispatcher`: Executes tool calls, turning every failure into a result
//! - `result_extractor`: Decodes the JSON object in the final answer
//! - `agent_loop`: The state machine tying the above together
//! - `supervisor`: Optional wrapper exposing sub-agents as tools
//! - `errors`: Loop-level error types

pub mod agent_loop;
pub mod conversation;
pub mod dispatcher;
pub mod errors;
pub mod invoker;
pub mod message;
pub mod result_extractor;
pub mod router;
pub mod supervisor;

// Re-exports for convenience
pub use agent_loop::{AgentConfig, AgentLoop, AgentState, RunReport, ValidationPolicy};
pub use conversation::ConversationState;
pub use dispatcher::ToolDispatcher;
pub use errors::AgentError;
pub use invoker::ModelInvoker;
pub use message::{AssistantMessage, Message, ToolCall, ToolResult, ToolStatus};
pub use result_extractor::StructuredResult;
pub use router::{route, Route};
pub use supervisor::{SubAgent, SubAgentTool, Supervisor};
