//! Inference Client — OpenAI-compatible API client for the query agents.
//!
//! This module handles all communication with the model endpoint:
//! - Non-streaming chat completions with tool declarations
//! - Response parsing (string or content-block content, native tool calls)
//! - Repair of slightly malformed tool-call arguments
//!
//! The client speaks the OpenAI Chat Completions API, so switching providers
//! (OpenAI, Azure-compatible gateways, Ollama, vLLM) is a config change.

pub mod client;
pub mod errors;
pub mod response;
pub mod tool_call_parser;
pub mod types;

pub use client::InferenceClient;
pub use errors::InferenceError;
pub use types::{AssistantReply, ChatMessage, Role, ToolCall, ToolDefinition};
