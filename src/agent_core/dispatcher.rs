//! ToolDispatcher — executes the tool calls of one assistant message.
//!
//! Per call: look up → validate arguments → run the handler (with timeout)
//! → convert the outcome into a `ToolResult`. Every failure mode becomes an
//! error result for the model to read; nothing here aborts the loop.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use futures::FutureExt;
use serde_json::{json, Value};

use crate::tools::{ToolError, ToolRegistry};

use super::message::{ToolCall, ToolResult};

// ─── ToolDispatcher ─────────────────────────────────────────────────────────

/// Dispatches tool calls against a shared, read-only registry.
#[derive(Debug, Clone)]
pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    /// Per-handler timeout. `None` waits indefinitely.
    timeout: Option<Duration>,
    /// Run the calls of one turn concurrently.
    parallel: bool,
}

impl ToolDispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: None,
            parallel: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    // ─── Dispatch ───────────────────────────────────────────────────────

    /// Execute a batch of tool calls. Returns one result per call, in call order.
    pub async fn dispatch(&self, tool_calls: &[ToolCall]) -> Vec<ToolResult> {
        if self.parallel && tool_calls.len() > 1 {
            // join_all yields outputs in input order regardless of completion order.
            return join_all(tool_calls.iter().map(|tc| self.dispatch_single(tc))).await;
        }

        let mut results = Vec::with_capacity(tool_calls.len());
        for tc in tool_calls {
            results.push(self.dispatch_single(tc).await);
        }
        results
    }

    /// Dispatch one call: validate → execute → convert.
    pub async fn dispatch_single(&self, tool_call: &ToolCall) -> ToolResult {
        let start = Instant::now();
        let arguments = match &tool_call.arguments {
            Value::Null => json!({}),
            other => other.clone(),
        };

        let outcome = match self.registry.validate_tool_call(&tool_call.name, &arguments) {
            Ok(spec) => self.execute(&spec.name, spec.handler.call(arguments)).await,
            Err(e) => Err(e),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match outcome {
            Ok(payload) => {
                tracing::info!(
                    tool = %tool_call.name,
                    id = %tool_call.id,
                    elapsed_ms,
                    "tool call succeeded"
                );
                ToolResult::success(tool_call, payload)
            }
            Err(e) => {
                tracing::warn!(
                    tool = %tool_call.name,
                    id = %tool_call.id,
                    elapsed_ms,
                    error = %e,
                    "tool call failed"
                );
                ToolResult::error(tool_call, e.to_payload())
            }
        }
    }

    /// Run a handler future under the timeout, converting panics into errors.
    async fn execute<F>(&self, tool: &str, fut: F) -> Result<Value, ToolError>
    where
        F: std::future::Future<Output = Result<Value, ToolError>>,
    {
        let guarded = AssertUnwindSafe(fut).catch_unwind();
        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, guarded).await {
                Ok(r) => r,
                Err(_) => {
                    return Err(ToolError::Timeout {
                        tool: tool.to_string(),
                        timeout_ms: limit.as_millis() as u64,
                    })
                }
            },
            None => guarded.await,
        };

        joined.unwrap_or_else(|panic| {
            let msg = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "handler panicked".to_string());
            Err(ToolError::execution(format!("tool '{tool}' panicked: {msg}")))
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
