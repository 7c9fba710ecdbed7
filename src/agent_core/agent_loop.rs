//! AgentLoop — the invoke → route → dispatch state machine.
//!
//! ```text
//! Init → Invoking → Routing ─┬─ Continue → Dispatching → Invoking …
//!                            └─ Terminate → Terminated
//! Dispatching → Aborted   (turn budget spent)
//! Invoking    → Aborted   (invoker failed or timed out)
//! ```
//!
//! Tool failures are data: they go back to the model as error results. The
//! designated validation tool is the one exception with a bounded policy:
//! after `max_retries` regenerate-and-revalidate rounds the run finalizes
//! with an empty query and a diagnostic comment.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::config::AgentSettings;
use crate::inference::{InferenceError, ToolDefinition};
use crate::tools::ToolRegistry;

use super::conversation::ConversationState;
use super::dispatcher::ToolDispatcher;
use super::errors::AgentError;
use super::invoker::ModelInvoker;
use super::message::{AssistantMessage, ToolResult};
use super::result_extractor::{extract, StructuredResult};
use super::router::{route, Route};

/// Hint attached to a failed validation result while a retry remains.
const RETRY_HINT: &str = "Regenerate the query once and validate again.";

// ─── Configuration ──────────────────────────────────────────────────────────

/// Which tool validates generated queries, and how often a failure may be retried.
#[derive(Debug, Clone)]
pub struct ValidationPolicy {
    pub tool_name: String,
    /// Result field holding the query (`jql` / `soql`).
    pub query_field: String,
    pub max_retries: u32,
}

impl ValidationPolicy {
    pub fn new(tool_name: impl Into<String>, query_field: impl Into<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            query_field: query_field.into(),
            max_retries: 1,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// Per-run limits.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model invocations allowed before the run is aborted.
    pub max_turns: u32,
    pub model_timeout: Option<Duration>,
    pub tool_timeout: Option<Duration>,
    pub parallel_tools: bool,
    pub validation: Option<ValidationPolicy>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_turns: 12,
            model_timeout: None,
            tool_timeout: None,
            parallel_tools: false,
            validation: None,
        }
    }
}

impl AgentConfig {
    pub fn from_settings(settings: &AgentSettings) -> Self {
        let secs = |s: u64| (s > 0).then(|| Duration::from_secs(s));
        Self {
            max_turns: settings.max_turns.max(1),
            model_timeout: secs(settings.model_timeout_secs),
            tool_timeout: secs(settings.tool_timeout_secs),
            parallel_tools: settings.parallel_tool_calls,
            validation: None,
        }
    }

    /// Attach a validation policy, taking the retry budget from `settings`.
    pub fn with_validation(
        mut self,
        tool_name: &str,
        query_field: &str,
        settings: &AgentSettings,
    ) -> Self {
        self.validation = Some(
            ValidationPolicy::new(tool_name, query_field)
                .with_max_retries(settings.validation_retries),
        );
        self
    }
}

// ─── State ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Init,
    Invoking,
    Routing,
    Dispatching,
    Terminated,
    Aborted,
}

/// Everything a run produced, including the log for tracing.
#[derive(Debug)]
pub struct RunReport {
    pub conversation: ConversationState,
    /// Model invocations performed.
    pub turns: u32,
    pub final_state: AgentState,
    pub result: Result<StructuredResult, AgentError>,
}

// ─── AgentLoop ──────────────────────────────────────────────────────────────

/// Drives one conversation per call; safe to share across concurrent runs.
pub struct AgentLoop {
    invoker: Arc<dyn ModelInvoker>,
    dispatcher: ToolDispatcher,
    tool_definitions: Vec<ToolDefinition>,
    system_prompt: String,
    config: AgentConfig,
}

impl AgentLoop {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        registry: Arc<ToolRegistry>,
        system_prompt: impl Into<String>,
        config: AgentConfig,
    ) -> Self {
        let tool_definitions = registry.to_definitions();
        let mut dispatcher = ToolDispatcher::new(registry).with_parallel(config.parallel_tools);
        if let Some(limit) = config.tool_timeout {
            dispatcher = dispatcher.with_timeout(limit);
        }
        Self {
            invoker,
            dispatcher,
            tool_definitions,
            system_prompt: system_prompt.into(),
            config,
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.dispatcher.registry()
    }

    /// Run one request to completion and return the structured result.
    pub async fn run(&self, human_input: &str) -> Result<StructuredResult, AgentError> {
        self.execute(human_input).await.result
    }

    /// Run one request on a fresh conversation.
    pub async fn execute(&self, human_input: &str) -> RunReport {
        self.execute_with(ConversationState::new(), human_input).await
    }

    /// Run one request, continuing from `conversation`.
    pub async fn execute_with(
        &self,
        mut conversation: ConversationState,
        human_input: &str,
    ) -> RunReport {
        let mut state = AgentState::Init;
        let mut turns: u32 = 0;
        let mut validation_failures: u32 = 0;
        // Most recent (query, error) the validation tool rejected.
        let mut last_rejected: Option<(String, String)> = None;

        if conversation.ensure_system_prompt(&self.system_prompt) {
            tracing::debug!("system prompt injected");
        }
        conversation.push_human(human_input);

        let result = loop {
            // ── Invoking
            enter(&mut state, AgentState::Invoking, turns);
            debug_assert!(conversation.unanswered_tool_calls().is_empty());
            let reply = match self.invoke(&conversation).await {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(turn = turns + 1, error = %e, "model invocation failed");
                    enter(&mut state, AgentState::Aborted, turns);
                    break Err(AgentError::Invoker(e));
                }
            };
            conversation.push_assistant(reply);
            turns += 1;

            // ── Routing
            enter(&mut state, AgentState::Routing, turns);
            let calls = match route(conversation.messages()) {
                Ok(Route::Continue(calls)) => calls.to_vec(),
                Ok(Route::Terminate) => {
                    enter(&mut state, AgentState::Terminated, turns);
                    break self.finish(&conversation, last_rejected.as_ref(), validation_failures);
                }
                Err(e) => {
                    enter(&mut state, AgentState::Aborted, turns);
                    break Err(e);
                }
            };

            // ── Dispatching
            enter(&mut state, AgentState::Dispatching, turns);
            tracing::info!(
                turn = turns,
                tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "dispatching tool calls"
            );
            let mut exhausted: Option<(String, Option<Value>)> = None;
            let results = self.dispatcher.dispatch(&calls).await;
            for (call, mut result) in calls.iter().zip(results) {
                if let Some(policy) = self.validation_policy_for(&result) {
                    let attempted = result
                        .payload
                        .get(&policy.query_field)
                        .or_else(|| call.arguments.get(&policy.query_field))
                        .cloned();
                    match validation_error(&result) {
                        None => last_rejected = None,
                        Some(error) => {
                            validation_failures += 1;
                            if let Some(query) = attempted.as_ref().and_then(Value::as_str) {
                                last_rejected = Some((query.trim().to_string(), error.clone()));
                            }
                            if validation_failures > policy.max_retries {
                                exhausted = Some((error, attempted));
                            } else {
                                tracing::info!(
                                    attempt = validation_failures,
                                    error = %error,
                                    "query failed validation, allowing a retry"
                                );
                                attach_retry_hint(&mut result);
                            }
                        }
                    }
                }
                conversation.push_tool_result(result);
            }

            if let (Some((error, attempted)), Some(policy)) =
                (exhausted, self.config.validation.as_ref())
            {
                tracing::warn!(
                    failures = validation_failures,
                    error = %error,
                    "query failed validation after retry, giving up"
                );
                enter(&mut state, AgentState::Terminated, turns);
                break Ok(failed_validation_result(
                    policy,
                    validation_failures,
                    &error,
                    attempted,
                ));
            }

            if turns >= self.config.max_turns {
                tracing::warn!(turns, max_turns = self.config.max_turns, "turn budget exhausted");
                enter(&mut state, AgentState::Aborted, turns);
                break Err(AgentError::Aborted { turns });
            }
        };

        RunReport {
            conversation,
            turns,
            final_state: state,
            result,
        }
    }

    async fn invoke(
        &self,
        conversation: &ConversationState,
    ) -> Result<AssistantMessage, InferenceError> {
        let call = self
            .invoker
            .invoke(conversation.messages(), &self.tool_definitions);
        match self.config.model_timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| {
                InferenceError::Timeout {
                    duration_secs: limit.as_secs(),
                }
            })?,
            None => call.await,
        }
    }

    /// Extract the final answer. An answer that repeats the last rejected
    /// query without revalidating it is finalized as a failed validation.
    fn finish(
        &self,
        conversation: &ConversationState,
        last_rejected: Option<&(String, String)>,
        attempts: u32,
    ) -> Result<StructuredResult, AgentError> {
        let last = conversation
            .last_assistant()
            .ok_or(AgentError::EmptyConversation)?;
        let extracted = match extract(last) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "final answer had no extractable JSON");
                return Err(e);
            }
        };

        if let (Some(policy), Some((query, error))) = (self.config.validation.as_ref(), last_rejected) {
            let answered = extracted
                .get(&policy.query_field)
                .and_then(Value::as_str)
                .map(str::trim)
                .unwrap_or_default();
            if !answered.is_empty() && answered == query {
                tracing::warn!(error = %error, "final answer reuses a rejected query");
                return Ok(failed_validation_result(policy, attempts, error, Some(json!(query))));
            }
        }
        Ok(extracted)
    }

    /// The validation policy if `result` came from the validation tool.
    fn validation_policy_for(&self, result: &ToolResult) -> Option<&ValidationPolicy> {
        self.config
            .validation
            .as_ref()
            .filter(|policy| result.tool_name == policy.tool_name)
    }
}

/// The error message if a validation result reports a rejected query.
fn validation_error(result: &ToolResult) -> Option<String> {
    let error = result.payload.get("error").filter(|e| !e.is_null());
    let rejected = result.payload.get("valid") == Some(&Value::Bool(false));
    if !result.is_error() && !rejected && error.is_none() {
        return None;
    }
    Some(match error {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "validation failed".to_string(),
    })
}

fn enter(state: &mut AgentState, next: AgentState, turn: u32) {
    tracing::debug!(from = ?*state, to = ?next, turn, "agent state");
    *state = next;
}

fn attach_retry_hint(result: &mut ToolResult) {
    if let Value::Object(map) = &mut result.payload {
        map.insert("retry".into(), json!(RETRY_HINT));
    } else {
        let inner = std::mem::take(&mut result.payload);
        result.payload = json!({"result": inner, "retry": RETRY_HINT});
    }
}

/// The result returned when the validation retry budget is spent.
fn failed_validation_result(
    policy: &ValidationPolicy,
    attempts: u32,
    error: &str,
    attempted: Option<Value>,
) -> StructuredResult {
    let mut out = StructuredResult::new();
    out.insert(policy.query_field.clone(), json!(""));
    out.insert(
        "comment".into(),
        json!(format!("query failed validation: {error}")),
    );
    out.insert("validation_attempts".into(), json!(attempts));
    out.insert("validation_error".into(), json!(error));
    if let Some(q) = attempted.filter(|q| q.as_str().is_some_and(|s| !s.is_empty())) {
        out.insert("last_attempted_query".into(), q);
    }
    out
}

// ─── Tests ──────────────────────────────────────────────────────────────────
