//! Tool registry — the fixed, named set of capabilities advertised to the model.
//!
//! Provides:
//! - Registration with duplicate-name rejection
//! - Lookup by name, with edit-distance suggestions for unknown names
//! - Argument validation against each tool's declared schema
//! - Serialization into OpenAI-style tool declarations, in registration order

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::inference::types::{FunctionDefinition, ToolDefinition};

use super::errors::ToolError;
use super::handler::ToolHandler;
use super::schema::validate_arguments;

/// Minimum similarity for a registered name to be suggested.
const SUGGESTION_FLOOR: f64 = 0.3;

/// Maximum number of suggestions attached to an unknown-tool error.
const MAX_SUGGESTIONS: usize = 3;

// ─── ToolSpec ────────────────────────────────────────────────────────────────

/// A registered tool: name, model-facing description, input schema, handler.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub handler: Arc<dyn ToolHandler>,
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: Arc<dyn ToolHandler>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
        }
    }

    /// The declaration sent to the model.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            r#type: "function".to_string(),
            function: FunctionDefinition {
                name: self.name.clone(),
                description: self.description.clone(),
                parameters: self.input_schema.clone(),
            },
        }
    }
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

// ─── ToolRegistry ────────────────────────────────────────────────────────────

/// Ordered tool registry. Built once at startup, read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    /// Tools in registration order (the order they are advertised in).
    tools: Vec<ToolSpec>,
    /// `name → index into tools`.
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. A second tool with the same name is a configuration error.
    pub fn register(&mut self, spec: ToolSpec) -> Result<(), ToolError> {
        if self.index.contains_key(&spec.name) {
            return Err(ToolError::DuplicateTool { name: spec.name });
        }
        self.index.insert(spec.name.clone(), self.tools.len());
        self.tools.push(spec);
        Ok(())
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Look up a tool, producing an `UnknownTool` error with suggestions on a miss.
    pub fn lookup(&self, name: &str) -> Result<&ToolSpec, ToolError> {
        self.get(name).ok_or_else(|| ToolError::UnknownTool {
            name: name.to_string(),
            suggestions: self.find_similar(name, MAX_SUGGESTIONS),
        })
    }

    /// All tools, in registration order.
    pub fn list(&self) -> &[ToolSpec] {
        &self.tools
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate a tool call: tool exists and arguments match its schema.
    pub fn validate_tool_call(
        &self,
        tool_name: &str,
        arguments: &Value,
    ) -> Result<&ToolSpec, ToolError> {
        let spec = self.lookup(tool_name)?;
        validate_arguments(tool_name, &spec.input_schema, arguments)?;
        Ok(spec)
    }

    /// Tool declarations for the chat-completions request.
    pub fn to_definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(ToolSpec::to_definition).collect()
    }

    /// Up to `max_results` registered names most similar to `name`, best first.
    pub fn find_similar(&self, name: &str, max_results: usize) -> Vec<String> {
        let mut scored: Vec<(&str, f64)> = self
            .tools
            .iter()
            .map(|t| (t.name.as_str(), similarity(name, &t.name)))
            .filter(|(_, score)| *score > SUGGESTION_FLOOR)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(max_results);
        scored.into_iter().map(|(n, _)| n.to_string()).collect()
    }
}

// ─── Edit Distance ──────────────────────────────────────────────────────────

/// Levenshtein edit distance over chars.
pub(crate) fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let n = b.len();

    let mut prev: Vec<usize> = (0..=n).collect();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=n {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}

/// Normalized similarity (0.0 = completely different, 1.0 = identical).
pub(crate) fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - (levenshtein(a, b) as f64 / max_len as f64)
}

// ─── Tests ───────────────────────────────────────────────────────────────────
