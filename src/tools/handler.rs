//! The single handler interface every tool implements.
//!
//! A handler is a function of a JSON object that returns a JSON value or a
//! `ToolError`. Handlers own whatever clients they need (injected at
//! construction), so the dispatcher never looks anything up globally.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use super::errors::ToolError;
use super::registry::ToolSpec;

/// Executes one tool call.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Run the tool with already schema-validated arguments.
    async fn call(&self, args: Value) -> Result<Value, ToolError>;
}

/// Adapts an async closure into a [`ToolHandler`].
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        (self.f)(args).await
    }
}

/// Wrap a closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    Arc::new(FnHandler { f })
}

/// Build a tool whose handler receives a shared context alongside its arguments.
pub fn context_tool<C, F, Fut>(
    ctx: &Arc<C>,
    name: &str,
    description: &str,
    schema: Value,
    f: F,
) -> ToolSpec
where
    C: Send + Sync + 'static,
    F: Fn(Arc<C>, Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ToolError>> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    ToolSpec::new(
        name,
        description,
        schema,
        handler_fn(move |args| f(Arc::clone(&ctx), args)),
    )
}

// ─── Argument helpers ────────────────────────────────────────────────────────

/// Read a required string argument.
pub fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| ToolError::execution(format!("missing string argument '{key}'")))
}

/// Read an optional string argument, treating `null` and `""` as absent.
pub fn optional_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Read an optional string list. A bare string is accepted as a one-element list.
pub fn optional_str_list(args: &Value, key: &str) -> Vec<String> {
    match args.get(key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str())
            .map(String::from)
            .collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        _ => Vec::new(),
    }
}

/// Read an optional boolean argument.
pub fn optional_bool(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

/// Read an optional non-negative integer argument.
pub fn optional_usize(args: &Value, key: &str, default: usize) -> usize {
    args.get(key)
        .and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
        })
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_handler_fn_invokes_closure() {
        let handler = handler_fn(|args: Value| async move {
            let thought = required_str(&args, "thought")?.to_string();
            Ok(json!(format!("[Thinking] {thought}")))
        });
        let out = handler.call(json!({"thought": "check dates"})).await.unwrap();
        assert_eq!(out, json!("[Thinking] check dates"));
    }

    #[tokio::test]
    async fn test_handler_fn_propagates_error() {
        let handler = handler_fn(|args: Value| async move {
            required_str(&args, "missing").map(|_| Value::Null)
        });
        let err = handler.call(json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::Execution { .. }));
    }

    #[test]
    fn test_optional_str_list_accepts_bare_string() {
        let args = json!({"project_names": "Mobile"});
        assert_eq!(optional_str_list(&args, "project_names"), vec!["Mobile"]);
        assert!(optional_str_list(&json!({}), "project_names").is_empty());
    }

    #[test]
    fn test_optional_scalars_fall_back_to_default() {
        let args = json!({"active_only": false, "k": 3, "bad": "yes"});
        assert!(!optional_bool(&args, "active_only", true));
        assert!(optional_bool(&args, "bad", true));
        assert_eq!(optional_usize(&args, "k", 5), 3);
        assert_eq!(optional_usize(&json!({"k": 2.0}), "k", 5), 2);
        assert_eq!(optional_usize(&json!({"k": -1}), "k", 5), 5);
    }

    #[test]
    fn test_optional_str_blank_is_none() {
        assert_eq!(optional_str(&json!({"k": "  "}), "k"), None);
        assert_eq!(optional_str(&json!({"k": " PROJ "}), "k"), Some("PROJ"));
    }
}
