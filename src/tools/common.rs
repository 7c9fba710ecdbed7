//! Tools shared by every agent.

use serde_json::{json, Value};

use super::handler::{handler_fn, required_str};
use super::registry::ToolSpec;

/// Scratchpad tool: echoes the model's reasoning back so it stays in the log.
pub fn think_tool() -> ToolSpec {
    ToolSpec::new(
        "think",
        "Write down your reasoning step by step before acting. Has no side effects.",
        json!({
            "type": "object",
            "properties": {
                "thought": {"type": "string", "description": "What you are thinking or planning."}
            },
            "required": ["thought"]
        }),
        handler_fn(|args: Value| async move {
            let thought = required_str(&args, "thought")?;
            Ok(json!(format!("[Thinking] {thought}")))
        }),
    )
}
