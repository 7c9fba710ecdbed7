//! Supervisor — a manager loop whose extra tools are other agents.
//!
//! A sub-agent is exposed through [`SubAgentTool`], a plain [`ToolHandler`]
//! taking `{"request": "..."}` and returning the sub-agent's structured
//! result. The supervisor itself is just an [`AgentLoop`] with those tools
//! registered and a preamble asking for an `agent_comment` field.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tools::handler::required_str;
use crate::tools::{ToolError, ToolHandler, ToolRegistry, ToolSpec};

use super::agent_loop::{AgentConfig, AgentLoop, RunReport};
use super::errors::AgentError;
use super::invoker::ModelInvoker;
use super::result_extractor::StructuredResult;

const SUPERVISOR_PREAMBLE: &str = "\
You are supervising this request. Besides the result fields described above, \
add an \"agent_comment\" field to your final JSON: one or two sentences for the \
person who asked, explaining how the result was built and any assumptions made.";

/// Runs a sub-agent as a tool call.
pub struct SubAgentTool {
    agent: Arc<AgentLoop>,
}

impl SubAgentTool {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ToolHandler for SubAgentTool {
    async fn call(&self, args: Value) -> Result<Value, ToolError> {
        let request = required_str(&args, "request")?;
        match self.agent.run(request).await {
            Ok(result) => Ok(Value::Object(result)),
            Err(e) => Err(ToolError::execution(format!("sub-agent failed: {e}"))),
        }
    }
}

/// A named sub-agent the supervisor may delegate to.
pub struct SubAgent {
    pub name: String,
    pub description: String,
    pub agent: Arc<AgentLoop>,
}

impl SubAgent {
    pub fn new(name: impl Into<String>, description: impl Into<String>, agent: AgentLoop) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            agent: Arc::new(agent),
        }
    }

    fn into_tool(self) -> ToolSpec {
        ToolSpec::new(
            self.name,
            self.description,
            json!({
                "type": "object",
                "properties": {
                    "request": {
                        "type": "string",
                        "description": "The request to delegate, in plain language."
                    }
                },
                "required": ["request"]
            }),
            Arc::new(SubAgentTool::new(self.agent)),
        )
    }
}

pub struct Supervisor {
    manager: AgentLoop,
    sub_agents: Vec<String>,
}

impl Supervisor {
    /// Build the manager loop over `tools` plus one tool per sub-agent.
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        mut tools: ToolRegistry,
        sub_agents: Vec<SubAgent>,
        manager_prompt: &str,
        config: AgentConfig,
    ) -> Result<Self, AgentError> {
        let names: Vec<String> = sub_agents.iter().map(|s| s.name.clone()).collect();
        for sub in sub_agents {
            tools.register(sub.into_tool())?;
        }

        let mut prompt = format!("{manager_prompt}\n\n{SUPERVISOR_PREAMBLE}");
        if !names.is_empty() {
            prompt.push_str(&format!(
                "\nYou can delegate to these agents by calling them as tools: {}.",
                names.join(", ")
            ));
        }

        tracing::info!(sub_agents = names.len(), "supervisor assembled");
        Ok(Self {
            manager: AgentLoop::new(invoker, Arc::new(tools), prompt, config),
            sub_agents: names,
        })
    }

    pub fn sub_agent_names(&self) -> &[String] {
        &self.sub_agents
    }

    pub fn manager(&self) -> &AgentLoop {
        &self.manager
    }

    pub async fn run(&self, human_input: &str) -> Result<StructuredResult, AgentError> {
        self.manager.run(human_input).await
    }

    pub async fn execute(&self, human_input: &str) -> RunReport {
        self.manager.execute(human_input).await
    }
}
