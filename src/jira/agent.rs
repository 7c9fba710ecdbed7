//! The JQL agent: system prompt, tool wiring, and the run entry points.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::agent_core::{
    AgentConfig, AgentError, AgentLoop, ModelInvoker, RunReport, StructuredResult, Supervisor,
};
use crate::config::AppConfig;
use crate::dates::today_utc;
use crate::inference::InferenceClient;
use crate::matching::LlmRanker;
use crate::tools::ToolRegistry;

use super::client::{JiraApi, JiraClient};
use super::tools::JqlToolContext;

/// Tool whose result decides whether a JQL query is usable.
pub const VALIDATION_TOOL: &str = "check_jql";
pub const QUERY_FIELD: &str = "jql";

const JQL_PROMPT_TEMPLATE: &str = r#"You convert natural language requests into valid Jira JQL queries.
Today is {today}.

Core rules:
- Always use tools to resolve project names, date expressions, and available issue types and statuses.
- Never ask the user to clarify; use tools to disambiguate.
- If no project is mentioned, query all projects: call resolve_types_and_statuses without arguments.
- Once the JQL is assembled, call check_jql:
  - If it errors, fix the query and validate again.
  - If it returns 0 results, reconsider the filters (status, date, type).
  - If it is valid with results, answer.

JQL construction:
- Use only project keys and priorities returned by tools. Resolve project names to keys first.
- Use issue types and statuses only after confirming they exist for the project.
- Open / unresolved / incomplete: resolution IN (Unresolved, EMPTY).
- Closed / resolved / completed: resolution NOT IN (Unresolved, EMPTY).
- If filtering only by project, date, or priority, omit the resolution clause.
- Use type IN (...), status IN (...), or their NOT IN forms, and always single-quote list items:
  type IN ('Bug', 'Story'), never type IN (Bug, Story).

Dates:
- Use updated >= when the request mentions updates, changes, or modifications; otherwise created >=.
- Substitute tool outputs verbatim (if parse_jira_date returns "2025-07-02", use 2025-07-02).

Final answer: only this JSON object, no other text:
{"jql": "<generated JQL>", "approx_query_results": <count from check_jql>, "comment": "<short note, or empty>"}"#;

/// The JQL system prompt for `today`.
pub fn jql_system_prompt(today: NaiveDate) -> String {
    JQL_PROMPT_TEMPLATE.replace("{today}", &today.format("%Y-%m-%d").to_string())
}

enum Runner {
    Direct(AgentLoop),
    Supervised(Supervisor),
}

/// A ready-to-run JQL agent, optionally behind a supervisor.
pub struct JqlAgent {
    runner: Runner,
}

impl JqlAgent {
    pub fn new(
        invoker: Arc<dyn ModelInvoker>,
        tools: ToolRegistry,
        config: AgentConfig,
        supervised: bool,
        today: NaiveDate,
    ) -> Result<Self, AgentError> {
        let prompt = jql_system_prompt(today);
        let runner = if supervised {
            Runner::Supervised(Supervisor::new(invoker, tools, Vec::new(), &prompt, config)?)
        } else {
            Runner::Direct(AgentLoop::new(invoker, Arc::new(tools), prompt, config))
        };
        Ok(Self { runner })
    }

    pub async fn execute(&self, request: &str) -> RunReport {
        match self.runner {
            Runner::Direct(ref agent) => agent.execute(request).await,
            Runner::Supervised(ref supervisor) => supervisor.execute(request).await,
        }
    }

    pub async fn run(&self, request: &str) -> Result<StructuredResult, AgentError> {
        self.execute(request).await.result
    }
}

/// Build the JQL agent from application config, wiring the real clients.
pub fn build_jql_agent(config: &AppConfig, supervised: bool) -> Result<JqlAgent, AgentError> {
    let setup = |reason: String| AgentError::Setup { reason };

    let client = InferenceClient::from_config(config.llm.clone()).map_err(|e| setup(e.to_string()))?;
    let jira: Arc<dyn JiraApi> =
        Arc::new(JiraClient::from_config(&config.jira).map_err(|e| setup(e.to_string()))?);

    let tools = JqlToolContext::new(jira, &config.jira)
        .with_ranker(Arc::new(LlmRanker::new(client.clone())))
        .into_registry()?;

    let agent_config = AgentConfig::from_settings(&config.agent).with_validation(
        VALIDATION_TOOL,
        QUERY_FIELD,
        &config.agent,
    );
    let invoker = Arc::new(client.with_parallel_tool_calls(config.agent.parallel_tool_calls));

    tracing::info!(
        model = %config.llm.model,
        supervised,
        max_turns = agent_config.max_turns,
        "JQL agent ready"
    );
    JqlAgent::new(invoker, tools, agent_config, supervised, today_utc())
}

/// Build and run the JQL agent for one request.
pub async fn run_jql_agent(
    config: &AppConfig,
    request: &str,
    supervised: bool,
) -> Result<RunReport, AgentError> {
    let agent = build_jql_agent(config, supervised)?;
    Ok(agent.execute(request).await)
}
