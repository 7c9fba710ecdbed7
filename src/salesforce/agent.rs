//! The SOQL agent: system prompt, tool wiring, and the run entry points.

use std::sync::Arc;

use chrono::NaiveDate;

use crate::agent_core::{AgentConfig, AgentError, AgentLoop, ModelInvoker, RunReport};
use crate::config::AppConfig;
use crate::dates::today_utc;
use crate::inference::InferenceClient;
use crate::matching::LlmRanker;
use crate::tools::ToolRegistry;

use super::client::{SalesforceApi, SalesforceClient};
use super::tools::SoqlToolContext;

/// Tool whose result decides whether a SOQL query is usable.
pub const VALIDATION_TOOL: &str = "validate_soql";
pub const QUERY_FIELD: &str = "soql";

const SOQL_PROMPT_TEMPLATE: &str = r#"You build Salesforce SOQL queries from natural language requests. Be terse.
Today is {today}.

Tool discipline:
- Reuse earlier tool results; never repeat a call with identical arguments.
- Never ask the user to clarify. Make a reasonable choice and record it in notes.

Workflow:
0. Entity resolution. If the request names a specific account or opportunity, call
   pick_best_name_matches(query=<name>, k=3) and filter on the top match:
   - Opportunity match: WHERE Id = '<opportunity_id>'.
   - Account match: WHERE AccountId = '<account_id>' for Opportunity queries,
     WHERE Id = '<account_id>' for Account queries.
1. Call list_core_attribute_names once. Only those attributes may appear in the query.
2. Choose the attributes you need. SELECT only what was asked (default Opportunity.Id, Opportunity.Name).
3. For each attribute used in WHERE or ORDER BY, call get_salesforce_field_schema('<Object>.<Field>')
   with a name from step 1. Use the returned API name, type, and picklist values.
4. Dates. Prefer SOQL date literals (THIS_YEAR, LAST_N_DAYS:30, LAST_QUARTER). Otherwise call
   parse_salesforce_date; use want_datetime=true for datetime fields (CreatedDate, LastModifiedDate).
   Never quote date or datetime values.
5. Stages. Prefer booleans: open means IsClosed = false; won means IsWon = true; lost means
   IsClosed = true AND IsWon = false. For named stages call list_stage_names and use exact values
   with StageName IN (...).
6. Build the minimal SOQL. ORDER BY only sortable fields. LIMIT only when requested.
7. Call validate_soql. If it reports an error, fix the query once and validate again.
   On success use its count as approx_row_count and its sample as sample.
   If no valid query can be formed, return "soql": "" and "approx_row_count": null with the reason in comment.

Final answer: only this JSON object, no other text:
{"soql": "<final SOQL or empty>", "approx_row_count": <number or null>, "resolved_stage_names": [], "sample": {}, "comment": "<reason if soql is empty>", "notes": "<one short sentence, including the chosen entity if any>"}"#;

/// The SOQL system prompt for `today`.
pub fn soql_system_prompt(today: NaiveDate) -> String {
    SOQL_PROMPT_TEMPLATE.replace("{today}", &today.format("%Y-%m-%d").to_string())
}

/// A SOQL agent over an already-built tool registry.
pub fn soql_agent(
    invoker: Arc<dyn ModelInvoker>,
    tools: ToolRegistry,
    config: AgentConfig,
    today: NaiveDate,
) -> AgentLoop {
    AgentLoop::new(invoker, Arc::new(tools), soql_system_prompt(today), config)
}

/// Build the SOQL agent from application config, wiring the real clients.
pub fn build_soql_agent(config: &AppConfig) -> Result<AgentLoop, AgentError> {
    let setup = |reason: String| AgentError::Setup { reason };

    let client = InferenceClient::from_config(config.llm.clone()).map_err(|e| setup(e.to_string()))?;
    let salesforce: Arc<dyn SalesforceApi> =
        Arc::new(SalesforceClient::from_config(&config.salesforce).map_err(|e| setup(e.to_string()))?);

    let tools = SoqlToolContext::new(salesforce)
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
        api_version = %config.salesforce.api_version,
        max_turns = agent_config.max_turns,
        "SOQL agent ready"
    );
    Ok(soql_agent(invoker, tools, agent_config, today_utc()))
}

/// Build and run the SOQL agent for one request.
pub async fn run_soql_agent(config: &AppConfig, request: &str) -> Result<RunReport, AgentError> {
    let agent = build_soql_agent(config)?;
    Ok(agent.execute(request).await)
}
