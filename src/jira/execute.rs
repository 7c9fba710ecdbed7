//! Run a finished JQL answer against Jira and attach the matching issues.

use serde_json::json;

use crate::agent_core::StructuredResult;
use crate::config::AppConfig;

use super::agent::QUERY_FIELD;
use super::client::{JiraApi, JiraClient};
use super::errors::JiraError;

/// Search the issues for `result["jql"]` and attach them as `rows`.
///
/// An empty query is left alone. A failed search is recorded in
/// `execution_error` so the generated query is still returned.
pub async fn attach_issues(api: &dyn JiraApi, result: &mut StructuredResult, max_rows: usize) {
    let Some(jql) = result
        .get(QUERY_FIELD)
        .and_then(|q| q.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
    else {
        return;
    };

    match api.search_issues(&jql, max_rows).await {
        Ok(rows) => {
            tracing::info!(returned = rows.len(), max_rows, "executed JQL");
            result.insert("returned".into(), json!(rows.len()));
            result.insert("rows".into(), json!(rows));
        }
        Err(e) => {
            tracing::warn!(error = %e, "JQL execution failed");
            result.insert("execution_error".into(), json!(e.to_string()));
        }
    }
}

/// [`attach_issues`] over a client built from the `jira` config section.
pub async fn execute_jql(
    config: &AppConfig,
    result: &mut StructuredResult,
    max_rows: usize,
) -> Result<(), JiraError> {
    let client = JiraClient::from_config(&config.jira)?;
    attach_issues(&client, result, max_rows).await;
    Ok(())
}
