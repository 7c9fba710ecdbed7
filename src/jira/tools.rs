//! JQL tools: project resolution, workflow metadata, dates, and validation.
//!
//! All tools share one [`JqlToolContext`], which owns the Jira client and
//! the project filter (category + excluded keys). Registration order is the
//! order the tools are declared to the model.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::try_join_all;
use serde_json::{json, Value};

use crate::config::JiraConfig;
use crate::dates;
use crate::matching::{pre_score, Ranker};
use crate::tools::handler::{optional_str, optional_str_list, required_str};
use crate::tools::{context_tool as tool, think_tool, Lookup, ToolError, ToolRegistry};

use super::client::{JiraApi, ProjectRef};
use super::errors::JiraError;

/// Matches returned by `resolve_project_name`.
const MAX_PROJECT_MATCHES: usize = 5;
/// Local score a project needs to be offered without a ranker.
const MIN_PROJECT_SCORE: f64 = 40.0;
/// Candidates handed to the ranker.
const RANKER_SHORTLIST: usize = 30;

const PROJECT_RANKER_PROMPT: &str = "\
You match human-friendly descriptions to existing Jira project names.
Select the most relevant project names (at most 5) from the provided list.
Output only a JSON array of the selected names, ordered by relevance. No explanations, no markdown.";

/// Shared state behind the JQL tool handlers.
pub struct JqlToolContext {
    api: Arc<dyn JiraApi>,
    project_category: Option<String>,
    excluded_keys: Vec<String>,
    ranker: Option<Arc<dyn Ranker>>,
    today: Option<NaiveDate>,
}

impl JqlToolContext {
    pub fn new(api: Arc<dyn JiraApi>, config: &JiraConfig) -> Self {
        Self {
            api,
            project_category: config.project_category.clone().filter(|c| !c.trim().is_empty()),
            excluded_keys: config.excluded_project_keys.clone(),
            ranker: None,
            today: None,
        }
    }

    /// Re-rank project candidates with an LLM sub-call.
    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Pin "today" for relative dates.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Build the JQL tool registry.
    pub fn into_registry(self) -> Result<ToolRegistry, ToolError> {
        let ctx = Arc::new(self);
        let mut registry = ToolRegistry::new();

        registry.register(think_tool())?;
        registry.register(tool(
            &ctx,
            "parse_jira_date",
            "Convert a date expression into a Jira date YYYY-MM-DD. Accepts keywords \
             ('today', 'yesterday', 'this/last week|month|quarter|year'), shorthands ('-3d', \
             '-2w', '-1m', '-1q', '-1y'), durations ('past 2 quarters', 'updated 3 weeks ago'; \
             week=7, month=30, quarter=90, year=365 days) and absolute dates ('2025-07-01', \
             'July 1, 2025'). Use the returned date verbatim in the JQL.",
            json!({
                "type": "object",
                "properties": {
                    "input_str": {"type": "string", "description": "The date expression."}
                },
                "required": ["input_str"]
            }),
            |ctx, args| async move { ctx.parse_date(&args) },
        ))?;
        registry.register(tool(
            &ctx,
            "resolve_project_name",
            "Resolve a human-friendly project name to Jira project keys. Returns up to 5 \
             matches {key, name, score}, best first.",
            json!({
                "type": "object",
                "properties": {
                    "human_input": {"type": "string", "description": "Project name as the user wrote it."}
                },
                "required": ["human_input"]
            }),
            |ctx, args| async move { ctx.resolve_project_name(&args).await },
        ))?;
        registry.register(tool(
            &ctx,
            "list_issue_type_statuses",
            "List the issue types of one project and the statuses each type can have.",
            json!({
                "type": "object",
                "properties": {
                    "project_key": {"type": "string", "description": "Jira project key, e.g. 'MOB'."}
                },
                "required": ["project_key"]
            }),
            |ctx, args| async move { ctx.list_issue_type_statuses(&args).await },
        ))?;
        registry.register(tool(
            &ctx,
            "resolve_types_and_statuses",
            "Available issue types and statuses across projects. Pass one project_key, a list \
             of project_names, or nothing for all projects.",
            json!({
                "type": "object",
                "properties": {
                    "project_key": {"type": ["string", "null"]},
                    "project_names": {"type": ["array", "string", "null"], "items": {"type": "string"}}
                }
            }),
            |ctx, args| async move { ctx.resolve_types_and_statuses(&args).await },
        ))?;
        registry.register(tool(
            &ctx,
            "list_priorities",
            "List the priority names defined in Jira.",
            json!({"type": "object", "properties": {}}),
            |ctx, _args| async move { ctx.list_priorities().await },
        ))?;
        registry.register(tool(
            &ctx,
            "check_jql",
            "Validate a JQL query against Jira and return an approximate issue count. \
             Always call this before giving the final answer.",
            json!({
                "type": "object",
                "properties": {
                    "jql": {"type": "string", "description": "The complete JQL query."}
                },
                "required": ["jql"]
            }),
            |ctx, args| async move { ctx.check_jql(&args).await },
        ))?;

        Ok(registry)
    }

    // ─── Handlers ────────────────────────────────────────────────────────

    fn parse_date(&self, args: &Value) -> Result<Value, ToolError> {
        let input = required_str(args, "input_str")?;
        let today = self.today.unwrap_or_else(dates::today_utc);
        let resolved = dates::resolve(input, today).map_err(|e| ToolError::execution(e.to_string()))?;
        Ok(json!({"input": input, "date": resolved.iso_date()}))
    }

    async fn resolve_project_name(&self, args: &Value) -> Result<Value, ToolError> {
        let query = required_str(args, "human_input")?;
        let projects = self
            .visible_projects()
            .await
            .map_err(|e| ToolError::execution(format!("Failed to fetch Jira projects: {e}")))?;

        if projects.is_empty() {
            return Err(ToolError::execution(match self.project_category {
                Some(ref category) => format!("No projects found in category '{category}'."),
                None => "No Jira projects are visible to this account.".to_string(),
            }));
        }

        let mut scored: Vec<(f64, ProjectRef)> = projects
            .into_iter()
            .map(|p| (pre_score(query, &p.name).max(pre_score(query, &p.key)), p))
            .collect();
        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.name.cmp(&b.1.name)));

        let ranked = match self.ranker {
            Some(ref ranker) => {
                scored.truncate(RANKER_SHORTLIST);
                rank_projects(ranker.as_ref(), query, &scored).await
            }
            None => None,
        };
        let chosen = ranked.unwrap_or_else(|| {
            scored
                .into_iter()
                .filter(|(score, _)| *score >= MIN_PROJECT_SCORE)
                .collect()
        });

        let matches: Vec<Value> = chosen
            .into_iter()
            .take(MAX_PROJECT_MATCHES)
            .map(|(score, p)| json!({"key": p.key, "name": p.name, "score": score}))
            .collect();
        tracing::debug!(query, matches = matches.len(), "resolved project name");
        Ok(json!({"query": query, "matches": matches}))
    }

    async fn list_issue_type_statuses(&self, args: &Value) -> Result<Value, ToolError> {
        let key = required_str(args, "project_key")?.trim().to_uppercase();
        match Lookup::from_result(self.api.project_statuses(&key).await) {
            Lookup::Transient(e) => Err(ToolError::execution(format!(
                "Failed to retrieve issue-type statuses for project '{key}': {e}"
            ))),
            lookup => Ok(lookup.to_payload("issue_types", json!({"project_key": key}))),
        }
    }

    async fn resolve_types_and_statuses(&self, args: &Value) -> Result<Value, ToolError> {
        let keys = self
            .resolve_keys(optional_str(args, "project_key"), &optional_str_list(args, "project_names"))
            .await
            .map_err(|e| ToolError::execution(format!("Failed to fetch Jira projects: {e}")))?;
        if keys.is_empty() {
            return Err(ToolError::execution("Could not resolve any project keys."));
        }

        let per_project = try_join_all(keys.iter().map(|k| self.api.project_statuses(k)))
            .await
            .map_err(|e| ToolError::execution(format!("Failed to retrieve issue types: {e}")))?;

        let mut issue_types = BTreeSet::new();
        let mut statuses = BTreeSet::new();
        let mut unknown = Vec::new();
        for (key, found) in keys.iter().zip(per_project) {
            match found {
                Some(types) => {
                    for t in types {
                        statuses.extend(t.statuses);
                        issue_types.insert(t.issue_type);
                    }
                }
                None => unknown.push(key.clone()),
            }
        }

        let mut payload = json!({
            "project_keys": keys,
            "available_issue_types": issue_types,
            "available_statuses": statuses,
        });
        if !unknown.is_empty() {
            payload["unknown_project_keys"] = json!(unknown);
        }
        Ok(payload)
    }

    async fn list_priorities(&self) -> Result<Value, ToolError> {
        let priorities = self
            .api
            .list_priorities()
            .await
            .map_err(|e| ToolError::execution(format!("Failed to fetch Jira priorities: {e}")))?;
        Ok(json!({"priorities": priorities}))
    }

    async fn check_jql(&self, args: &Value) -> Result<Value, ToolError> {
        let jql = required_str(args, "jql")?.trim();
        match self.api.approximate_count(jql).await {
            Ok(count) => {
                let mut payload = json!({"jql": jql, "valid": true, "approximate_count": count});
                if count == 0 {
                    payload["note"] =
                        json!("The query is valid but matches no issues; consider relaxing filters.");
                }
                Ok(payload)
            }
            Err(JiraError::Api { status, message }) if (400..500).contains(&status) => {
                tracing::info!(status, error = %message, "Jira rejected JQL");
                Ok(json!({"jql": jql, "valid": false, "error": message}))
            }
            Err(e) => Err(ToolError::execution(format!("Could not validate JQL: {e}"))),
        }
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    /// Projects after applying the category filter and excluded keys.
    async fn visible_projects(&self) -> Result<Vec<ProjectRef>, JiraError> {
        let projects = self.api.list_projects().await?;
        Ok(projects
            .into_iter()
            .filter(|p| !self.excluded_keys.iter().any(|k| k.eq_ignore_ascii_case(&p.key)))
            .filter(|p| match self.project_category {
                Some(ref wanted) => p
                    .category
                    .as_deref()
                    .is_some_and(|c| c.eq_ignore_ascii_case(wanted)),
                None => true,
            })
            .collect())
    }

    async fn resolve_keys(&self, key: Option<&str>, names: &[String]) -> Result<Vec<String>, JiraError> {
        if let Some(key) = key {
            return Ok(vec![key.to_uppercase()]);
        }
        let projects = self.visible_projects().await?;
        if names.is_empty() {
            return Ok(projects.into_iter().map(|p| p.key).collect());
        }
        let mut keys: Vec<String> = Vec::new();
        for name in names {
            let hit = projects
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name) || p.key.eq_ignore_ascii_case(name));
            if let Some(p) = hit {
                if !keys.contains(&p.key) {
                    keys.push(p.key.clone());
                }
            }
        }
        Ok(keys)
    }
}

/// Ask the ranker to order `scored`; `None` when it fails or picks nothing known.
async fn rank_projects(
    ranker: &dyn Ranker,
    query: &str,
    scored: &[(f64, ProjectRef)],
) -> Option<Vec<(f64, ProjectRef)>> {
    let names: Vec<&str> = scored.iter().map(|(_, p)| p.name.as_str()).collect();
    let answer = match ranker
        .rank(PROJECT_RANKER_PROMPT, &json!({"user_input": query, "projects": names}))
        .await
    {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(error = %e, "project ranking failed, using local scores");
            return None;
        }
    };

    let mut picked: Vec<(f64, ProjectRef)> = Vec::new();
    for name in answer.iter().filter_map(|v| v.as_str()) {
        if let Some(hit) = scored.iter().find(|(_, p)| p.name == name) {
            if !picked.iter().any(|(_, p)| p.key == hit.1.key) {
                picked.push(hit.clone());
            }
        }
    }
    (!picked.is_empty()).then_some(picked)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jira::client::testing::FakeJira;
    use crate::matching::testing::FixedRanker;

    fn config() -> JiraConfig {
        JiraConfig {
            base_url: None,
            email: None,
            api_token: None,
            project_category: Some("delivery".into()),
            excluded_project_keys: vec!["ARCH".into()],
        }
    }

    fn registry_with(fake: FakeJira, ranker: Option<Arc<dyn Ranker>>) -> ToolRegistry {
        let mut ctx = JqlToolContext::new(Arc::new(fake), &config())
            .with_today(NaiveDate::from_ymd_opt(2025, 8, 13).unwrap());
        if let Some(r) = ranker {
            ctx = ctx.with_ranker(r);
        }
        ctx.into_registry().unwrap()
    }

    async fn call(registry: &ToolRegistry, name: &str, args: Value) -> Result<Value, ToolError> {
        registry.get(name).unwrap().handler.call(args).await
    }

    #[test]
    fn test_registration_order() {
        let registry = registry_with(FakeJira::sample(), None);
        assert_eq!(
            registry.names(),
            vec![
                "think",
                "parse_jira_date",
                "resolve_project_name",
                "list_issue_type_statuses",
                "resolve_types_and_statuses",
                "list_priorities",
                "check_jql",
            ]
        );
    }

    #[tokio::test]
    async fn test_parse_jira_date() {
        let registry = registry_with(FakeJira::sample(), None);
        let out = call(&registry, "parse_jira_date", json!({"input_str": "last month"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"input": "last month", "date": "2025-07-01"}));

        for (input, date) in [("past 2 quarters", "2025-02-14"), ("updated 3 weeks ago", "2025-07-23")] {
            let out = call(&registry, "parse_jira_date", json!({"input_str": input}))
                .await
                .unwrap();
            assert_eq!(out["date"], date, "{input}");
        }

        let err = call(&registry, "parse_jira_date", json!({"input_str": "whenever"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unrecognized date format: 'whenever'");
    }

    #[tokio::test]
    async fn test_resolve_project_name_filters_and_ranks() {
        let registry = registry_with(FakeJira::sample(), None);
        let out = call(&registry, "resolve_project_name", json!({"human_input": "mobile"}))
            .await
            .unwrap();
        let matches = out["matches"].as_array().unwrap();
        assert_eq!(matches[0]["key"], "MOB");
        assert_eq!(matches[0]["score"], 100.0);
        // Other categories and excluded keys are never offered.
        assert!(matches.iter().all(|m| m["key"] != "HR" && m["key"] != "ARCH"));
    }

    #[tokio::test]
    async fn test_resolve_project_name_no_candidates() {
        let registry = registry_with(FakeJira::sample(), None);
        let out = call(&registry, "resolve_project_name", json!({"human_input": "zzzz"}))
            .await
            .unwrap();
        assert_eq!(out["matches"], json!([]));
    }

    #[tokio::test]
    async fn test_resolve_project_name_empty_category_is_error() {
        let mut fake = FakeJira::sample();
        fake.projects.retain(|p| p.category.as_deref() != Some("Delivery"));
        let registry = registry_with(fake, None);
        let err = call(&registry, "resolve_project_name", json!({"human_input": "mobile"}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "No projects found in category 'delivery'.");
    }

    #[tokio::test]
    async fn test_resolve_project_name_uses_ranker_order() {
        let ranker = Arc::new(FixedRanker::new(vec![
            json!("Payments Core"),
            json!("Not A Project"),
            json!("Mobile Banking App"),
        ]));
        let registry = registry_with(FakeJira::sample(), Some(ranker.clone()));
        let out = call(&registry, "resolve_project_name", json!({"human_input": "card payments"}))
            .await
            .unwrap();
        let keys: Vec<&str> = out["matches"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["key"].as_str().unwrap())
            .collect();
        assert_eq!(keys, vec!["PAY", "MOB"]);
        let offered = &ranker.payloads.lock().unwrap()[0]["projects"];
        assert_eq!(offered.as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_resolve_project_name_ranker_failure_falls_back() {
        let registry = registry_with(FakeJira::sample(), Some(Arc::new(FixedRanker::failing())));
        let out = call(&registry, "resolve_project_name", json!({"human_input": "payments"}))
            .await
            .unwrap();
        assert_eq!(out["matches"][0]["key"], "PAY");
    }

    #[tokio::test]
    async fn test_list_issue_type_statuses() {
        let registry = registry_with(FakeJira::sample(), None);
        let out = call(&registry, "list_issue_type_statuses", json!({"project_key": "mob"}))
            .await
            .unwrap();
        assert_eq!(out["found"], true);
        assert_eq!(out["issue_types"][0]["issue_type"], "Bug");

        let missing = call(&registry, "list_issue_type_statuses", json!({"project_key": "NOPE"}))
            .await
            .unwrap();
        assert_eq!(missing, json!({"project_key": "NOPE", "found": false}));
    }

    #[tokio::test]
    async fn test_list_issue_type_statuses_transport_error() {
        let fake = FakeJira {
            offline: true,
            ..FakeJira::sample()
        };
        let registry = registry_with(fake, None);
        let err = call(&registry, "list_issue_type_statuses", json!({"project_key": "MOB"}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_resolve_types_and_statuses_merges_projects() {
        let registry = registry_with(FakeJira::sample(), None);
        let out = call(
            &registry,
            "resolve_types_and_statuses",
            json!({"project_names": ["mobile banking app", "Payments Core"]}),
        )
        .await
        .unwrap();
        assert_eq!(out["available_issue_types"], json!(["Bug", "Story", "Task"]));
        assert_eq!(
            out["available_statuses"],
            json!(["Backlog", "Done", "In Progress", "Open", "Resolved", "To Do"])
        );
    }

    #[tokio::test]
    async fn test_resolve_types_and_statuses_all_projects_reports_unknown() {
        let registry = registry_with(FakeJira::sample(), None);
        let out = call(&registry, "resolve_types_and_statuses", json!({}))
            .await
            .unwrap();
        // MOBOPS has no workflow data in the fake.
        assert_eq!(out["unknown_project_keys"], json!(["MOBOPS"]));
        assert_eq!(out["project_keys"], json!(["MOB", "PAY", "MOBOPS"]));
    }

    #[tokio::test]
    async fn test_resolve_types_and_statuses_unresolvable_names() {
        let registry = registry_with(FakeJira::sample(), None);
        let err = call(
            &registry,
            "resolve_types_and_statuses",
            json!({"project_names": ["People Team"]}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.to_string(), "Could not resolve any project keys.");
    }

    #[tokio::test]
    async fn test_list_priorities() {
        let registry = registry_with(FakeJira::sample(), None);
        let out = call(&registry, "list_priorities", json!({})).await.unwrap();
        assert_eq!(out["priorities"][0], "Highest");
    }

    #[tokio::test]
    async fn test_check_jql() {
        let registry = registry_with(FakeJira::sample(), None);
        let ok = call(&registry, "check_jql", json!({"jql": "project = MOB"}))
            .await
            .unwrap();
        assert_eq!(ok, json!({"jql": "project = MOB", "valid": true, "approximate_count": 42}));

        let bad = call(&registry, "check_jql", json!({"jql": "INVALID = 1"}))
            .await
            .unwrap();
        assert_eq!(bad["valid"], false);
        assert!(bad["error"].as_str().unwrap().contains("INVALID"));
    }

    #[tokio::test]
    async fn test_check_jql_zero_results_adds_note() {
        let fake = FakeJira {
            count_per_query: 0,
            ..FakeJira::sample()
        };
        let registry = registry_with(fake, None);
        let out = call(&registry, "check_jql", json!({"jql": "project = MOB"}))
            .await
            .unwrap();
        assert_eq!(out["valid"], true);
        assert!(out.get("note").is_some());
    }
}
