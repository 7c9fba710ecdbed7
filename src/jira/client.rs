//! Jira Cloud REST client.
//!
//! The read calls the JQL tools need, plus issue search for executing a
//! finished query. [`JiraApi`] is the seam the tools depend on; [`JiraClient`]
//! implements it over `reqwest` with basic auth (account email + API token).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::JiraConfig;

use super::errors::JiraError;

// ─── Constants ───────────────────────────────────────────────────────────────

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Page size for `/project/search`.
const PROJECT_PAGE_SIZE: u32 = 50;

/// Largest page `/search/jql` serves.
const ISSUE_PAGE_SIZE: usize = 100;

const ISSUE_FIELDS: &[&str] = &[
    "summary", "issuetype", "status", "assignee", "created", "updated", "project", "resolution",
    "priority",
];

// ─── Types ───────────────────────────────────────────────────────────────────

/// A project visible to the authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRef {
    pub key: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

/// Statuses available to one issue type in a project's workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueTypeStatuses {
    pub issue_type: String,
    pub statuses: Vec<String>,
}

/// One issue from a search, flattened to display names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueRow {
    pub key: String,
    pub summary: Option<String>,
    pub issue_type: Option<String>,
    pub status: Option<String>,
    pub assignee: Option<String>,
    pub created: Option<String>,
    pub updated: Option<String>,
    pub project: Option<String>,
    pub resolution: Option<String>,
    pub priority: Option<String>,
}

/// Read access to Jira used by the JQL tools.
#[async_trait]
pub trait JiraApi: Send + Sync {
    async fn list_projects(&self) -> Result<Vec<ProjectRef>, JiraError>;

    /// `Ok(None)` when the project does not exist or is not visible.
    async fn project_statuses(&self, key: &str) -> Result<Option<Vec<IssueTypeStatuses>>, JiraError>;

    /// Approximate number of issues matching `jql`. Rejected JQL is an `Api` error.
    async fn approximate_count(&self, jql: &str) -> Result<u64, JiraError>;

    async fn list_priorities(&self) -> Result<Vec<String>, JiraError>;

    /// The first `max_results` issues matching `jql`.
    async fn search_issues(&self, jql: &str, max_results: usize) -> Result<Vec<IssueRow>, JiraError>;
}

// ─── Wire shapes ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProjectPage {
    #[serde(default)]
    values: Vec<WireProject>,
    #[serde(default = "default_true")]
    is_last: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireProject {
    key: String,
    name: String,
    project_category: Option<Named>,
}

#[derive(Deserialize)]
struct Named {
    name: String,
}

#[derive(Deserialize)]
struct WireIssueType {
    name: String,
    #[serde(default)]
    statuses: Vec<Named>,
}

#[derive(Deserialize)]
struct ApproximateCount {
    count: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuePage {
    #[serde(default)]
    issues: Vec<WireIssue>,
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct WireIssue {
    key: String,
    #[serde(default)]
    fields: WireIssueFields,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireIssueFields {
    summary: Option<String>,
    issuetype: Option<Named>,
    status: Option<Named>,
    assignee: Option<WireUser>,
    created: Option<String>,
    updated: Option<String>,
    project: Option<WireProjectKey>,
    resolution: Option<Named>,
    priority: Option<Named>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUser {
    display_name: Option<String>,
}

#[derive(Deserialize)]
struct WireProjectKey {
    key: String,
}

impl From<WireIssue> for IssueRow {
    fn from(issue: WireIssue) -> Self {
        let f = issue.fields;
        Self {
            key: issue.key,
            summary: f.summary,
            issue_type: f.issuetype.map(|n| n.name),
            status: f.status.map(|n| n.name),
            assignee: f.assignee.and_then(|u| u.display_name),
            created: f.created,
            updated: f.updated,
            project: f.project.map(|p| p.key),
            resolution: f.resolution.map(|n| n.name),
            priority: f.priority.map(|n| n.name),
        }
    }
}

fn default_true() -> bool {
    true
}

// ─── JiraClient ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct JiraClient {
    http: HttpClient,
    base_url: String,
    email: String,
    api_token: String,
}

impl JiraClient {
    /// Build a client from the `jira` config section.
    pub fn from_config(config: &JiraConfig) -> Result<Self, JiraError> {
        let missing = |what: &str| JiraError::Config {
            reason: format!("{what} is not set (config `jira` section or environment)"),
        };
        let base_url = config.base_url.clone().ok_or_else(|| missing("base_url"))?;
        let email = config.email.clone().ok_or_else(|| missing("email"))?;
        let api_token = config.api_token.clone().ok_or_else(|| missing("api_token"))?;

        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| JiraError::Config {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            email,
            api_token,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/rest/api/3/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send(&self, request: RequestBuilder, endpoint: &str) -> Result<Value, JiraError> {
        let response = request
            .basic_auth(&self.email, Some(&self.api_token))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| JiraError::Http {
                endpoint: endpoint.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| JiraError::Decode {
            reason: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            tracing::debug!(endpoint, status = status.as_u16(), "Jira request rejected");
            return Err(JiraError::Api {
                status: status.as_u16(),
                message: error_message(status, &body),
            });
        }

        serde_json::from_str(&body).map_err(|e| JiraError::Decode {
            reason: format!("{endpoint}: {e}"),
        })
    }
}

#[async_trait]
impl JiraApi for JiraClient {
    async fn list_projects(&self) -> Result<Vec<ProjectRef>, JiraError> {
        let mut projects = Vec::new();
        let mut start_at: u32 = 0;

        loop {
            let request = self.http.get(self.url("project/search")).query(&[
                ("startAt", start_at.to_string()),
                ("maxResults", PROJECT_PAGE_SIZE.to_string()),
            ]);
            let page: ProjectPage = decode(self.send(request, "project/search").await?)?;
            let fetched = page.values.len() as u32;

            projects.extend(page.values.into_iter().map(|p| ProjectRef {
                key: p.key,
                name: p.name,
                category: p.project_category.map(|c| c.name),
            }));

            if page.is_last || fetched == 0 {
                break;
            }
            start_at += fetched;
        }

        tracing::debug!(count = projects.len(), "listed Jira projects");
        Ok(projects)
    }

    async fn project_statuses(&self, key: &str) -> Result<Option<Vec<IssueTypeStatuses>>, JiraError> {
        let request = self.http.get(self.url(&format!("project/{key}/statuses")));
        let body = match self.send(request, "project/statuses").await {
            Ok(body) => body,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e),
        };
        let types: Vec<WireIssueType> = decode(body)?;
        Ok(Some(
            types
                .into_iter()
                .map(|t| IssueTypeStatuses {
                    issue_type: t.name,
                    statuses: t.statuses.into_iter().map(|s| s.name).collect(),
                })
                .collect(),
        ))
    }

    async fn approximate_count(&self, jql: &str) -> Result<u64, JiraError> {
        let request = self
            .http
            .post(self.url("search/approximate-count"))
            .json(&json!({ "jql": jql }));
        let count: ApproximateCount = decode(self.send(request, "search/approximate-count").await?)?;
        Ok(count.count)
    }

    async fn list_priorities(&self) -> Result<Vec<String>, JiraError> {
        let request = self.http.get(self.url("priority"));
        let priorities: Vec<Named> = decode(self.send(request, "priority").await?)?;
        Ok(priorities.into_iter().map(|p| p.name).collect())
    }

    async fn search_issues(&self, jql: &str, max_results: usize) -> Result<Vec<IssueRow>, JiraError> {
        let mut rows: Vec<IssueRow> = Vec::new();
        let mut page_token: Option<String> = None;

        while rows.len() < max_results {
            let mut body = json!({
                "jql": jql,
                "maxResults": (max_results - rows.len()).min(ISSUE_PAGE_SIZE),
                "fields": ISSUE_FIELDS,
            });
            if let Some(ref token) = page_token {
                body["nextPageToken"] = json!(token);
            }
            let request = self.http.post(self.url("search/jql")).json(&body);
            let page: IssuePage = decode(self.send(request, "search/jql").await?)?;
            let fetched = page.issues.len();
            rows.extend(page.issues.into_iter().map(IssueRow::from));

            match page.next_page_token {
                Some(token) if fetched > 0 => page_token = Some(token),
                _ => break,
            }
        }

        rows.truncate(max_results);
        tracing::debug!(count = rows.len(), "searched Jira issues");
        Ok(rows)
    }
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, JiraError> {
    serde_json::from_value(value).map_err(|e| JiraError::Decode {
        reason: e.to_string(),
    })
}

/// Flatten Jira's `{errorMessages: [...], errors: {field: msg}}` body.
fn error_message(status: StatusCode, body: &str) -> String {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let mut parts: Vec<String> = Vec::new();
    if let Some(ref v) = parsed {
        if let Some(messages) = v.get("errorMessages").and_then(|m| m.as_array()) {
            parts.extend(messages.iter().filter_map(|m| m.as_str()).map(String::from));
        }
        if let Some(errors) = v.get("errors").and_then(|e| e.as_object()) {
            parts.extend(
                errors
                    .iter()
                    .map(|(field, msg)| format!("{field}: {}", msg.as_str().unwrap_or_default())),
            );
        }
    }
    if parts.is_empty() {
        let trimmed = body.trim();
        if trimmed.is_empty() {
            status.canonical_reason().unwrap_or("request failed").to_string()
        } else {
            trimmed.chars().take(500).collect()
        }
    } else {
        parts.join("; ")
    }
}

// ─── Test double ─────────────────────────────────────────────────────────────
