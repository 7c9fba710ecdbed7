//! SOQL tools: dates, stage names, allow-listed schema, entity matching,
//! owner names, and validation.
//!
//! Registration order is the order the tools are declared to the model.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, LazyLock};

use chrono::NaiveDate;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};

use crate::dates;
use crate::matching::{pre_score, Ranker};
use crate::tools::handler::{optional_bool, optional_usize, required_str};
use crate::tools::{context_tool as tool, think_tool, ToolError, ToolRegistry};

use super::client::{QueryResult, Record, SalesforceApi};
use super::core_schema::{CoreSchema, FieldLookup};
use super::errors::SalesforceError;

/// Rows per object requested from SOSL and `LIKE` searches.
const MAX_PER_TYPE: usize = 400;
/// Candidates kept after local scoring.
const SHORTLIST_CAP: usize = 80;
const DEFAULT_MATCHES: usize = 5;
/// Ids per `WHERE Id IN (...)` query.
const OWNER_CHUNK: usize = 200;
const USER_ID_PREFIX: &str = "005";

const NAME_RANKER_PROMPT: &str = "\
Rank candidate names by similarity to the user query.
Return ONLY a JSON array with objects: {account_id, opportunity_id, name, type, match_score}.
match_score is 0-100. Sort by match_score desc. No extra text.";

static LIMIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\blimit\s+\d+\b").expect("valid limit regex"));

/// Whether `soql` already carries a `LIMIT` clause.
pub(crate) fn has_limit(soql: &str) -> bool {
    LIMIT_RE.is_match(soql)
}

/// `SELECT ... FROM obj [WHERE ...] [ORDER BY ...] [LIMIT n]`.
static SIMPLE_SELECT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?is)^\s*select\s+.+?\s+from\s+(\w+)\s*(where\s+.+?)?\s*(order\s+by\s+.+?)?\s*(limit\s+\d+)?\s*$",
    )
    .expect("valid select regex")
});

/// One entity match. Account rows carry only `account_id`; opportunity rows
/// carry both ids.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NameMatch {
    pub account_id: Option<String>,
    pub opportunity_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub match_score: f64,
}

impl NameMatch {
    fn from_record(object_type: &str, fields: &Record) -> Option<Self> {
        let text = |key: &str| {
            fields
                .get(key)
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(String::from)
        };
        let name = text("Name")?;
        let (account_id, opportunity_id) = match object_type {
            "Account" => (text("Id"), None),
            "Opportunity" => (text("AccountId"), text("Id")),
            _ => return None,
        };
        Some(Self {
            account_id,
            opportunity_id,
            name,
            object_type: object_type.to_string(),
            match_score: 0.0,
        })
    }

    fn key(&self) -> (Option<&str>, Option<&str>, &str) {
        (
            self.account_id.as_deref(),
            self.opportunity_id.as_deref(),
            self.object_type.as_str(),
        )
    }
}

/// Shared state behind the SOQL tool handlers.
pub struct SoqlToolContext {
    api: Arc<dyn SalesforceApi>,
    schema: CoreSchema,
    ranker: Option<Arc<dyn Ranker>>,
    today: Option<NaiveDate>,
}

impl SoqlToolContext {
    pub fn new(api: Arc<dyn SalesforceApi>) -> Self {
        Self {
            schema: CoreSchema::new(Arc::clone(&api)),
            api,
            ranker: None,
            today: None,
        }
    }

    /// Re-rank name matches with an LLM sub-call.
    pub fn with_ranker(mut self, ranker: Arc<dyn Ranker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Pin "today" for relative dates.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = Some(today);
        self
    }

    /// Build the SOQL tool registry.
    pub fn into_registry(self) -> Result<ToolRegistry, ToolError> {
        let ctx = Arc::new(self);
        let mut registry = ToolRegistry::new();

        registry.register(think_tool())?;
        registry.register(tool(
            &ctx,
            "parse_salesforce_date",
            "Convert a date expression into a SOQL date (YYYY-MM-DD) or datetime \
             (YYYY-MM-DDT00:00:00Z). Accepts keywords ('today', 'yesterday', \
             'this/last week|month|quarter|year'), shorthands ('-30d', '-2w', '-1m', '-1q', '-1y'), \
             durations ('past 2 quarters', '3 weeks ago'; week=7, month=30, quarter=90, year=365 \
             days) and absolute dates ('2025-07-01', 'July 1, 2025'). Relative expressions also \
             return the equivalent SOQL date literal in `literal`.",
            json!({
                "type": "object",
                "properties": {
                    "natural_input": {"type": "string", "description": "The date expression."},
                    "want_datetime": {"type": "boolean", "description": "Return a datetime (for CreatedDate, LastModifiedDate)."}
                },
                "required": ["natural_input"]
            }),
            |ctx, args| async move { ctx.parse_date(&args) },
        ))?;
        registry.register(tool(
            &ctx,
            "list_stage_names",
            "List the Opportunity stage names, in pipeline order.",
            json!({
                "type": "object",
                "properties": {
                    "active_only": {"type": "boolean", "description": "Only active stages (default true)."}
                }
            }),
            |ctx, args| async move { ctx.list_stage_names(&args).await },
        ))?;
        registry.register(tool(
            &ctx,
            "get_salesforce_field_schema",
            "Compact schema for ONE allow-listed field, given as '<Object>.<Field>' \
             (e.g. 'Opportunity.StageName'). Returns type, filterable/sortable flags, \
             active picklist values, and references.",
            json!({
                "type": "object",
                "properties": {
                    "field_api": {"type": "string", "description": "'<Object>.<Field>' from list_core_attribute_names."}
                },
                "required": ["field_api"]
            }),
            |ctx, args| async move { ctx.field_schema(&args).await },
        ))?;
        registry.register(tool(
            &ctx,
            "list_core_attribute_names",
            "List the allow-listed attributes, e.g. ['Account.BillingCountry', 'Opportunity.StageName']. \
             Only these may be used in queries.",
            json!({"type": "object", "properties": {}}),
            |ctx, _args| async move { ctx.list_core_attribute_names().await },
        ))?;
        registry.register(tool(
            &ctx,
            "pick_best_name_matches",
            "Find the Accounts and Opportunities whose name best matches a free-text name. \
             Returns rows {account_id, opportunity_id, name, type, match_score}, best first.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "The account or opportunity name as written."},
                    "k": {"type": "integer", "minimum": 1, "description": "Maximum rows (default 5)."},
                    "force": {"type": "boolean", "description": "Fall back to recent records when nothing matches (default true)."}
                },
                "required": ["query"]
            }),
            |ctx, args| async move { ctx.pick_best_name_matches(&args).await },
        ))?;
        registry.register(tool(
            &ctx,
            "resolve_owner_names",
            "Translate OwnerId values into [{id, name}] pairs. Users (005...) and \
             groups/queues are supported; unknown ids get name null.",
            json!({
                "type": "object",
                "properties": {
                    "owner_ids": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["owner_ids"]
            }),
            |ctx, args| async move { ctx.resolve_owner_names(&args).await },
        ))?;
        registry.register(tool(
            &ctx,
            "validate_soql",
            "Run the SOQL with LIMIT 1 to validate it and estimate the row count. \
             Always call this before giving the final answer.",
            json!({
                "type": "object",
                "properties": {
                    "soql": {"type": "string", "description": "The complete SOQL query."}
                },
                "required": ["soql"]
            }),
            |ctx, args| async move { ctx.validate_soql(&args).await },
        ))?;

        Ok(registry)
    }

    // ─── Handlers ────────────────────────────────────────────────────────

    fn parse_date(&self, args: &Value) -> Result<Value, ToolError> {
        let input = required_str(args, "natural_input")?;
        let today = self.today.unwrap_or_else(dates::today_utc);
        let resolved = dates::resolve(input, today).map_err(|e| ToolError::execution(e.to_string()))?;
        let date = if optional_bool(args, "want_datetime", false) {
            resolved.iso_datetime()
        } else {
            resolved.iso_date()
        };
        let mut payload = json!({"input": input, "date": date});
        if let Some(literal) = resolved.soql_literal {
            payload["literal"] = json!(literal);
        }
        Ok(payload)
    }

    async fn list_stage_names(&self, args: &Value) -> Result<Value, ToolError> {
        let active_only = optional_bool(args, "active_only", true);
        let filter = if active_only { " WHERE IsActive = true" } else { "" };
        let soql = format!("SELECT MasterLabel FROM OpportunityStage{filter} ORDER BY SortOrder");

        let from_stages: Vec<String> = match self.api.query(&soql).await {
            Ok(result) => result
                .records
                .iter()
                .filter_map(|r| r.get("MasterLabel").and_then(Value::as_str))
                .map(String::from)
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "OpportunityStage query failed, using StageName picklist");
                Vec::new()
            }
        };
        if !from_stages.is_empty() {
            return Ok(json!({"stage_names": from_stages}));
        }

        let fields = self.schema.describe("Opportunity").await.map_err(describe_error)?;
        let stage = fields
            .iter()
            .find(|f| f.name == "StageName")
            .ok_or_else(|| ToolError::execution("StageName field not found on Opportunity."))?;
        let names: Vec<&str> = stage
            .picklist_values
            .iter()
            .filter(|v| !active_only || v.active)
            .map(|v| v.value.as_str())
            .collect();
        Ok(json!({"stage_names": names}))
    }

    async fn field_schema(&self, args: &Value) -> Result<Value, ToolError> {
        let field_api = required_str(args, "field_api")?;
        let lookup = self.schema.lookup(field_api).await.map_err(describe_error)?;
        Ok(match lookup {
            FieldLookup::Found {
                object,
                attribute,
                schema,
            } => json!({
                "object": object,
                "field": schema.api,
                "attribute": attribute,
                "schema": schema,
            }),
            FieldLookup::NotAllowed { object, field } => json!({
                "object": object,
                "field": field,
                "error": "Field not in allow-list.",
            }),
            FieldLookup::BadFormat => json!({
                "field": field_api.trim(),
                "error": "Use '<Object>.<Field>' format, e.g., 'Account.BillingCountry'.",
            }),
        })
    }

    async fn list_core_attribute_names(&self) -> Result<Value, ToolError> {
        let names = self.schema.attribute_names().await.map_err(describe_error)?;
        Ok(json!(names))
    }

    async fn pick_best_name_matches(&self, args: &Value) -> Result<Value, ToolError> {
        let query = required_str(args, "query")?;
        let k = optional_usize(args, "k", DEFAULT_MATCHES).max(1);
        let force = optional_bool(args, "force", true);

        let term = sosl_term(query);
        if term.is_empty() {
            return Ok(json!([]));
        }

        let candidates = self.gather_candidates(&term, force).await;
        let shortlist = shortlist(query, candidates);
        if shortlist.is_empty() {
            tracing::debug!(query, "no name candidates");
            return Ok(json!([]));
        }

        let ranked = match self.ranker {
            Some(ref ranker) => rank_matches(ranker.as_ref(), query, k, &shortlist).await,
            None => None,
        };
        let rows = ranked.unwrap_or_else(|| shortlist.into_iter().take(k).collect());
        tracing::debug!(query, rows = rows.len(), "picked name matches");
        Ok(json!(rows))
    }

    async fn resolve_owner_names(&self, args: &Value) -> Result<Value, ToolError> {
        let ids: Vec<&str> = match args.get("owner_ids") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.as_str()],
            _ => Vec::new(),
        };

        let mut seen = HashSet::new();
        let unique: Vec<&str> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();
        let (users, groups): (Vec<&str>, Vec<&str>) =
            unique.into_iter().partition(|id| id.starts_with(USER_ID_PREFIX));

        let mut names: HashMap<String, Value> = HashMap::new();
        self.names_by_id("User", &users, &mut names).await;
        self.names_by_id("Group", &groups, &mut names).await;

        let rows: Vec<Value> = ids
            .iter()
            .map(|id| json!({"id": id, "name": names.get(*id).cloned().unwrap_or(Value::Null)}))
            .collect();
        Ok(json!(rows))
    }

    async fn validate_soql(&self, args: &Value) -> Result<Value, ToolError> {
        let soql = required_str(args, "soql")?.trim();
        let test_query = if has_limit(soql) {
            soql.to_string()
        } else {
            format!("{soql} LIMIT 1")
        };

        let sample = match self.api.query(&test_query).await {
            Ok(result) => result.records.into_iter().next(),
            Err(e @ SalesforceError::Api { status, .. }) if (400..500).contains(&status) => {
                let error = e.to_string();
                tracing::info!(status, error = %error, "Salesforce rejected SOQL");
                return Ok(json!({
                    "soql": soql,
                    "valid": false,
                    "sample": null,
                    "count": null,
                    "error": error,
                }));
            }
            Err(e) => return Err(ToolError::execution(format!("Could not validate SOQL: {e}"))),
        };

        let count = match count_query(soql) {
            Some(count_soql) => match self.api.query(&count_soql).await {
                Ok(QueryResult { total_size, .. }) => Some(total_size),
                Err(e) => {
                    tracing::warn!(error = %e, query = %count_soql, "count query failed");
                    None
                }
            },
            None => None,
        };

        Ok(json!({
            "soql": soql,
            "valid": true,
            "sample": sample,
            "count": count,
            "error": null,
        }))
    }

    // ─── Helpers ─────────────────────────────────────────────────────────

    /// SOSL prefix search, then fuzzy SOSL, then `LIKE`, then (with `force`)
    /// the most recently modified records.
    async fn gather_candidates(&self, term: &str, force: bool) -> Vec<NameMatch> {
        let returning = format!(
            "Account(Id, Name ORDER BY Name LIMIT {MAX_PER_TYPE}), \
             Opportunity(Id, Name, AccountId ORDER BY Name LIMIT {MAX_PER_TYPE})"
        );

        for pattern in [format!("{term}*"), format!("{term}~")] {
            let sosl = format!("FIND {{{pattern}}} IN NAME FIELDS RETURNING {returning}");
            match self.api.search(&sosl).await {
                Ok(hits) => {
                    let found: Vec<NameMatch> = hits
                        .iter()
                        .filter_map(|h| NameMatch::from_record(&h.object_type, &h.fields))
                        .collect();
                    if !found.is_empty() {
                        return found;
                    }
                }
                Err(e) => tracing::warn!(error = %e, "SOSL name search failed"),
            }
        }

        let like = escape_literal(&format!("%{term}%"));
        let found = self
            .query_candidates(&[
                format!("SELECT Id, Name FROM Account WHERE Name LIKE '{like}' ORDER BY Name LIMIT {MAX_PER_TYPE}"),
                format!(
                    "SELECT Id, Name, AccountId FROM Opportunity WHERE Name LIKE '{like}' ORDER BY Name LIMIT {MAX_PER_TYPE}"
                ),
            ])
            .await;
        if !found.is_empty() || !force {
            return found;
        }

        self.query_candidates(&[
            format!(
                "SELECT Id, Name FROM Account WHERE Name != NULL ORDER BY LastModifiedDate DESC LIMIT {MAX_PER_TYPE}"
            ),
            format!(
                "SELECT Id, Name, AccountId FROM Opportunity WHERE Name != NULL ORDER BY LastModifiedDate DESC LIMIT {MAX_PER_TYPE}"
            ),
        ])
        .await
    }

    /// Run `[account_query, opportunity_query]`, ignoring failures.
    async fn query_candidates(&self, queries: &[String; 2]) -> Vec<NameMatch> {
        let mut found = Vec::new();
        for (object_type, soql) in ["Account", "Opportunity"].iter().zip(queries) {
            match self.api.query(soql).await {
                Ok(result) => found.extend(
                    result
                        .records
                        .iter()
                        .filter_map(|r| NameMatch::from_record(object_type, r)),
                ),
                Err(e) => tracing::warn!(error = %e, object = object_type, "name query failed"),
            }
        }
        found
    }

    async fn names_by_id(&self, object: &str, ids: &[&str], names: &mut HashMap<String, Value>) {
        for chunk in ids.chunks(OWNER_CHUNK) {
            let in_list = chunk
                .iter()
                .map(|id| format!("'{}'", escape_literal(id)))
                .collect::<Vec<_>>()
                .join(",");
            let soql = format!("SELECT Id, Name FROM {object} WHERE Id IN ({in_list})");
            match self.api.query(&soql).await {
                Ok(result) => {
                    for record in result.records {
                        if let Some(id) = record.get("Id").and_then(Value::as_str) {
                            let name = record.get("Name").cloned().unwrap_or(Value::Null);
                            names.insert(id.to_string(), name);
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, object, "owner name lookup failed"),
            }
        }
    }
}

/// Dedupe by (account_id, opportunity_id, type), pre-score, and keep the best.
fn shortlist(query: &str, candidates: Vec<NameMatch>) -> Vec<NameMatch> {
    let mut seen = HashSet::new();
    let mut unique: Vec<NameMatch> = Vec::new();
    for mut c in candidates {
        let key = (c.account_id.clone(), c.opportunity_id.clone(), c.object_type.clone());
        if !seen.insert(key) {
            continue;
        }
        c.match_score = pre_score(query, &c.name);
        unique.push(c);
    }
    unique.sort_by(|a, b| {
        b.match_score
            .total_cmp(&a.match_score)
            .then_with(|| a.object_type.cmp(&b.object_type))
            .then_with(|| a.name.cmp(&b.name))
    });
    unique.truncate(SHORTLIST_CAP);
    unique
}

/// Ranker rows that refer to a shortlisted candidate, scores clamped to 0..=100.
async fn rank_matches(ranker: &dyn Ranker, query: &str, k: usize, shortlist: &[NameMatch]) -> Option<Vec<NameMatch>> {
    let candidates: Vec<Value> = shortlist
        .iter()
        .map(|c| {
            json!({
                "account_id": c.account_id,
                "opportunity_id": c.opportunity_id,
                "name": c.name,
                "type": c.object_type,
                "pre_score": c.match_score,
            })
        })
        .collect();
    let payload = json!({"query": query, "k": k, "candidates": candidates});

    let answer = match ranker.rank(NAME_RANKER_PROMPT, &payload).await {
        Ok(answer) => answer,
        Err(e) => {
            tracing::warn!(error = %e, "name ranking failed, using local scores");
            return None;
        }
    };

    let id = |row: &Value, key: &str| {
        row.get(key)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };
    let mut picked: Vec<NameMatch> = Vec::new();
    for row in &answer {
        let account_id = id(row, "account_id");
        let opportunity_id = id(row, "opportunity_id");
        let Some(object_type) = row.get("type").and_then(Value::as_str) else {
            continue;
        };
        let key = (account_id.as_deref(), opportunity_id.as_deref(), object_type);
        let Some(known) = shortlist.iter().find(|c| c.key() == key) else {
            continue;
        };
        if picked.iter().any(|p| p.key() == key) {
            continue;
        }
        let score = row.get("match_score").and_then(Value::as_f64).unwrap_or(0.0);
        picked.push(NameMatch {
            match_score: ((score * 10.0).round() / 10.0).clamp(0.0, 100.0),
            ..known.clone()
        });
        if picked.len() >= k {
            break;
        }
    }
    (!picked.is_empty()).then_some(picked)
}

/// `SELECT COUNT() FROM obj [WHERE ...]` for a simple, non-aggregate select.
fn count_query(soql: &str) -> Option<String> {
    if soql.to_lowercase().contains("group by") {
        return None;
    }
    let caps = SIMPLE_SELECT_RE.captures(soql)?;
    let object = &caps[1];
    Some(match caps.get(2) {
        Some(filter) => format!("SELECT COUNT() FROM {object} {}", filter.as_str().trim()),
        None => format!("SELECT COUNT() FROM {object}"),
    })
}

/// SOSL treats braces as delimiters.
fn sosl_term(query: &str) -> String {
    query.replace(['{', '}'], " ").trim().to_string()
}

fn escape_literal(s: &str) -> String {
    s.replace('\\', "\\\\").replace('\'', "\\'")
}

fn describe_error(e: SalesforceError) -> ToolError {
    ToolError::execution(format!("Failed to describe Salesforce objects: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matching::testing::FixedRanker;
    use crate::salesforce::client::testing::{hit, rows, FakeSalesforce};
    use crate::salesforce::client::SearchRecord;

    fn context(fake: FakeSalesforce) -> (Arc<FakeSalesforce>, SoqlToolContext) {
        let fake = Arc::new(fake);
        let ctx = SoqlToolContext::new(fake.clone()).with_today(NaiveDate::from_ymd_opt(2025, 8, 13).unwrap());
        (fake, ctx)
    }

    fn registry_with(fake: FakeSalesforce) -> (Arc<FakeSalesforce>, ToolRegistry) {
        let (fake, ctx) = context(fake);
        (fake, ctx.into_registry().unwrap())
    }

    async fn call(registry: &ToolRegistry, name: &str, args: Value) -> Result<Value, ToolError> {
        registry.get(name).unwrap().handler.call(args).await
    }

    fn acme_hits() -> Vec<SearchRecord> {
        vec![
            hit("Opportunity", json!({"Id": "006B", "Name": "Acme Renewal 2025", "AccountId": "001A"})),
            hit("Account", json!({"Id": "001A", "Name": "Acme Corp"})),
            hit("Account", json!({"Id": "001A", "Name": "Acme Corp"})),
        ]
    }

    #[test]
    fn test_registration_order() {
        let (_, registry) = registry_with(FakeSalesforce::sample());
        assert_eq!(
            registry.names(),
            vec![
                "think",
                "parse_salesforce_date",
                "list_stage_names",
                "get_salesforce_field_schema",
                "list_core_attribute_names",
                "pick_best_name_matches",
                "resolve_owner_names",
                "validate_soql",
            ]
        );
    }

    #[tokio::test]
    async fn test_parse_salesforce_date() {
        let (_, registry) = registry_with(FakeSalesforce::sample());
        let out = call(&registry, "parse_salesforce_date", json!({"natural_input": "last month"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"input": "last month", "date": "2025-07-01", "literal": "LAST_MONTH"}));

        let out = call(
            &registry,
            "parse_salesforce_date",
            json!({"natural_input": "2025-07-01", "want_datetime": true}),
        )
        .await
        .unwrap();
        assert_eq!(out, json!({"input": "2025-07-01", "date": "2025-07-01T00:00:00Z"}));

        let out = call(&registry, "parse_salesforce_date", json!({"natural_input": "-30d"}))
            .await
            .unwrap();
        assert_eq!(out["literal"], "LAST_N_DAYS:30");

        let out = call(&registry, "parse_salesforce_date", json!({"natural_input": "past quarter"}))
            .await
            .unwrap();
        assert_eq!(out, json!({"input": "past quarter", "date": "2025-05-15", "literal": "LAST_N_DAYS:90"}));
    }

    #[tokio::test]
    async fn test_list_stage_names_from_opportunity_stage() {
        let fake = FakeSalesforce::sample().on_query(
            "FROM OpportunityStage",
            Ok(rows(vec![json!({"MasterLabel": "Prospecting"}), json!({"MasterLabel": "Negotiation"})])),
        );
        let (fake, registry) = registry_with(fake);
        let out = call(&registry, "list_stage_names", json!({})).await.unwrap();
        assert_eq!(out, json!({"stage_names": ["Prospecting", "Negotiation"]}));
        assert!(fake.queries()[0].contains("WHERE IsActive = true"));
    }

    #[tokio::test]
    async fn test_list_stage_names_falls_back_to_picklist() {
        let (_, registry) = registry_with(FakeSalesforce::sample());
        let active = call(&registry, "list_stage_names", json!({})).await.unwrap();
        assert_eq!(active, json!({"stage_names": ["Prospecting", "Closed Won"]}));
        let all = call(&registry, "list_stage_names", json!({"active_only": false})).await.unwrap();
        assert_eq!(all, json!({"stage_names": ["Prospecting", "Closed Won", "Legacy"]}));
    }

    #[tokio::test]
    async fn test_field_schema_lookup() {
        let (_, registry) = registry_with(FakeSalesforce::sample());
        let out = call(&registry, "get_salesforce_field_schema", json!({"field_api": "opportunity.stagename"}))
            .await
            .unwrap();
        assert_eq!(out["object"], "Opportunity");
        assert_eq!(out["field"], "StageName");
        assert_eq!(out["attribute"], "Opportunity.StageName");
        assert_eq!(out["schema"]["values"], json!(["Prospecting", "Closed Won"]));

        let out = call(&registry, "get_salesforce_field_schema", json!({"field_api": "Account.Secret__c"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!({"object": "Account", "field": "Secret__c", "error": "Field not in allow-list."})
        );

        let out = call(&registry, "get_salesforce_field_schema", json!({"field_api": "StageName"}))
            .await
            .unwrap();
        assert!(out["error"].as_str().unwrap().starts_with("Use '<Object>.<Field>'"));
    }

    #[tokio::test]
    async fn test_list_core_attribute_names() {
        let (_, registry) = registry_with(FakeSalesforce::sample());
        let out = call(&registry, "list_core_attribute_names", json!({})).await.unwrap();
        let names: Vec<&str> = out.as_array().unwrap().iter().filter_map(Value::as_str).collect();
        assert_eq!(names.first(), Some(&"Account.BillingCountry"));
        assert!(names.contains(&"Opportunity.ARR"));
    }

    #[tokio::test]
    async fn test_pick_best_name_matches_prefix_search() {
        let fake = FakeSalesforce::sample().on_search("FIND {Acme*}", acme_hits());
        let (fake, registry) = registry_with(fake);
        let out = call(&registry, "pick_best_name_matches", json!({"query": "Acme"}))
            .await
            .unwrap();
        assert_eq!(
            out,
            json!([
                {"account_id": "001A", "opportunity_id": null, "name": "Acme Corp", "type": "Account", "match_score": 100.0},
                {"account_id": "001A", "opportunity_id": "006B", "name": "Acme Renewal 2025", "type": "Opportunity", "match_score": 100.0}
            ])
        );
        assert_eq!(fake.searches.lock().unwrap().len(), 1);
        assert!(fake.queries().is_empty());
    }

    #[tokio::test]
    async fn test_pick_best_name_matches_fuzzy_then_like() {
        let fake = FakeSalesforce::sample().on_search("FIND {Acme~}", acme_hits());
        let (fake, registry) = registry_with(fake);
        let out = call(&registry, "pick_best_name_matches", json!({"query": "Acme", "k": 1}))
            .await
            .unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
        assert_eq!(fake.searches.lock().unwrap().len(), 2);

        let fake = FakeSalesforce::sample().on_query(
            "FROM Account WHERE Name LIKE '%O\\'Brien%'",
            Ok(rows(vec![json!({"Id": "001C", "Name": "O'Brien Ltd"})])),
        );
        let (fake, registry) = registry_with(fake);
        let out = call(&registry, "pick_best_name_matches", json!({"query": "O'Brien"}))
            .await
            .unwrap();
        assert_eq!(out[0]["account_id"], "001C");
        let queries = fake.queries();
        assert_eq!(queries.len(), 2);
        assert!(queries[1].contains("FROM Opportunity WHERE Name LIKE"));
    }

    #[tokio::test]
    async fn test_pick_best_name_matches_force_and_empty() {
        let fake = FakeSalesforce::sample().on_query(
            "FROM Account WHERE Name != NULL",
            Ok(rows(vec![json!({"Id": "001Z", "Name": "Zenith"})])),
        );
        let (_, registry) = registry_with(fake);
        let forced = call(&registry, "pick_best_name_matches", json!({"query": "Nothing"}))
            .await
            .unwrap();
        assert_eq!(forced[0]["name"], "Zenith");
        let unforced = call(&registry, "pick_best_name_matches", json!({"query": "Nothing", "force": false}))
            .await
            .unwrap();
        assert_eq!(unforced, json!([]));

        let (fake, registry) = registry_with(FakeSalesforce::sample());
        let out = call(&registry, "pick_best_name_matches", json!({"query": " {} "}))
            .await
            .unwrap();
        assert_eq!(out, json!([]));
        assert!(fake.searches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_pick_best_name_matches_ranker_rows_are_checked() {
        let ranker = Arc::new(FixedRanker::new(vec![
            json!({"account_id": "", "opportunity_id": "006X", "name": "Invented", "type": "Opportunity", "match_score": 99}),
            json!({"account_id": "001A", "opportunity_id": "006B", "name": "Acme Renewal 2025", "type": "Opportunity", "match_score": 120}),
        ]));
        let (_, ctx) = context(FakeSalesforce::sample().on_search("FIND {Acme*}", acme_hits()));
        let registry = ctx.with_ranker(ranker.clone()).into_registry().unwrap();
        let out = call(&registry, "pick_best_name_matches", json!({"query": "Acme"}))
            .await
            .unwrap();
        assert_eq!(out.as_array().unwrap().len(), 1);
        assert_eq!(out[0]["opportunity_id"], "006B");
        assert_eq!(out[0]["match_score"], 100.0);

        let payloads = ranker.payloads.lock().unwrap();
        assert_eq!(payloads[0]["candidates"].as_array().unwrap().len(), 2);
        assert_eq!(payloads[0]["k"], 5);
    }

    #[tokio::test]
    async fn test_pick_best_name_matches_ranker_failure_uses_local_order() {
        let (_, ctx) = context(FakeSalesforce::sample().on_search("FIND {Acme*}", acme_hits()));
        let registry = ctx
            .with_ranker(Arc::new(FixedRanker::failing()))
            .into_registry()
            .unwrap();
        let out = call(&registry, "pick_best_name_matches", json!({"query": "Acme"}))
            .await
            .unwrap();
        assert_eq!(out[0]["type"], "Account");
        assert_eq!(out.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_resolve_owner_names_preserves_order() {
        let fake = FakeSalesforce::sample()
            .on_query("FROM User", Ok(rows(vec![json!({"Id": "005A", "Name": "Ada"})])))
            .on_query("FROM Group", Ok(rows(vec![json!({"Id": "00GB", "Name": "EMEA Queue"})])));
        let (fake, registry) = registry_with(fake);
        let out = call(
            &registry,
            "resolve_owner_names",
            json!({"owner_ids": ["005A", "00GB", "005A", "", "005Z"]}),
        )
        .await
        .unwrap();
        assert_eq!(
            out,
            json!([
                {"id": "005A", "name": "Ada"},
                {"id": "00GB", "name": "EMEA Queue"},
                {"id": "005A", "name": "Ada"},
                {"id": "005Z", "name": null}
            ])
        );
        let queries = fake.queries();
        assert_eq!(queries[0], "SELECT Id, Name FROM User WHERE Id IN ('005A','005Z')");
        assert_eq!(queries[1], "SELECT Id, Name FROM Group WHERE Id IN ('00GB')");
    }

    #[tokio::test]
    async fn test_resolve_owner_names_chunks() {
        let ids: Vec<String> = (0..450).map(|i| format!("005{i:012}")).collect();
        let (fake, registry) = registry_with(FakeSalesforce::sample());
        let out = call(&registry, "resolve_owner_names", json!({"owner_ids": ids}))
            .await
            .unwrap();
        assert_eq!(out.as_array().unwrap().len(), 450);
        assert_eq!(fake.queries().len(), 3);

        let empty = call(&registry, "resolve_owner_names", json!({"owner_ids": []}))
            .await
            .unwrap();
        assert_eq!(empty, json!([]));
    }

    #[tokio::test]
    async fn test_validate_soql_with_sample_and_count() {
        let fake = FakeSalesforce::sample()
            .on_query("LIMIT 1", Ok(rows(vec![json!({"Id": "006X", "Name": "Big Deal"})])))
            .on_query(
                "SELECT COUNT() FROM Opportunity",
                Ok(QueryResult {
                    total_size: 17,
                    records: Vec::new(),
                }),
            );
        let (fake, registry) = registry_with(fake);
        let soql = "SELECT Id, Name FROM Opportunity WHERE Amount > 100";
        let out = call(&registry, "validate_soql", json!({"soql": soql})).await.unwrap();
        assert_eq!(
            out,
            json!({
                "soql": soql,
                "valid": true,
                "sample": {"Id": "006X", "Name": "Big Deal"},
                "count": 17,
                "error": null
            })
        );
        assert_eq!(
            fake.queries(),
            vec![
                format!("{soql} LIMIT 1"),
                "SELECT COUNT() FROM Opportunity WHERE Amount > 100".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_validate_soql_malformed() {
        let fake = FakeSalesforce::sample().on_query("Bogus", Err("unexpected token: Bogus".into()));
        let (_, registry) = registry_with(fake);
        let out = call(&registry, "validate_soql", json!({"soql": "SELECT Bogus FROM Opportunity"}))
            .await
            .unwrap();
        assert_eq!(out["valid"], false);
        assert_eq!(out["error"], "MALFORMED_QUERY: unexpected token: Bogus");
        assert_eq!(out["count"], Value::Null);
    }

    #[test]
    fn test_count_query_shapes() {
        assert_eq!(
            count_query("SELECT Id FROM Account LIMIT 5").as_deref(),
            Some("SELECT COUNT() FROM Account")
        );
        assert_eq!(
            count_query("select Id from Opportunity where IsClosed = false order by CloseDate limit 10").as_deref(),
            Some("SELECT COUNT() FROM Opportunity where IsClosed = false")
        );
        assert_eq!(
            count_query("SELECT StageName, COUNT(Id) FROM Opportunity GROUP BY StageName"),
            None
        );
    }
}
