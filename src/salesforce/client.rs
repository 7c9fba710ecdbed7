//! Salesforce REST client (query, describe, search).
//!
//! Records come back with the `attributes` envelope removed and nested
//! relationship objects flattened to `Rel.Field` keys, so tools can hand
//! them to the model as-is.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client as HttpClient, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::SalesforceConfig;

use super::errors::SalesforceError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A flattened record.
pub type Record = Map<String, Value>;

// ─── Types ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    /// Matching rows (for `SELECT COUNT()` the count, with no records).
    pub total_size: u64,
    pub records: Vec<Record>,
}

/// One SOSL hit; `object_type` comes from the stripped `attributes.type`.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRecord {
    pub object_type: String,
    pub fields: Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PicklistValue {
    pub value: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

/// The subset of a describe() field entry the tools use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescribe {
    pub name: String,
    #[serde(default)]
    pub label: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default)]
    pub filterable: bool,
    #[serde(default)]
    pub sortable: bool,
    #[serde(default)]
    pub picklist_values: Vec<PicklistValue>,
    #[serde(default)]
    pub reference_to: Vec<String>,
    #[serde(default)]
    pub relationship_name: Option<String>,
}

fn default_true() -> bool {
    true
}

/// Read access to Salesforce used by the SOQL tools.
#[async_trait]
pub trait SalesforceApi: Send + Sync {
    async fn query(&self, soql: &str) -> Result<QueryResult, SalesforceError>;

    async fn describe(&self, object: &str) -> Result<Vec<FieldDescribe>, SalesforceError>;

    async fn search(&self, sosl: &str) -> Result<Vec<SearchRecord>, SalesforceError>;
}

// ─── Record shaping ──────────────────────────────────────────────────────────

/// Drop `attributes` and flatten nested relationship records (`Owner.Name`).
pub fn flatten_record(raw: &Map<String, Value>) -> Record {
    let mut out = Record::new();
    flatten_into(&mut out, "", raw);
    out
}

fn flatten_into(out: &mut Record, prefix: &str, raw: &Map<String, Value>) {
    for (key, value) in raw {
        if key == "attributes" {
            continue;
        }
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            Value::Object(nested) if nested.contains_key("attributes") => {
                flatten_into(out, &path, nested);
            }
            other => {
                out.insert(path, other.clone());
            }
        }
    }
}

fn object_type(raw: &Map<String, Value>) -> String {
    raw.get("attributes")
        .and_then(|a| a.get("type"))
        .and_then(|t| t.as_str())
        .unwrap_or_default()
        .to_string()
}

// ─── SalesforceClient ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SalesforceClient {
    http: HttpClient,
    instance_url: String,
    access_token: String,
    api_version: String,
}

impl SalesforceClient {
    pub fn from_config(config: &SalesforceConfig) -> Result<Self, SalesforceError> {
        let missing = |what: &str| SalesforceError::Config {
            reason: format!("{what} is not set (config `salesforce` section or environment)"),
        };
        let instance_url = config
            .instance_url
            .clone()
            .ok_or_else(|| missing("instance_url"))?;
        let access_token = config
            .access_token
            .clone()
            .ok_or_else(|| missing("access_token"))?;

        let http = HttpClient::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SalesforceError::Config {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            instance_url: instance_url.trim_end_matches('/').to_string(),
            access_token,
            api_version: config.api_version.trim_start_matches('v').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/services/data/v{}/{}",
            self.instance_url,
            self.api_version,
            path.trim_start_matches('/')
        )
    }

    async fn get(&self, path: &str, query: Option<(&str, &str)>) -> Result<Value, SalesforceError> {
        let url = self.url(path);
        let mut request = self.http.get(&url).bearer_auth(&self.access_token);
        if let Some(q) = query {
            request = request.query(&[q]);
        }

        let response = request.send().await.map_err(|e| SalesforceError::Http {
            endpoint: path.to_string(),
            reason: e.to_string(),
        })?;
        let status = response.status();
        let body = response.text().await.map_err(|e| SalesforceError::Decode {
            reason: format!("failed to read body: {e}"),
        })?;

        if !status.is_success() {
            tracing::debug!(path, status = status.as_u16(), "Salesforce request rejected");
            return Err(api_error(status, &body));
        }
        serde_json::from_str(&body).map_err(|e| SalesforceError::Decode {
            reason: format!("{path}: {e}"),
        })
    }
}

#[async_trait]
impl SalesforceApi for SalesforceClient {
    async fn query(&self, soql: &str) -> Result<QueryResult, SalesforceError> {
        let body = self.get("query", Some(("q", soql))).await?;
        let total_size = body.get("totalSize").and_then(|v| v.as_u64()).unwrap_or(0);
        let records = body
            .get("records")
            .and_then(|r| r.as_array())
            .map(|rows| rows.iter().filter_map(|r| r.as_object()).map(flatten_record).collect())
            .unwrap_or_default();
        Ok(QueryResult { total_size, records })
    }

    async fn describe(&self, object: &str) -> Result<Vec<FieldDescribe>, SalesforceError> {
        let body = self.get(&format!("sobjects/{object}/describe"), None).await?;
        let fields = body.get("fields").cloned().unwrap_or(Value::Array(Vec::new()));
        serde_json::from_value(fields).map_err(|e| SalesforceError::Decode {
            reason: format!("describe {object}: {e}"),
        })
    }

    async fn search(&self, sosl: &str) -> Result<Vec<SearchRecord>, SalesforceError> {
        let body = self.get("search", Some(("q", sosl))).await?;
        // Newer API versions wrap hits in `searchRecords`; older ones return a bare array.
        let hits = match body {
            Value::Object(ref map) => map.get("searchRecords").and_then(|r| r.as_array()),
            Value::Array(ref items) => Some(items),
            _ => None,
        };
        Ok(hits
            .map(|items| {
                items
                    .iter()
                    .filter_map(|r| r.as_object())
                    .map(|raw| SearchRecord {
                        object_type: object_type(raw),
                        fields: flatten_record(raw),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// Salesforce errors are `[{"message": ..., "errorCode": ...}]`.
fn api_error(status: StatusCode, body: &str) -> SalesforceError {
    let first = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.as_array().and_then(|a| a.first().cloned()));
    let (error_code, message) = match first {
        Some(entry) => (
            entry.get("errorCode").and_then(|c| c.as_str()).map(String::from),
            entry
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string(),
        ),
        None => (None, body.trim().chars().take(500).collect()),
    };
    let message = if message.is_empty() {
        status.canonical_reason().unwrap_or("request failed").to_string()
    } else {
        message
    };
    SalesforceError::Api {
        status: status.as_u16(),
        error_code,
        message,
    }
}

// ─── Test double ─────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    /// In-memory Salesforce. Queries are answered by the first rule whose
    /// needle occurs in the SOQL; unmatched queries return no rows.
    #[derive(Default)]
    pub struct FakeSalesforce {
        pub describes: HashMap<String, Vec<FieldDescribe>>,
        pub query_rules: Vec<(String, Result<QueryResult, String>)>,
        pub search_rules: Vec<(String, Vec<SearchRecord>)>,
        pub queries: Mutex<Vec<String>>,
        pub searches: Mutex<Vec<String>>,
        pub describe_calls: Mutex<u32>,
    }

    pub fn field(name: &str, field_type: &str) -> FieldDescribe {
        FieldDescribe {
            name: name.into(),
            label: name.into(),
            field_type: field_type.into(),
            filterable: true,
            sortable: true,
            picklist_values: Vec::new(),
            reference_to: Vec::new(),
            relationship_name: None,
        }
    }

    pub fn record(fields: Value) -> Record {
        fields.as_object().cloned().unwrap_or_default()
    }

    impl FakeSalesforce {
        pub fn sample() -> Self {
            let mut stage = field("StageName", "picklist");
            stage.picklist_values = vec![
                PicklistValue { value: "Prospecting".into(), active: true },
                PicklistValue { value: "Closed Won".into(), active: true },
                PicklistValue { value: "Legacy".into(), active: false },
            ];
            let mut owner = field("OwnerId", "reference");
            owner.reference_to = vec!["User".into()];
            owner.relationship_name = Some("Owner".into());

            let mut describes = HashMap::new();
            describes.insert(
                "Opportunity".to_string(),
                vec![
                    field("Id", "id"),
                    field("Name", "string"),
                    stage,
                    field("Amount", "currency"),
                    field("CloseDate", "date"),
                    owner,
                    field("arr__c", "currency"),
                ],
            );
            describes.insert(
                "Account".to_string(),
                vec![field("Id", "id"), field("Name", "string"), field("BillingCountry", "string")],
            );

            Self {
                describes,
                ..Self::default()
            }
        }

        pub fn on_query(mut self, needle: &str, result: Result<QueryResult, String>) -> Self {
            self.query_rules.push((needle.to_string(), result));
            self
        }

        pub fn on_search(mut self, needle: &str, hits: Vec<SearchRecord>) -> Self {
            self.search_rules.push((needle.to_string(), hits));
            self
        }

        pub fn queries(&self) -> Vec<String> {
            self.queries.lock().unwrap().clone()
        }
    }

    pub fn rows(records: Vec<Value>) -> QueryResult {
        QueryResult {
            total_size: records.len() as u64,
            records: records.into_iter().map(record).collect(),
        }
    }

    pub fn hit(object_type: &str, fields: Value) -> SearchRecord {
        SearchRecord {
            object_type: object_type.into(),
            fields: record(fields),
        }
    }

    #[async_trait]
    impl SalesforceApi for FakeSalesforce {
        async fn query(&self, soql: &str) -> Result<QueryResult, SalesforceError> {
            self.queries.lock().unwrap().push(soql.to_string());
            let rule = self.query_rules.iter().find(|(needle, _)| soql.contains(needle.as_str()));
            match rule {
                Some((_, Ok(result))) => Ok(result.clone()),
                Some((_, Err(message))) => Err(SalesforceError::Api {
                    status: 400,
                    error_code: Some("MALFORMED_QUERY".into()),
                    message: message.clone(),
                }),
                None => Ok(QueryResult::default()),
            }
        }

        async fn describe(&self, object: &str) -> Result<Vec<FieldDescribe>, SalesforceError> {
            *self.describe_calls.lock().unwrap() += 1;
            self.describes.get(object).cloned().ok_or_else(|| SalesforceError::Api {
                status: 404,
                error_code: Some("NOT_FOUND".into()),
                message: format!("The requested resource does not exist: {object}"),
            })
        }

        async fn search(&self, sosl: &str) -> Result<Vec<SearchRecord>, SalesforceError> {
            self.searches.lock().unwrap().push(sosl.to_string());
            Ok(self
                .search_rules
                .iter()
                .find(|(needle, _)| sosl.contains(needle.as_str()))
                .map(|(_, hits)| hits.clone())
                .unwrap_or_default())
        }
    }

    #[test]
    fn test_fake_records_have_no_attributes() {
        let r = record(json!({"Id": "001", "Name": "Acme"}));
        assert!(!r.contains_key("attributes"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_strips_attributes_and_nests() {
        let raw = json!({
            "attributes": {"type": "Opportunity", "url": "/x"},
            "Id": "006A",
            "Owner": {"attributes": {"type": "User"}, "Name": "Dana", "Manager": {"attributes": {"type": "User"}, "Name": "Lee"}},
            "Account": null,
            "Tags": {"plain": "object"}
        });
        let flat = flatten_record(raw.as_object().unwrap());
        assert_eq!(
            Value::Object(flat),
            json!({
                "Id": "006A",
                "Owner.Name": "Dana",
                "Owner.Manager.Name": "Lee",
                "Account": null,
                "Tags": {"plain": "object"}
            })
        );
    }

    #[test]
    fn test_describe_field_decoding() {
        let raw = json!({
            "name": "StageName",
            "label": "Stage",
            "type": "picklist",
            "filterable": true,
            "sortable": true,
            "picklistValues": [{"value": "Prospecting", "active": true, "label": "Prospecting"}],
            "referenceTo": [],
            "relationshipName": null,
            "length": 255
        });
        let f: FieldDescribe = serde_json::from_value(raw).unwrap();
        assert_eq!(f.field_type, "picklist");
        assert_eq!(f.picklist_values[0].value, "Prospecting");
        assert!(f.relationship_name.is_none());
    }

    #[test]
    fn test_api_error_parsing() {
        let body = r#"[{"message":"unexpected token: 'FORM'","errorCode":"MALFORMED_QUERY"}]"#;
        match api_error(StatusCode::BAD_REQUEST, body) {
            SalesforceError::Api { status, error_code, message } => {
                assert_eq!(status, 400);
                assert_eq!(error_code.as_deref(), Some("MALFORMED_QUERY"));
                assert_eq!(message, "unexpected token: 'FORM'");
            }
            other => panic!("unexpected: {other:?}"),
        }
        let e = api_error(StatusCode::UNAUTHORIZED, "");
        assert_eq!(e.to_string(), "HTTP 401: Unauthorized");
    }

    #[test]
    fn test_url_normalizes_version() {
        let client = SalesforceClient::from_config(&SalesforceConfig {
            instance_url: Some("https://acme.my.salesforce.com/".into()),
            access_token: Some("tok".into()),
            api_version: "v60.0".into(),
        })
        .unwrap();
        assert_eq!(
            client.url("query"),
            "https://acme.my.salesforce.com/services/data/v60.0/query"
        );
    }

    #[test]
    fn test_missing_token_is_config_error() {
        let err = SalesforceClient::from_config(&SalesforceConfig {
            instance_url: Some("https://acme.my.salesforce.com".into()),
            access_token: None,
            api_version: "60.0".into(),
        })
        .unwrap_err();
        assert!(err.to_string().contains("access_token"));
    }
}
