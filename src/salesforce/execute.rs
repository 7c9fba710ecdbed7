//! Run a finished SOQL answer against Salesforce and attach the records.

use serde_json::json;

use crate::agent_core::StructuredResult;
use crate::config::AppConfig;

use super::agent::QUERY_FIELD;
use super::client::{SalesforceApi, SalesforceClient};
use super::errors::SalesforceError;
use super::tools::has_limit;

/// Query `result["soql"]` and attach up to `max_rows` flattened records as `rows`.
///
/// A query without `LIMIT` gets `LIMIT max_rows` appended. An empty query is
/// left alone; a failed query is recorded in `execution_error`.
pub async fn attach_records(api: &dyn SalesforceApi, result: &mut StructuredResult, max_rows: usize) {
    let Some(soql) = result
        .get(QUERY_FIELD)
        .and_then(|q| q.as_str())
        .map(str::trim)
        .filter(|q| !q.is_empty())
        .map(String::from)
    else {
        return;
    };

    let executed = if has_limit(&soql) {
        soql
    } else {
        format!("{soql} LIMIT {max_rows}")
    };

    match api.query(&executed).await {
        Ok(mut found) => {
            found.records.truncate(max_rows);
            tracing::info!(total_size = found.total_size, returned = found.records.len(), "executed SOQL");
            result.insert("executed_soql".into(), json!(executed));
            result.insert("total_size".into(), json!(found.total_size));
            result.insert("returned".into(), json!(found.records.len()));
            result.insert("rows".into(), json!(found.records));
        }
        Err(e) => {
            tracing::warn!(error = %e, "SOQL execution failed");
            result.insert("execution_error".into(), json!(e.to_string()));
        }
    }
}

/// [`attach_records`] over a client built from the `salesforce` config section.
pub async fn execute_soql(
    config: &AppConfig,
    result: &mut StructuredResult,
    max_rows: usize,
) -> Result<(), SalesforceError> {
    let client = SalesforceClient::from_config(&config.salesforce)?;
    attach_records(&client, result, max_rows).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::Value;

    use super::*;
    use crate::salesforce::client::testing::{rows, FakeSalesforce};

    fn answer(soql: &str) -> StructuredResult {
        let Value::Object(map) = json!({"soql": soql, "approx_row_count": 3, "notes": ""}) else {
            unreachable!()
        };
        map
    }

    #[tokio::test]
    async fn test_appends_limit_and_attaches_rows() {
        let fake = FakeSalesforce::sample().on_query(
            "FROM Opportunity",
            Ok(rows(vec![
                json!({"Id": "006A", "Name": "Acme Renewal", "Owner.Name": "Ana Ruiz"}),
                json!({"Id": "006B", "Name": "Globex Expansion", "Owner.Name": "Li Wei"}),
                json!({"Id": "006C", "Name": "Initech Pilot", "Owner.Name": "Ana Ruiz"}),
            ])),
        );
        let mut result = answer("SELECT Id, Name, Owner.Name FROM Opportunity");
        attach_records(&fake, &mut result, 2).await;

        assert_eq!(fake.queries(), vec!["SELECT Id, Name, Owner.Name FROM Opportunity LIMIT 2"]);
        assert_eq!(result["total_size"], 3);
        assert_eq!(result["returned"], 2);
        let first = &result["rows"][0];
        assert_eq!(first["Owner.Name"], "Ana Ruiz");
        assert!(first.get("attributes").is_none());
    }

    #[tokio::test]
    async fn test_existing_limit_is_kept() {
        let fake = FakeSalesforce::sample();
        let mut result = answer("SELECT Id FROM Account LIMIT 5");
        attach_records(&fake, &mut result, 50).await;
        assert_eq!(fake.queries(), vec!["SELECT Id FROM Account LIMIT 5"]);
        assert_eq!(result["returned"], 0);
    }

    #[tokio::test]
    async fn test_empty_query_is_not_executed() {
        let fake = FakeSalesforce::sample();
        let mut result = answer("  ");
        attach_records(&fake, &mut result, 50).await;
        assert!(fake.queries().is_empty());
        assert!(result.get("rows").is_none());
    }

    #[tokio::test]
    async fn test_rejected_query_keeps_answer() {
        let fake = FakeSalesforce::sample().on_query("Bogus", Err("No such column 'Bogus'".into()));
        let mut result = answer("SELECT Bogus FROM Opportunity");
        attach_records(&fake, &mut result, 50).await;
        assert!(result["execution_error"]
            .as_str()
            .unwrap()
            .contains("No such column 'Bogus'"));
        assert_eq!(result["soql"], "SELECT Bogus FROM Opportunity");
    }
}
