//! Allow-listed core schema for `Opportunity` and `Account`.
//!
//! Each friendly attribute (`Opportunity.ARR`) lists candidate API names;
//! the first one that exists in the org's describe() wins. Only resolved
//! attributes are offered to the model.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{Mutex, OnceCell};

use super::client::{FieldDescribe, SalesforceApi};
use super::errors::SalesforceError;

type Candidates = &'static [(&'static str, &'static [&'static str])];

const OPPORTUNITY_FIELDS: Candidates = &[
    ("Opportunity.Id", &["Id"]),
    ("Opportunity.Name", &["Name"]),
    ("Opportunity.StageName", &["StageName"]),
    ("Opportunity.Amount", &["Amount"]),
    ("Opportunity.CloseDate", &["CloseDate"]),
    ("Opportunity.NextStep", &["NextStep"]),
    ("Opportunity.Currency", &["CurrencyIsoCode"]),
    ("Opportunity.OwnerId", &["OwnerId"]),
    ("Opportunity.LastActivity", &["LastActivityDate"]),
    ("Opportunity.RenewalDate", &["Renewal_Date__c", "RenewalDate__c"]),
    ("Opportunity.ACV", &["ACV__c", "Annual_Contract_Value__c"]),
    ("Opportunity.ARR", &["ARR__c", "Annual_Recurring_Revenue__c"]),
    ("Opportunity.Territory", &["Territory2Id", "Territory__c", "Territory"]),
    ("Opportunity.Description", &["Description"]),
];

const ACCOUNT_FIELDS: Candidates = &[
    ("Account.Id", &["Id"]),
    ("Account.Name", &["Name"]),
    ("Account.Type", &["Type"]),
    ("Account.RecordTypeId", &["RecordTypeId"]),
    ("Account.ParentId", &["ParentId"]),
    ("Account.BillingCountry", &["BillingCountry"]),
    ("Account.ShippingCountry", &["ShippingCountry"]),
    ("Account.Phone", &["Phone"]),
    ("Account.Industry", &["Industry"]),
    ("Account.CurrencyIsoCode", &["CurrencyIsoCode"]),
    ("Account.OwnerId", &["OwnerId"]),
    ("Account.Territory__c", &["Territory__c"]),
    ("Account.Country__c", &["Country__c"]),
    ("Account.Partner_Type__c", &["Partner_Type__c"]),
    ("Account.RecordTypeId__c", &["RecordTypeId__c"]),
    ("Account.Customer_Type__c", &["Customer_Type__c"]),
];

/// Objects covered by the allow-list.
pub const CORE_OBJECTS: &[(&str, Candidates)] =
    &[("Opportunity", OPPORTUNITY_FIELDS), ("Account", ACCOUNT_FIELDS)];

/// Compact, model-facing schema for one field.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSchema {
    pub api: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub filterable: bool,
    pub sortable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub references: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_name: Option<String>,
}

impl From<&FieldDescribe> for FieldSchema {
    fn from(f: &FieldDescribe) -> Self {
        let is_picklist = matches!(f.field_type.as_str(), "picklist" | "multipicklist");
        Self {
            api: f.name.clone(),
            label: f.label.clone(),
            field_type: f.field_type.clone(),
            filterable: f.filterable,
            sortable: f.sortable,
            values: is_picklist.then(|| {
                f.picklist_values
                    .iter()
                    .filter(|v| v.active)
                    .map(|v| v.value.clone())
                    .collect()
            }),
            references: (!f.reference_to.is_empty()).then(|| f.reference_to.clone()),
            relationship_name: f.relationship_name.clone(),
        }
    }
}

/// Outcome of resolving `"Object.Field"` against the allow-list.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldLookup {
    Found {
        object: String,
        attribute: String,
        schema: FieldSchema,
    },
    NotAllowed {
        object: String,
        field: String,
    },
    BadFormat,
}

/// Pick the first candidate present in `fields`: exact name first, then case-insensitive.
pub fn find_field<'a>(fields: &'a [FieldDescribe], candidates: &[&str]) -> Option<&'a FieldDescribe> {
    candidates
        .iter()
        .find_map(|c| fields.iter().find(|f| f.name == *c))
        .or_else(|| {
            candidates
                .iter()
                .find_map(|c| fields.iter().find(|f| f.name.eq_ignore_ascii_case(c)))
        })
}

/// Canonical spelling of an allow-listed object name.
pub fn canonical_object(name: &str) -> Option<&'static str> {
    CORE_OBJECTS
        .iter()
        .map(|(object, _)| *object)
        .find(|object| object.eq_ignore_ascii_case(name.trim()))
}

/// Describe cache plus the resolved allow-list index.
pub struct CoreSchema {
    api: Arc<dyn SalesforceApi>,
    describes: Mutex<HashMap<String, Arc<Vec<FieldDescribe>>>>,
    index: OnceCell<BTreeMap<String, FieldSchema>>,
}

impl CoreSchema {
    pub fn new(api: Arc<dyn SalesforceApi>) -> Self {
        Self {
            api,
            describes: Mutex::new(HashMap::new()),
            index: OnceCell::new(),
        }
    }

    /// describe() for `object`, fetched once per process.
    pub async fn describe(&self, object: &str) -> Result<Arc<Vec<FieldDescribe>>, SalesforceError> {
        let mut cache = self.describes.lock().await;
        if let Some(fields) = cache.get(object) {
            return Ok(Arc::clone(fields));
        }
        let fields = Arc::new(self.api.describe(object).await?);
        tracing::debug!(object, fields = fields.len(), "cached describe");
        cache.insert(object.to_string(), Arc::clone(&fields));
        Ok(fields)
    }

    /// Friendly attribute → schema, restricted to fields that exist in this org.
    pub async fn index(&self) -> Result<&BTreeMap<String, FieldSchema>, SalesforceError> {
        self.index
            .get_or_try_init(|| async {
                let mut index = BTreeMap::new();
                for (object, candidates) in CORE_OBJECTS {
                    let fields = self.describe(object).await?;
                    for (friendly, names) in candidates.iter() {
                        if let Some(f) = find_field(&fields, names) {
                            index.insert(friendly.to_string(), FieldSchema::from(f));
                        }
                    }
                }
                tracing::info!(attributes = index.len(), "core schema index built");
                Ok::<_, SalesforceError>(index)
            })
            .await
    }

    /// Sorted friendly names, e.g. `["Account.BillingCountry", ...]`.
    pub async fn attribute_names(&self) -> Result<Vec<String>, SalesforceError> {
        Ok(self.index().await?.keys().cloned().collect())
    }

    /// Resolve a friendly attribute or API name within `object`.
    pub async fn resolve_field(
        &self,
        object: &str,
        friendly_or_api: &str,
    ) -> Result<Option<(String, FieldSchema)>, SalesforceError> {
        let index = self.index().await?;
        let Some(object) = canonical_object(object) else {
            return Ok(None);
        };
        let wanted = friendly_or_api.trim();

        let exact = format!("{object}.{wanted}");
        if let Some(schema) = index.get(&exact) {
            return Ok(Some((exact, schema.clone())));
        }

        let prefix = format!("{object}.");
        Ok(index
            .iter()
            .filter_map(|(attr, schema)| attr.strip_prefix(&prefix).map(|suffix| (attr, suffix, schema)))
            .find(|(_, suffix, schema)| {
                suffix.eq_ignore_ascii_case(wanted) || schema.api.eq_ignore_ascii_case(wanted)
            })
            .map(|(attr, _, schema)| (attr.clone(), schema.clone())))
    }

    /// Resolve `"Object.Field"`.
    pub async fn lookup(&self, field_api: &str) -> Result<FieldLookup, SalesforceError> {
        let Some((object_part, field_part)) = field_api.trim().split_once('.') else {
            return Ok(FieldLookup::BadFormat);
        };
        let object = canonical_object(object_part)
            .map(String::from)
            .unwrap_or_else(|| object_part.trim().to_string());

        Ok(match self.resolve_field(&object, field_part).await? {
            Some((attribute, schema)) => FieldLookup::Found {
                object,
                attribute,
                schema,
            },
            None => FieldLookup::NotAllowed {
                object,
                field: field_part.trim().to_string(),
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::salesforce::client::testing::FakeSalesforce;

    fn schema() -> (Arc<FakeSalesforce>, CoreSchema) {
        let fake = Arc::new(FakeSalesforce::sample());
        let schema = CoreSchema::new(fake.clone());
        (fake, schema)
    }

    #[tokio::test]
    async fn test_index_contains_only_existing_fields() {
        let (_, schema) = schema();
        let names = schema.attribute_names().await.unwrap();
        assert!(names.contains(&"Opportunity.StageName".to_string()));
        assert!(names.contains(&"Account.BillingCountry".to_string()));
        assert!(!names.contains(&"Account.Industry".to_string()));
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
    }

    #[tokio::test]
    async fn test_candidate_falls_back_case_insensitively() {
        let (_, schema) = schema();
        let index = schema.index().await.unwrap();
        assert_eq!(index["Opportunity.ARR"].api, "arr__c");
    }

    #[tokio::test]
    async fn test_picklist_values_are_active_only() {
        let (_, schema) = schema();
        let index = schema.index().await.unwrap();
        assert_eq!(
            index["Opportunity.StageName"].values,
            Some(vec!["Prospecting".to_string(), "Closed Won".to_string()])
        );
        let owner = &index["Opportunity.OwnerId"];
        assert_eq!(owner.references, Some(vec!["User".to_string()]));
        assert_eq!(owner.relationship_name.as_deref(), Some("Owner"));
        assert!(index["Opportunity.Amount"].values.is_none());
    }

    #[tokio::test]
    async fn test_describe_is_cached() {
        let (fake, schema) = schema();
        schema.index().await.unwrap();
        schema.attribute_names().await.unwrap();
        schema.describe("Opportunity").await.unwrap();
        assert_eq!(*fake.describe_calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_lookup_forms() {
        let (_, schema) = schema();
        match schema.lookup("opportunity.stagename").await.unwrap() {
            FieldLookup::Found { object, attribute, schema } => {
                assert_eq!(object, "Opportunity");
                assert_eq!(attribute, "Opportunity.StageName");
                assert_eq!(schema.api, "StageName");
            }
            other => panic!("unexpected: {other:?}"),
        }
        // API name instead of the friendly suffix.
        assert!(matches!(
            schema.lookup("Opportunity.LastActivityDate").await.unwrap(),
            FieldLookup::NotAllowed { .. }
        ));
        assert!(matches!(
            schema.lookup("Opportunity.arr__C").await.unwrap(),
            FieldLookup::Found { ref attribute, .. } if attribute == "Opportunity.ARR"
        ));
        assert_eq!(
            schema.lookup("Account.Secret__c").await.unwrap(),
            FieldLookup::NotAllowed {
                object: "Account".into(),
                field: "Secret__c".into()
            }
        );
        assert_eq!(schema.lookup("StageName").await.unwrap(), FieldLookup::BadFormat);
    }
}
