//! Salesforce: REST client, allow-listed core schema, SOQL tools, the SOQL agent,
//! and query execution.

pub mod agent;
pub mod client;
pub mod core_schema;
pub mod errors;
pub mod execute;
pub mod tools;

pub use agent::{build_soql_agent, run_soql_agent, soql_agent};
pub use client::{FieldDescribe, QueryResult, SalesforceApi, SalesforceClient, SearchRecord};
pub use core_schema::{CoreSchema, FieldSchema};
pub use errors::SalesforceError;
pub use execute::{attach_records, execute_soql};
pub use tools::{NameMatch, SoqlToolContext};
