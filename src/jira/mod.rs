//! Jira: REST client, JQL tools, the JQL agent, and query execution.

pub mod agent;
pub mod client;
pub mod errors;
pub mod execute;
pub mod tools;

pub use agent::{build_jql_agent, run_jql_agent, JqlAgent};
pub use client::{IssueRow, IssueTypeStatuses, JiraApi, JiraClient, ProjectRef};
pub use errors::JiraError;
pub use execute::{attach_issues, execute_jql};
pub use tools::JqlToolContext;
