//! Tools — the capabilities the model can call.
//!
//! Every tool is a [`ToolSpec`]: a name, a description shown to the model,
//! a JSON input schema, and a [`ToolHandler`]. The [`ToolRegistry`] is built
//! once per process and shared read-only across agent runs.

pub mod common;
pub mod errors;
pub mod handler;
pub mod lookup;
pub mod registry;
pub mod schema;

pub use common::think_tool;
pub use errors::ToolError;
pub use handler::{context_tool, handler_fn, ToolHandler};
pub use lookup::Lookup;
pub use registry::{ToolRegistry, ToolSpec};
