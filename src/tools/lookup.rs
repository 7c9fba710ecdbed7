//! Discriminated outcome for collaborator lookups.
//!
//! Distinguishes "the query ran and matched nothing" from "the query could
//! not run", which callers render differently to the model.

use std::fmt::Display;

use serde_json::{json, Value};

/// Result of looking something up in an external system.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    /// The lookup succeeded and produced a value.
    Found(T),
    /// The lookup succeeded and there is nothing to return.
    NotFound,
    /// The lookup failed (network, auth, upstream error).
    Transient(String),
}

impl<T> Lookup<T> {
    /// Build from a fallible, optional result.
    pub fn from_result<E: Display>(result: Result<Option<T>, E>) -> Self {
        match result {
            Ok(Some(v)) => Lookup::Found(v),
            Ok(None) => Lookup::NotFound,
            Err(e) => Lookup::Transient(e.to_string()),
        }
    }

    /// Treat an empty collection as `NotFound`.
    pub fn from_collection<E: Display>(result: Result<T, E>) -> Self
    where
        T: IsEmpty,
    {
        match result {
            Ok(v) if v.is_empty_value() => Lookup::NotFound,
            Ok(v) => Lookup::Found(v),
            Err(e) => Lookup::Transient(e.to_string()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Lookup<U> {
        match self {
            Lookup::Found(v) => Lookup::Found(f(v)),
            Lookup::NotFound => Lookup::NotFound,
            Lookup::Transient(e) => Lookup::Transient(e),
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Lookup::Found(_))
    }
}

impl<T: serde::Serialize> Lookup<T> {
    /// Render for the model: `{found: true, ...}`, `{found: false}`, or `{error}`.
    ///
    /// `context` is merged into every shape so the model can see what was asked.
    pub fn to_payload(&self, value_key: &str, context: Value) -> Value {
        let mut payload = match context {
            Value::Object(map) => Value::Object(map),
            _ => json!({}),
        };
        match self {
            Lookup::Found(v) => {
                payload["found"] = json!(true);
                payload[value_key] = serde_json::to_value(v).unwrap_or(Value::Null);
            }
            Lookup::NotFound => {
                payload["found"] = json!(false);
            }
            Lookup::Transient(e) => {
                payload["error"] = json!(e);
            }
        }
        payload
    }
}

/// Collections that can report emptiness.
pub trait IsEmpty {
    fn is_empty_value(&self) -> bool;
}

impl<T> IsEmpty for Vec<T> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}
