//! Structural validation of tool arguments against a declared input schema.
//!
//! Covers the JSON Schema subset tool declarations use: `type`, `required`,
//! `properties` (with `type`, `enum`, and array `items.type`), and
//! `additionalProperties: false`. Anything else in the schema is ignored.

use serde_json::Value;

use super::errors::ToolError;

/// Validate `args` against `schema` for the tool named `tool`.
pub fn validate_arguments(tool: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let invalid = |reason: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason,
    };

    let obj = match args {
        Value::Object(map) => map,
        other => {
            return Err(invalid(format!(
                "arguments must be a JSON object, got {}",
                type_name(other)
            )))
        }
    };

    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field in required.iter().filter_map(|f| f.as_str()) {
            if !obj.contains_key(field) {
                return Err(invalid(format!("missing required field: '{field}'")));
            }
        }
    }

    let properties = schema.get("properties").and_then(|p| p.as_object());
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));

    for (key, value) in obj {
        let prop = match properties.and_then(|p| p.get(key)) {
            Some(p) => p,
            None if closed => return Err(invalid(format!("unexpected field: '{key}'"))),
            None => continue,
        };

        if let Some(expected) = prop.get("type") {
            if !matches_type(expected, value) {
                return Err(invalid(format!(
                    "field '{key}' expected {}, got {}",
                    describe_type(expected),
                    type_name(value)
                )));
            }
        }

        if let Some(allowed) = prop.get("enum").and_then(|e| e.as_array()) {
            if !allowed.contains(value) {
                return Err(invalid(format!(
                    "field '{key}' must be one of {}",
                    Value::Array(allowed.clone())
                )));
            }
        }

        if let (Value::Array(items), Some(item_type)) =
            (value, prop.get("items").and_then(|i| i.get("type")))
        {
            if let Some((idx, bad)) = items
                .iter()
                .enumerate()
                .find(|(_, item)| !matches_type(item_type, item))
            {
                return Err(invalid(format!(
                    "field '{key}[{idx}]' expected {}, got {}",
                    describe_type(item_type),
                    type_name(bad)
                )));
            }
        }
    }

    Ok(())
}

/// `type` may be a single name or a list of names.
fn matches_type(expected: &Value, value: &Value) -> bool {
    match expected {
        Value::String(name) => matches_type_name(name, value),
        Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .any(|n| matches_type_name(n, value)),
        _ => true,
    }
}

fn matches_type_name(name: &str, value: &Value) -> bool {
    match name {
        "string" => value.is_string(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().map(|f| f.fract() == 0.0).unwrap_or(false)
        }
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

fn describe_type(expected: &Value) -> String {
    match expected {
        Value::String(s) => s.clone(),
        Value::Array(names) => names
            .iter()
            .filter_map(|n| n.as_str())
            .collect::<Vec<_>>()
            .join(" | "),
        other => other.to_string(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
