//! JSON payload to [`ScriptValue`] conversion.
//!
//! Push messages arrive as JSON text. `serde_json` (with `preserve_order`)
//! yields the generic node tree; [`to_script_value`] walks it into the
//! scripting runtime's value shape.

use indexmap::IndexMap;
use serde_json::Value;
use thiserror::Error;

use super::ScriptValue;

#[derive(Error, Debug, PartialEq)]
pub enum JsonError {
    #[error("Failed to parse push payload at line {line}, column {column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },
    #[error("Push payload is empty")]
    Empty,
}

pub fn parse(text: &str) -> Result<Value, JsonError> {
    if text.trim().is_empty() {
        return Err(JsonError::Empty);
    }
    serde_json::from_str(text).map_err(|e| JsonError::Parse {
        message: e.to_string(),
        line: e.line(),
        column: e.column(),
    })
}

/// Converts a parsed JSON tree. Arrays keep element order and objects keep
/// key order as encountered.
pub fn to_script_value(node: &Value) -> ScriptValue {
    match node {
        Value::Null => ScriptValue::Nil,
        Value::Bool(b) => ScriptValue::Boolean(*b),
        Value::Number(n) => ScriptValue::Number(number(n)),
        Value::String(s) => ScriptValue::String(s.clone()),
        Value::Array(items) => ScriptValue::List(items.iter().map(to_script_value).collect()),
        Value::Object(fields) => ScriptValue::Map(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), to_script_value(v)))
                .collect::<IndexMap<String, ScriptValue>>(),
        ),
    }
}

/// Numbers keep their source text, so a literal beyond `f64` range still
/// reads as an infinity instead of failing the whole payload.
fn number(n: &serde_json::Number) -> f64 {
    n.as_f64()
        .or_else(|| n.to_string().parse().ok())
        .unwrap_or_default()
}

/// Parses and converts in one step.
pub fn decode(text: &str) -> Result<ScriptValue, JsonError> {
    parse(text).map(|tree| to_script_value(&tree))
}
