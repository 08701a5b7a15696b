//! Typed accessors for resolved parameter maps, used by leaf executors.
//!
//! Agent-supplied inputs bypass the validator's coercion, so the numeric
//! accessors stay lenient about numeric strings.

use serde_json::{Map, Value};

use dagcore::NodeError;

pub fn require<'a>(params: &'a Map<String, Value>, name: &str) -> Result<&'a Value, NodeError> {
    params
        .get(name)
        .ok_or_else(|| NodeError::MissingParam(name.to_string()))
}

pub fn require_str<'a>(params: &'a Map<String, Value>, name: &str) -> Result<&'a str, NodeError> {
    require(params, name)?
        .as_str()
        .ok_or_else(|| NodeError::invalid_param(name, "expected a string"))
}

pub fn require_f64(params: &Map<String, Value>, name: &str) -> Result<f64, NodeError> {
    let value = require(params, name)?;
    as_f64(value).ok_or_else(|| NodeError::invalid_param(name, "expected a number"))
}

pub fn opt_str<'a>(params: &'a Map<String, Value>, name: &str, default: &'a str) -> &'a str {
    params.get(name).and_then(Value::as_str).unwrap_or(default)
}

pub fn opt_f64(params: &Map<String, Value>, name: &str, default: f64) -> f64 {
    params.get(name).and_then(as_f64).unwrap_or(default)
}

pub fn opt_u64(params: &Map<String, Value>, name: &str, default: u64) -> u64 {
    params.get(name).and_then(Value::as_u64).unwrap_or(default)
}

pub fn opt_bool(params: &Map<String, Value>, name: &str, default: bool) -> bool {
    params.get(name).and_then(Value::as_bool).unwrap_or(default)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
