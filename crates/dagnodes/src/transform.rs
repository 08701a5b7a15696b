use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::{require, require_str};
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

/// Parses a JSON string into a structured value, so downstream references
/// can drill into it (`$p.value.results[*].link`).
pub struct JsonParseNode;

#[async_trait]
impl NodeExecutor for JsonParseNode {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let text = require_str(&params, "text")?;
        let parsed: Value = serde_json::from_str(text)
            .map_err(|err| NodeError::invalid_param("text", format!("invalid JSON: {err}")))?;
        Ok(json!({"value": parsed}))
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("json_parse", "JSON parse")
            .description("Parses a JSON string into a structured value")
            .param("text", ParamSpec::required(ParamKind::String).doc("JSON document"))
            .output("value", "parsed value")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(JsonParseNode))
    }
}

/// Serializes a value to a JSON string.
pub struct JsonStringifyNode;

#[async_trait]
impl NodeExecutor for JsonStringifyNode {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let value = require(&params, "value")?;
        let text = serde_json::to_string_pretty(value)
            .map_err(|err| NodeError::Internal(format!("JSON stringify failed: {err}")))?;
        Ok(json!({"text": text}))
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("json_stringify", "JSON stringify")
            .description("Serializes a value to a JSON string")
            .param("value", ParamSpec::required(ParamKind::Any))
            .output("text", "pretty-printed JSON")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(JsonStringifyNode))
    }
}
