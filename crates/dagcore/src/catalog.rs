use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::EngineError;

/// Declared kind of a node parameter. The validator coerces lenient
/// literals (numeric strings, JSON-shaped strings) toward the declared
/// kind before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Integer,
    Float,
    Boolean,
    Mapping,
    Sequence,
    Tuple,
    Any,
}

impl std::fmt::Display for ParamKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
            ParamKind::Float => "float",
            ParamKind::Boolean => "boolean",
            ParamKind::Mapping => "mapping",
            ParamKind::Sequence => "sequence",
            ParamKind::Tuple => "tuple",
            ParamKind::Any => "any",
        };
        f.write_str(name)
    }
}

/// Schema of one declared parameter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub kind: ParamKind,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Raw params are opaque to the enclosing run: reference expressions
    /// inside them are neither analyzed nor resolved. Used for nested
    /// workflow documents, whose references belong to the child run.
    #[serde(default)]
    pub raw: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub doc: String,
}

impl ParamSpec {
    pub fn required(kind: ParamKind) -> Self {
        Self {
            kind,
            required: true,
            default: None,
            raw: false,
            doc: String::new(),
        }
    }

    pub fn optional(kind: ParamKind, default: impl Into<Option<Value>>) -> Self {
        Self {
            kind,
            required: false,
            default: default.into(),
            raw: false,
            doc: String::new(),
        }
    }

    pub fn raw(mut self) -> Self {
        self.raw = true;
        self
    }

    pub fn doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = doc.into();
        self
    }
}

fn default_timeout_secs() -> u64 {
    60
}

/// Catalog entry for one node type. Immutable once registered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    #[serde(rename = "type")]
    pub node_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub params: BTreeMap<String, ParamSpec>,
    #[serde(default)]
    pub outputs: BTreeMap<String, String>,
    /// Whether failed attempts with a transient error are retried.
    #[serde(default)]
    pub retryable: bool,
    /// Isolated node kinds (subprocess workers) are hard-killed on timeout
    /// instead of cancelled cooperatively.
    #[serde(default)]
    pub isolated: bool,
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

impl NodeSpec {
    pub fn new(node_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            node_type: node_type.into(),
            name: name.into(),
            description: String::new(),
            params: BTreeMap::new(),
            outputs: BTreeMap::new(),
            retryable: false,
            isolated: false,
            default_timeout_secs: default_timeout_secs(),
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = text.into();
        self
    }

    pub fn param(mut self, name: impl Into<String>, spec: ParamSpec) -> Self {
        self.params.insert(name.into(), spec);
        self
    }

    pub fn output(mut self, name: impl Into<String>, doc: impl Into<String>) -> Self {
        self.outputs.insert(name.into(), doc.into());
        self
    }

    pub fn retryable(mut self) -> Self {
        self.retryable = true;
        self
    }

    pub fn isolated(mut self) -> Self {
        self.isolated = true;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }
}

/// Declarative catalog document, loaded at startup and overlaid on the
/// registered factories. The file describes node types; it never defines
/// implementations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Catalog {
    pub nodes: Vec<NodeSpec>,
}

impl Catalog {
    pub fn from_json_str(raw: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_produces_catalog_entry() {
        let spec = NodeSpec::new("add", "Add")
            .description("Adds two numbers")
            .param("num1", ParamSpec::required(ParamKind::Float))
            .param(
                "num2",
                ParamSpec::optional(ParamKind::Float, Some(json!(0.0))).doc("defaults to zero"),
            )
            .output("result", "sum of num1 and num2");

        assert_eq!(spec.node_type, "add");
        assert!(spec.params["num1"].required);
        assert_eq!(spec.params["num2"].default, Some(json!(0.0)));
        assert_eq!(spec.default_timeout_secs, 60);
        assert!(!spec.retryable);
    }

    #[test]
    fn catalog_round_trips_through_json() {
        let raw = r#"{
            "nodes": [{
                "type": "python_execute",
                "name": "Python",
                "params": {"code": {"kind": "string", "required": true}},
                "outputs": {"stdout": "captured stdout"},
                "isolated": true,
                "default_timeout_secs": 30
            }]
        }"#;

        let catalog = Catalog::from_json_str(raw).unwrap();
        let spec = &catalog.nodes[0];
        assert!(spec.isolated);
        assert_eq!(spec.default_timeout_secs, 30);
        assert_eq!(spec.params["code"].kind, ParamKind::String);
    }
}
