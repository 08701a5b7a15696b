use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved id for the innermost loop context inside a loop subgraph.
pub const LOOP_ID: &str = "loop";

/// Reserved id for run-level global params.
pub const GLOBAL_ID: &str = "global";

/// Complete workflow document: a set of typed nodes plus dependency edges.
///
/// The induced graph must be a DAG; the validator enforces that together
/// with catalog conformance before any node runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub nodes: Vec<WorkflowNode>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Workflow {
    pub fn from_json_str(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn from_value(document: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document)
    }

    pub fn node(&self, id: &str) -> Option<&WorkflowNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(|n| n.id.as_str())
    }

    pub fn has_edge(&self, from: &str, to: &str) -> bool {
        self.edges.iter().any(|e| e.from == from && e.to == to)
    }
}

/// One node instance inside a workflow. `params` values are either JSON
/// literals or reference expression strings (`$id.path`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl WorkflowNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

/// Directed dependency between two node ids. Edges carry no payload; data
/// moves through the output store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_document_with_refs() {
        let raw = r#"{
            "nodes": [
                {"id": "a", "type": "add", "params": {"num1": 10, "num2": 20}},
                {"id": "b", "type": "multiply", "params": {"num1": "$a.result", "num2": 2}}
            ],
            "edges": [{"from": "a", "to": "b"}]
        }"#;

        let wf = Workflow::from_json_str(raw).unwrap();
        assert_eq!(wf.nodes.len(), 2);
        assert_eq!(wf.nodes[1].node_type, "multiply");
        assert_eq!(wf.nodes[1].params["num1"], json!("$a.result"));
        assert!(wf.has_edge("a", "b"));
    }

    #[test]
    fn edges_default_to_empty() {
        let wf = Workflow::from_json_str(r#"{"nodes": [{"id": "solo", "type": "echo"}]}"#).unwrap();
        assert!(wf.edges.is_empty());
        assert!(wf.node("solo").unwrap().params.is_empty());
    }
}
