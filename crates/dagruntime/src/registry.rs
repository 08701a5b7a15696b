use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use dagcore::{Catalog, EngineError, NodeError, NodeSpec};

use crate::context::ExecContext;

/// One node execution. Implementations receive fully resolved params and
/// return the node's output object; intermediate progress goes through the
/// context's callbacks. Cooperative cancellation: check
/// `ctx.cancellation` at every suspension point.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext)
        -> Result<Value, NodeError>;
}

/// Factory for creating executor instances of one node type. The factory
/// also carries the type's catalog entry.
pub trait NodeFactory: Send + Sync {
    fn spec(&self) -> NodeSpec;

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError>;
}

struct RegistryEntry {
    spec: NodeSpec,
    factory: Arc<dyn NodeFactory>,
}

/// Catalog of known node types. Built once at startup, then frozen behind
/// an `Arc` for the lifetime of the process.
#[derive(Default)]
pub struct NodeRegistry {
    entries: HashMap<String, RegistryEntry>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node factory. Registering the same type twice is a
    /// startup error.
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) -> Result<(), EngineError> {
        let spec = factory.spec();
        let node_type = spec.node_type.clone();
        if self.entries.contains_key(&node_type) {
            return Err(EngineError::DuplicateNodeType(node_type));
        }
        tracing::info!("registering node type: {}", node_type);
        self.entries.insert(node_type, RegistryEntry { spec, factory });
        Ok(())
    }

    /// Overlay a declarative catalog document onto the registered types.
    /// Entries for unregistered types are a startup error: the catalog
    /// describes nodes, it cannot conjure implementations.
    pub fn apply_catalog(&mut self, catalog: &Catalog) -> Result<(), EngineError> {
        for spec in &catalog.nodes {
            let entry = self
                .entries
                .get_mut(&spec.node_type)
                .ok_or_else(|| EngineError::UnknownCatalogType(spec.node_type.clone()))?;
            entry.spec = spec.clone();
        }
        Ok(())
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    pub fn spec(&self, node_type: &str) -> Option<&NodeSpec> {
        self.entries.get(node_type).map(|e| &e.spec)
    }

    pub fn lookup(&self, node_type: &str) -> Option<(&NodeSpec, Arc<dyn NodeFactory>)> {
        self.entries
            .get(node_type)
            .map(|e| (&e.spec, Arc::clone(&e.factory)))
    }

    /// All registered specs, sorted by type.
    pub fn list(&self) -> Vec<&NodeSpec> {
        let mut specs: Vec<&NodeSpec> = self.entries.values().map(|e| &e.spec).collect();
        specs.sort_by(|a, b| a.node_type.cmp(&b.node_type));
        specs
    }

    /// Human-readable description of every node type, its params and
    /// outputs. Fed to the agent planner as the tool list.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for spec in self.list() {
            let _ = writeln!(out, "- {}: {}", spec.node_type, spec.name);
            if !spec.description.is_empty() {
                let _ = writeln!(out, "  {}", spec.description);
            }
            if !spec.params.is_empty() {
                let _ = writeln!(out, "  params:");
                for (name, param) in &spec.params {
                    let mut line = format!("    {name} ({})", param.kind);
                    if param.required {
                        line.push_str(", required");
                    } else if let Some(default) = &param.default {
                        let _ = write!(line, ", default: {default}");
                    }
                    if !param.doc.is_empty() {
                        let _ = write!(line, " - {}", param.doc);
                    }
                    let _ = writeln!(out, "{line}");
                }
            }
            if !spec.outputs.is_empty() {
                let _ = writeln!(out, "  outputs:");
                for (name, doc) in &spec.outputs {
                    let _ = writeln!(out, "    {name}: {doc}");
                }
            }
        }
        out
    }
}
