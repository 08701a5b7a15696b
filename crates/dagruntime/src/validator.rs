use std::collections::{HashMap, HashSet, VecDeque};

use petgraph::graph::{DiGraph, NodeIndex};
use serde_json::Value;

use dagcore::{Edge, NodeSpec, ParamKind, ValidationError, Workflow, GLOBAL_ID, LOOP_ID};

use crate::registry::NodeRegistry;
use crate::resolver::collect_references;

/// Validated, normalized workflow: literal params coerced and defaults
/// filled, reference-implied edges materialized, plus the topological
/// order the scheduler uses as its ready-queue tie-break.
#[derive(Debug, Clone)]
pub struct ValidWorkflow {
    pub workflow: Workflow,
    pub order: Vec<String>,
    pub rank: HashMap<String, usize>,
    pub predecessors: HashMap<String, Vec<String>>,
    pub successors: HashMap<String, Vec<String>>,
}

impl ValidWorkflow {
    /// Node ids with no outgoing edges, in topological order.
    pub fn sinks(&self) -> Vec<&str> {
        self.order
            .iter()
            .filter(|id| self.successors[*id].is_empty())
            .map(String::as_str)
            .collect()
    }
}

/// Validate a workflow document against the registry (C3).
///
/// `ambient` lists reserved ids references may target without implying an
/// edge: `global` for top-level runs, plus `loop` inside loop subgraphs.
pub fn validate(
    workflow: &Workflow,
    registry: &NodeRegistry,
    ambient: &[&str],
) -> Result<ValidWorkflow, ValidationError> {
    if workflow.nodes.is_empty() {
        return Err(ValidationError::EmptyWorkflow);
    }

    let mut ids: HashSet<&str> = HashSet::with_capacity(workflow.nodes.len());
    for node in &workflow.nodes {
        if node.id == LOOP_ID || node.id == GLOBAL_ID {
            return Err(ValidationError::ReservedNodeId(node.id.clone()));
        }
        if !ids.insert(node.id.as_str()) {
            return Err(ValidationError::DuplicateNodeId(node.id.clone()));
        }
        if !registry.contains(&node.node_type) {
            return Err(ValidationError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            });
        }
    }

    for edge in &workflow.edges {
        for (endpoint, side) in [(&edge.from, "from"), (&edge.to, "to")] {
            if !ids.contains(endpoint.as_str()) {
                return Err(ValidationError::UnknownEdgeEndpoint {
                    node_id: endpoint.clone(),
                    side,
                });
            }
        }
    }

    let mut normalized = workflow.clone();

    // Param presence, default filling and lenient literal coercion.
    for node in &mut normalized.nodes {
        let spec = registry
            .spec(&node.node_type)
            .expect("node type checked above");
        check_params(node, spec)?;
    }

    // Every reference implies an edge: for a reference from node y to
    // node x, insert (x, y) unless already present. Raw params (nested
    // workflow documents) are opaque here; their references belong to the
    // child run.
    for node in &normalized.nodes {
        let spec = registry
            .spec(&node.node_type)
            .expect("node type checked above");
        let mut references = Vec::new();
        for (name, value) in &node.params {
            if spec.params.get(name).map_or(false, |p| p.raw) {
                continue;
            }
            collect_references(value, &mut references);
        }
        for reference in references {
            let target = reference.root.as_str();
            if ambient.contains(&target) {
                continue;
            }
            if !ids.contains(target) {
                return Err(ValidationError::UnknownReference {
                    node_id: node.id.clone(),
                    reference: render_reference(&reference),
                    target: target.to_string(),
                });
            }
            if target != node.id && !normalized.has_edge(target, &node.id) {
                normalized.edges.push(Edge::new(target, node.id.clone()));
            }
        }
    }

    let order = topological_order(&normalized)?;
    let rank: HashMap<String, usize> = order
        .iter()
        .enumerate()
        .map(|(i, id)| (id.clone(), i))
        .collect();

    let mut predecessors: HashMap<String, Vec<String>> = HashMap::new();
    let mut successors: HashMap<String, Vec<String>> = HashMap::new();
    for node in &normalized.nodes {
        predecessors.entry(node.id.clone()).or_default();
        successors.entry(node.id.clone()).or_default();
    }
    for edge in &normalized.edges {
        // A self-edge would have been reported as a cycle already.
        predecessors
            .get_mut(&edge.to)
            .expect("edge endpoints checked")
            .push(edge.from.clone());
        successors
            .get_mut(&edge.from)
            .expect("edge endpoints checked")
            .push(edge.to.clone());
    }

    Ok(ValidWorkflow {
        workflow: normalized,
        order,
        rank,
        predecessors,
        successors,
    })
}

fn check_params(
    node: &mut dagcore::WorkflowNode,
    spec: &NodeSpec,
) -> Result<(), ValidationError> {
    for (name, param) in &spec.params {
        match node.params.get(name).cloned() {
            None => {
                if let Some(default) = &param.default {
                    node.params.insert(name.clone(), default.clone());
                } else if param.required {
                    return Err(ValidationError::MissingParam {
                        node_id: node.id.clone(),
                        param: name.clone(),
                    });
                }
            }
            Some(value) => {
                // References are type-checked at resolution time; only
                // literals are coerced here.
                if let Value::String(s) = &value {
                    if crate::resolver::is_reference(s) {
                        continue;
                    }
                }
                let coerced =
                    coerce(&value, param.kind).map_err(|actual| ValidationError::ParamType {
                        node_id: node.id.clone(),
                        param: name.clone(),
                        expected: param.kind.to_string(),
                        actual,
                    })?;
                node.params.insert(name.clone(), coerced);
            }
        }
    }
    Ok(())
}

/// Lenient literal coercion toward the declared kind: numeric strings
/// become numbers, JSON-shaped strings become mappings/sequences.
pub fn coerce(value: &Value, kind: ParamKind) -> Result<Value, String> {
    let mismatch = |value: &Value| {
        Err(match value {
            Value::String(s) => format!("string \"{s}\""),
            other => format!("{other}"),
        })
    };

    match kind {
        ParamKind::Any => Ok(value.clone()),
        ParamKind::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => mismatch(value),
        },
        ParamKind::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => match n.as_f64() {
                Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
                _ => mismatch(value),
            },
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .or_else(|_| mismatch(value)),
            _ => mismatch(value),
        },
        ParamKind::Float => match value {
            Value::Number(_) => Ok(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .or_else(|_| mismatch(value)),
            _ => mismatch(value),
        },
        ParamKind::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.trim() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => mismatch(value),
            },
            _ => mismatch(value),
        },
        ParamKind::Mapping => match value {
            Value::Object(_) => Ok(value.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Object(_)) => Ok(parsed),
                _ => mismatch(value),
            },
            _ => mismatch(value),
        },
        ParamKind::Sequence | ParamKind::Tuple => match value {
            Value::Array(_) => Ok(value.clone()),
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Array(_)) => Ok(parsed),
                _ => mismatch(value),
            },
            _ => mismatch(value),
        },
    }
}

/// Kahn's algorithm over a petgraph adjacency. On a cycle, the unsorted
/// remainder names the offending nodes.
fn topological_order(workflow: &Workflow) -> Result<Vec<String>, ValidationError> {
    let mut graph: DiGraph<&str, ()> = DiGraph::new();
    let mut indices: HashMap<&str, NodeIndex> = HashMap::new();
    for node in &workflow.nodes {
        indices.insert(&node.id, graph.add_node(node.id.as_str()));
    }
    for edge in &workflow.edges {
        graph.add_edge(indices[edge.from.as_str()], indices[edge.to.as_str()], ());
    }

    let mut in_degree: HashMap<NodeIndex, usize> = graph
        .node_indices()
        .map(|idx| {
            (
                idx,
                graph
                    .neighbors_directed(idx, petgraph::Direction::Incoming)
                    .count(),
            )
        })
        .collect();

    let mut queue: VecDeque<NodeIndex> = workflow
        .nodes
        .iter()
        .map(|n| indices[n.id.as_str()])
        .filter(|idx| in_degree[idx] == 0)
        .collect();

    let mut order = Vec::with_capacity(workflow.nodes.len());
    while let Some(idx) = queue.pop_front() {
        order.push(graph[idx].to_string());
        for next in graph.neighbors_directed(idx, petgraph::Direction::Outgoing) {
            let degree = in_degree.get_mut(&next).expect("known node");
            *degree -= 1;
            if *degree == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != workflow.nodes.len() {
        let sorted: HashSet<&str> = order.iter().map(String::as_str).collect();
        let mut remaining: Vec<String> = workflow
            .node_ids()
            .filter(|id| !sorted.contains(id))
            .map(String::from)
            .collect();
        remaining.sort();
        return Err(ValidationError::Cycle(remaining));
    }

    Ok(order)
}

fn render_reference(reference: &crate::resolver::Reference) -> String {
    use crate::resolver::Segment;
    let mut out = format!("${}", reference.root);
    for segment in &reference.segments {
        match segment {
            Segment::Field(f) => {
                out.push('.');
                out.push_str(f);
            }
            Segment::Index(i) => out.push_str(&format!("[{i}]")),
            Segment::Wildcard => out.push_str("[*]"),
        }
    }
    out
}
