use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec, Workflow, LOOP_ID};

use crate::context::ExecContext;
use crate::registry::{NodeExecutor, NodeFactory};
use crate::scheduler::Scheduler;
use crate::store::OutputStore;
use crate::validator::{validate, ValidWorkflow};

/// Synthesised bindings exposed to a loop's child workflow under the
/// reserved id `loop`. Nested loops shadow: `$loop` always refers to the
/// innermost iteration.
#[derive(Debug, Clone)]
pub struct LoopContext {
    pub index: usize,
    pub item: Value,
    pub length: usize,
}

impl LoopContext {
    pub fn to_value(&self) -> Value {
        json!({
            "index": self.index,
            "item": self.item,
            "length": self.length,
            "first": self.index == 0,
            "last": self.index + 1 == self.length,
        })
    }
}

/// `loop_node` executor (C6): expands a nested workflow once per element
/// of the input sequence, each iteration over a fresh output store seeded
/// with the loop context.
pub struct LoopExecutor;

#[async_trait]
impl NodeExecutor for LoopExecutor {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let items = coerce_array(params.get("array"))?;
        let document = params
            .get("workflow_json")
            .cloned()
            .ok_or_else(|| NodeError::MissingParam("workflow_json".to_string()))?;
        let workflow = Workflow::from_value(document)
            .map_err(|err| NodeError::invalid_param("workflow_json", err.to_string()))?;
        let continue_on_error = params
            .get("continue_on_error")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let max_iterations = params
            .get("max_iterations")
            .and_then(Value::as_u64)
            .map(|n| n as usize);

        // Child validation failures surface as this node's failure; the
        // reserved `loop` id is only ambient inside the subgraph.
        let plan = validate(&workflow, &ctx.registry, &[LOOP_ID])
            .map_err(|err| NodeError::Permanent(format!("nested workflow invalid: {err}")))?;

        let scheduler = Scheduler::new(ctx.max_parallel);
        let mut results = Vec::new();
        let mut success = true;

        for (index, item) in items.iter().enumerate() {
            if let Some(cap) = max_iterations {
                if index >= cap {
                    tracing::warn!(
                        "loop '{}' stopping at iteration cap {cap} ({} items)",
                        ctx.node_id,
                        items.len()
                    );
                    break;
                }
            }
            if ctx.is_cancelled() {
                return Err(NodeError::Cancelled);
            }

            let loop_ctx = LoopContext {
                index,
                item: item.clone(),
                length: items.len(),
            };
            let store = Arc::new(OutputStore::seeded([(LOOP_ID, loop_ctx.to_value())]));
            let iter_ctx = ctx.for_iteration(index as u32);

            let summary = scheduler.run(&plan, Arc::clone(&store), &iter_ctx).await;
            results.push(iteration_output(&plan, &store));

            if !summary.is_success() {
                success = false;
                if !continue_on_error {
                    break;
                }
            }
        }

        Ok(json!({
            "results": results,
            "total": items.len(),
            "success": success,
        }))
    }
}

/// Terminal output of one iteration: the sink node's data, or a mapping of
/// sink id to data when the child has several sinks.
fn iteration_output(plan: &ValidWorkflow, store: &OutputStore) -> Value {
    let sinks = plan.sinks();
    match sinks.as_slice() {
        [only] => store.get(only).map(|v| (*v).clone()).unwrap_or(Value::Null),
        many => Value::Object(
            many.iter()
                .map(|id| {
                    let data = store.get(id).map(|v| (*v).clone()).unwrap_or(Value::Null);
                    (id.to_string(), data)
                })
                .collect(),
        ),
    }
}

/// Scalars and mappings are accepted as one-element sequences, matching
/// the lenient input contract of the original loop node.
fn coerce_array(value: Option<&Value>) -> Result<Vec<Value>, NodeError> {
    match value {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Err(NodeError::MissingParam("array".to_string())),
        Some(other) => Ok(vec![other.clone()]),
    }
}

pub struct LoopNodeFactory;

impl NodeFactory for LoopNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("loop_node", "Loop")
            .description(
                "Runs a nested workflow once per element of an input sequence; \
                 the child can reference $loop.item, $loop.index, $loop.length, \
                 $loop.first and $loop.last",
            )
            .param(
                "array",
                ParamSpec::required(ParamKind::Any).doc("sequence to iterate over"),
            )
            .param(
                "workflow_json",
                ParamSpec::required(ParamKind::Mapping)
                    .raw()
                    .doc("nested workflow document"),
            )
            .param(
                "continue_on_error",
                ParamSpec::optional(ParamKind::Boolean, Some(Value::Bool(false)))
                    .doc("keep iterating after a failed iteration"),
            )
            .param(
                "max_iterations",
                ParamSpec::optional(ParamKind::Integer, None)
                    .doc("optional cap on the number of iterations"),
            )
            .output("results", "per-iteration terminal outputs")
            .output("total", "length of the input sequence")
            .output("success", "whether every iteration completed")
            .timeout_secs(600)
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(LoopExecutor))
    }
}
