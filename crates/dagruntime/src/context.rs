use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::callbacks::RunCallbacks;
use crate::registry::NodeRegistry;

/// Run-scoped context handed to node executors. Cheap to clone; the
/// scheduler stamps `node_id` (and, inside loops, `iteration`) per node.
#[derive(Clone)]
pub struct ExecContext {
    pub callbacks: RunCallbacks,
    pub registry: Arc<NodeRegistry>,
    pub cancellation: CancellationToken,
    /// Worker-pool width for this run; nested schedulers inherit it.
    pub max_parallel: usize,
    /// Id of the node currently executing.
    pub node_id: String,
    /// Loop iteration index, set inside loop subgraphs.
    pub iteration: Option<u32>,
}

impl ExecContext {
    pub fn new(
        callbacks: RunCallbacks,
        registry: Arc<NodeRegistry>,
        cancellation: CancellationToken,
        max_parallel: usize,
    ) -> Self {
        Self {
            callbacks,
            registry,
            cancellation,
            max_parallel,
            node_id: String::new(),
            iteration: None,
        }
    }

    pub fn for_node(&self, node_id: impl Into<String>) -> Self {
        let mut ctx = self.clone();
        ctx.node_id = node_id.into();
        ctx
    }

    pub fn for_iteration(&self, iteration: u32) -> Self {
        let mut ctx = self.clone();
        ctx.iteration = Some(iteration);
        ctx
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Republish an intermediate update from the executor.
    pub fn progress(&self, status: impl Into<String>, data: Option<Value>) {
        self.callbacks
            .tool_progress(self.node_id.clone(), status, data);
    }
}
