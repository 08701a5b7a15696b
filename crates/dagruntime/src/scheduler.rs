use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};

use dagcore::{NodeResult, NodeStatus, RunSummary, WorkflowNode};

use crate::context::ExecContext;
use crate::executor::run_node;
use crate::store::OutputStore;
use crate::validator::ValidWorkflow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedState {
    Pending,
    Ready,
    Running,
    Done(NodeStatus),
}

/// Dependency-aware scheduler (C5): fans out ready nodes onto a bounded
/// worker pool, fails fast along forward-reachable dependencies, and lets
/// independent branches finish on their own.
pub struct Scheduler {
    max_parallel: usize,
}

impl Scheduler {
    pub fn new(max_parallel: usize) -> Self {
        Self {
            max_parallel: max_parallel.max(1),
        }
    }

    /// Drive the workflow until every node is terminal. Emits `node_result`
    /// events along the way and returns the aggregate summary; the caller
    /// owns the run's single terminal event.
    pub async fn run(
        &self,
        plan: &ValidWorkflow,
        store: Arc<OutputStore>,
        ctx: &ExecContext,
    ) -> RunSummary {
        let mut states: HashMap<String, SchedState> = plan
            .order
            .iter()
            .map(|id| (id.clone(), SchedState::Pending))
            .collect();
        let mut waiting: HashMap<String, usize> = plan
            .predecessors
            .iter()
            .map(|(id, preds)| (id.clone(), preds.len()))
            .collect();

        // Ready set ordered by topological rank; ranks are unique, so this
        // is also FIFO among simultaneously ready nodes.
        let mut ready: BTreeSet<(usize, String)> = BTreeSet::new();
        for id in &plan.order {
            if waiting[id] == 0 {
                states.insert(id.clone(), SchedState::Ready);
                ready.insert((plan.rank[id], id.clone()));
            }
        }

        let mut running = FuturesUnordered::new();
        let mut cancelled_marked = false;

        loop {
            if ctx.is_cancelled() && !cancelled_marked {
                cancelled_marked = true;
                self.cancel_waiting(plan, &mut states, &mut ready, ctx);
            }

            while running.len() < self.max_parallel {
                let Some((_, id)) = ready.iter().next().cloned() else {
                    break;
                };
                ready.remove(&(plan.rank[&id], id.clone()));
                states.insert(id.clone(), SchedState::Running);

                let node = plan
                    .workflow
                    .node(&id)
                    .expect("scheduled node exists")
                    .clone();
                running.push(launch(node, Arc::clone(&store), ctx.clone()));
            }

            let Some((id, result)) = running.next().await else {
                break;
            };
            let status = result.status;
            states.insert(id.clone(), SchedState::Done(status));

            match status {
                NodeStatus::Completed => {
                    for succ in &plan.successors[&id] {
                        let remaining = waiting.get_mut(succ).expect("known successor");
                        *remaining -= 1;
                        if *remaining == 0 && states[succ] == SchedState::Pending {
                            states.insert(succ.clone(), SchedState::Ready);
                            ready.insert((plan.rank[succ], succ.clone()));
                        }
                    }
                }
                NodeStatus::Failed | NodeStatus::Cancelled | NodeStatus::Skipped => {
                    self.fail_downstream(plan, &id, &mut states, &mut ready, ctx);
                }
                NodeStatus::Pending | NodeStatus::Running => {
                    unreachable!("run_node returns terminal results")
                }
            }
        }

        let mut summary = RunSummary {
            total: plan.order.len(),
            ..Default::default()
        };
        for state in states.values() {
            if let SchedState::Done(status) = state {
                summary.record(*status);
            }
        }
        summary
    }

    /// Fail-fast: mark the failed node's entire forward-reachable set as
    /// terminal without running it. The emitted events carry status
    /// `failed` with a dependency error; already-running independent
    /// branches are left to finish.
    fn fail_downstream(
        &self,
        plan: &ValidWorkflow,
        failed_id: &str,
        states: &mut HashMap<String, SchedState>,
        ready: &mut BTreeSet<(usize, String)>,
        ctx: &ExecContext,
    ) {
        let mut queue: VecDeque<&str> = VecDeque::from([failed_id]);
        let mut seen: HashSet<&str> = HashSet::from([failed_id]);

        while let Some(current) = queue.pop_front() {
            for succ in &plan.successors[current] {
                if !seen.insert(succ.as_str()) {
                    continue;
                }
                queue.push_back(succ.as_str());

                match states[succ.as_str()] {
                    SchedState::Pending | SchedState::Ready => {
                        ready.remove(&(plan.rank[succ], succ.clone()));
                        states.insert(succ.clone(), SchedState::Done(NodeStatus::Failed));
                        let result = NodeResult::failed(
                            succ,
                            format!("dependency failed: {failed_id}"),
                            Utc::now(),
                        )
                        .with_iteration(ctx.iteration);
                        ctx.callbacks.node_result(result);
                    }
                    // Running or already terminal: leave it alone.
                    _ => {}
                }
            }
        }
    }

    /// External cancellation: everything not yet launched transitions to
    /// `cancelled`; running nodes are cancelled through the run token.
    fn cancel_waiting(
        &self,
        plan: &ValidWorkflow,
        states: &mut HashMap<String, SchedState>,
        ready: &mut BTreeSet<(usize, String)>,
        ctx: &ExecContext,
    ) {
        for id in &plan.order {
            if matches!(states[id], SchedState::Pending | SchedState::Ready) {
                ready.remove(&(plan.rank[id], id.clone()));
                states.insert(id.clone(), SchedState::Done(NodeStatus::Cancelled));
                let result = NodeResult::cancelled(id, Utc::now()).with_iteration(ctx.iteration);
                ctx.callbacks.node_result(result);
            }
        }
    }
}

/// Spawn one node execution as its own task so independent nodes run in
/// parallel across the worker threads.
fn launch(
    node: WorkflowNode,
    store: Arc<OutputStore>,
    ctx: ExecContext,
) -> impl std::future::Future<Output = (String, NodeResult)> {
    let id = node.id.clone();
    let panic_ctx = ctx.clone();
    let handle = tokio::spawn(async move {
        let id = node.id.clone();
        let (spec, factory) = ctx
            .registry
            .lookup(&node.node_type)
            .map(|(spec, factory)| (spec.clone(), factory))
            .expect("node type validated before scheduling");
        let node_ctx = ctx.for_node(&id);
        let result = run_node(&node, &spec, factory, &store, &node_ctx).await;
        (id, result)
    });

    async move {
        match handle.await {
            Ok(done) => done,
            Err(err) => {
                let result = NodeResult::failed(&id, format!("node task panicked: {err}"), Utc::now())
                    .with_iteration(panic_ctx.iteration);
                panic_ctx.callbacks.node_result(result.clone());
                (id, result)
            }
        }
    }
}
