use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::time::timeout;

use dagcore::{NodeError, NodeResult, NodeSpec, WorkflowNode};

use crate::context::ExecContext;
use crate::registry::NodeFactory;
use crate::resolver::Resolver;
use crate::store::OutputStore;

/// Maximum attempts for retryable node kinds, including the first one.
const MAX_ATTEMPTS: u32 = 3;

/// Base delay for exponential retry backoff.
const RETRY_BASE: Duration = Duration::from_millis(500);

/// Run one node to its terminal state (C4).
///
/// Resolves params eagerly, emits the `running` transition, enforces the
/// node's deadline, applies the retry policy for transient failures, and
/// writes the completed output into the store *before* publishing the
/// terminal event, so downstream readiness implies the write is visible.
pub(crate) async fn run_node(
    node: &WorkflowNode,
    spec: &NodeSpec,
    factory: Arc<dyn NodeFactory>,
    store: &OutputStore,
    ctx: &ExecContext,
) -> NodeResult {
    let started_at = Utc::now();
    let emit = |result: NodeResult| {
        let result = result.with_iteration(ctx.iteration);
        ctx.callbacks.node_result(result.clone());
        result
    };

    let resolved = match Resolver::new(store).resolve_node_params(spec, &node.params) {
        Ok(resolved) => resolved,
        Err(err) => {
            tracing::warn!("node '{}' parameter resolution failed: {err}", node.id);
            return emit(NodeResult::failed(&node.id, err.to_string(), started_at));
        }
    };

    emit(NodeResult::running(&node.id, started_at));

    let executor = match factory.create() {
        Ok(executor) => executor,
        Err(err) => {
            return emit(NodeResult::failed(
                &node.id,
                format!("failed to create executor: {err}"),
                started_at,
            ));
        }
    };

    let timeout_secs = resolved
        .get("timeout")
        .and_then(|v| v.as_f64())
        .filter(|secs| *secs > 0.0)
        .unwrap_or(spec.default_timeout_secs as f64);
    let deadline = Duration::from_secs_f64(timeout_secs);
    let max_attempts = if spec.retryable { MAX_ATTEMPTS } else { 1 };

    let mut attempt = 1u32;
    loop {
        let child = ctx.cancellation.child_token();
        let attempt_ctx = ExecContext {
            cancellation: child.clone(),
            ..ctx.clone()
        };

        let outcome = tokio::select! {
            result = timeout(deadline, executor.execute(resolved.clone(), &attempt_ctx)) => {
                match result {
                    Ok(result) => result,
                    Err(_) => {
                        // Deadline expired: the executor future has been
                        // dropped; isolated kinds hard-kill their worker
                        // on drop, everything else stops at the next
                        // suspension point via the child token.
                        child.cancel();
                        Err(NodeError::Timeout {
                            seconds: timeout_secs as u64,
                        })
                    }
                }
            }
            _ = ctx.cancellation.cancelled() => {
                child.cancel();
                Err(NodeError::Cancelled)
            }
        };

        match outcome {
            Ok(data) => {
                if let Err(err) = store.insert(&node.id, data.clone()) {
                    return emit(NodeResult::failed(&node.id, err.to_string(), started_at));
                }
                tracing::info!("node '{}' completed", node.id);
                return emit(NodeResult::completed(&node.id, data, started_at));
            }
            Err(err) if err.is_transient() && attempt < max_attempts => {
                tracing::warn!(
                    "node '{}' transient failure (attempt {attempt}/{max_attempts}): {err}",
                    node.id
                );
                ctx.callbacks
                    .tool_retry(&node.id, attempt, max_attempts, err.to_string());
                tokio::time::sleep(backoff_delay(attempt)).await;
                attempt += 1;
            }
            Err(NodeError::Cancelled) => {
                tracing::info!("node '{}' cancelled", node.id);
                return emit(NodeResult::cancelled(&node.id, started_at));
            }
            Err(err) => {
                tracing::error!("node '{}' failed: {err}", node.id);
                return emit(NodeResult::failed(&node.id, err.to_string(), started_at));
            }
        }
    }
}

/// Exponential backoff with ±20% jitter: 0.5s, 1s, 2s, ...
fn backoff_delay(attempt: u32) -> Duration {
    let base = RETRY_BASE.as_secs_f64() * 2f64.powi(attempt.saturating_sub(1) as i32);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_secs_f64(base * jitter)
}
