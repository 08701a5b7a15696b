use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use uuid::Uuid;

use dagcore::{NodeError, NodeStatus, RunSummary, WorkflowNode};

use crate::context::ExecContext;
use crate::executor::run_node;
use crate::store::OutputStore;

/// Default bound on reason-act iterations.
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// What the planner sees on each iteration.
pub struct PlanRequest<'a> {
    pub query: &'a str,
    /// Rendered tool list from the node catalog.
    pub tools: &'a str,
    /// Accumulated (action, input, observation) trace.
    pub scratchpad: &'a str,
    pub iteration: u32,
}

#[derive(Debug, Clone)]
pub enum PlanStep {
    /// Invoke one tool (a node type) with the given params.
    Action {
        action: String,
        input: Map<String, Value>,
    },
    /// Terminate with a final answer.
    Final { answer: String },
}

#[derive(Debug, Clone)]
pub struct PlanDecision {
    /// Opaque chain-of-thought summary, republished verbatim.
    pub thought: String,
    pub step: PlanStep,
}

/// LLM-backed planner. The engine only sees this narrow interface; the
/// concrete implementation (prompting, parsing, transport) lives with the
/// leaf node collaborators.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<PlanDecision, NodeError>;
}

/// Outcome of one agent run.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    /// Final answer, or the best-effort partial observation when the
    /// iteration budget ran out.
    pub answer: Option<String>,
    pub summary: RunSummary,
}

/// Bounded reason-act loop (C7). Each iteration asks the planner for one
/// step, executes the chosen tool through the node runner against a
/// private output store, and feeds the observation back.
pub struct AgentLoop {
    planner: Arc<dyn Planner>,
    max_iterations: u32,
}

impl AgentLoop {
    pub fn new(planner: Arc<dyn Planner>, max_iterations: u32) -> Self {
        Self {
            planner,
            max_iterations: max_iterations.max(1),
        }
    }

    pub async fn run(&self, query: &str, ctx: &ExecContext) -> AgentOutcome {
        ctx.callbacks.agent_start(query);
        let tools = ctx.registry.describe();

        let mut scratchpad = String::new();
        let mut summary = RunSummary::default();
        let mut last_observation: Option<String> = None;

        for iteration in 1..=self.max_iterations {
            if ctx.is_cancelled() {
                ctx.callbacks.agent_error("cancelled");
                return AgentOutcome {
                    answer: last_observation,
                    summary,
                };
            }

            let decision = match self
                .planner
                .plan(PlanRequest {
                    query,
                    tools: &tools,
                    scratchpad: &scratchpad,
                    iteration,
                })
                .await
            {
                Ok(decision) => decision,
                Err(err) => {
                    tracing::error!("planner failed on iteration {iteration}: {err}");
                    ctx.callbacks.agent_error(format!("planner failed: {err}"));
                    return AgentOutcome {
                        answer: last_observation,
                        summary,
                    };
                }
            };

            ctx.callbacks.agent_thinking(&decision.thought, iteration);

            let (action, input) = match decision.step {
                PlanStep::Final { answer } => {
                    ctx.callbacks.agent_complete(&answer);
                    return AgentOutcome {
                        answer: Some(answer),
                        summary,
                    };
                }
                PlanStep::Action { action, input } => (action, input),
            };

            let rendered_input = Value::Object(input.clone());
            let observation = self.invoke_tool(&action, input, ctx, &mut summary).await;
            last_observation = Some(observation.to_string());
            scratchpad.push_str(&format!(
                "Action: {action}\nAction Input: {rendered_input}\nObservation: {observation}\n"
            ));
        }

        ctx.callbacks.agent_error(format!(
            "iteration budget exhausted after {} iterations",
            self.max_iterations
        ));
        AgentOutcome {
            answer: last_observation,
            summary,
        }
    }

    /// Execute one tool via C4. The observation is the tool's output
    /// object, or an error object the planner can recover from.
    async fn invoke_tool(
        &self,
        action: &str,
        input: Map<String, Value>,
        ctx: &ExecContext,
        summary: &mut RunSummary,
    ) -> Value {
        let action_id = Uuid::new_v4().to_string();
        ctx.callbacks
            .action_start(action, input.clone(), &action_id);
        summary.total += 1;

        let observation = match ctx.registry.lookup(action) {
            None => {
                summary.record(NodeStatus::Failed);
                json!({"error": format!("unknown tool '{action}'")})
            }
            Some((spec, factory)) => {
                let spec = spec.clone();
                let node = WorkflowNode {
                    id: action.to_string(),
                    node_type: action.to_string(),
                    params: input,
                };
                // Private store per invocation: tools never see each
                // other's outputs except through the scratchpad.
                let store = OutputStore::new();
                let node_ctx = ctx.for_node(action);
                let result = run_node(&node, &spec, factory, &store, &node_ctx).await;
                summary.record(result.status);
                match result.status {
                    NodeStatus::Completed => result.data.unwrap_or(Value::Null),
                    _ => json!({
                        "error": result
                            .error
                            .unwrap_or_else(|| "tool failed".to_string())
                    }),
                }
            }
        };

        ctx.callbacks.action_complete(&action_id, observation.clone());
        observation
    }
}
