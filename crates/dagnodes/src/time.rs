use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::time::{sleep, Duration};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::opt_u64;
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

/// Delays for a specified duration. Cancels promptly.
pub struct DelayNode;

#[async_trait]
impl NodeExecutor for DelayNode {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let delay_ms = opt_u64(&params, "delay_ms", 1000);
        tokio::select! {
            _ = sleep(Duration::from_millis(delay_ms)) => Ok(json!({"delayed_ms": delay_ms})),
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("delay", "Delay")
            .description("Waits for the given number of milliseconds")
            .param(
                "delay_ms",
                ParamSpec::optional(ParamKind::Integer, Some(json!(1000))).doc("duration in milliseconds"),
            )
            .output("delayed_ms", "how long the node waited")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(DelayNode))
    }
}
