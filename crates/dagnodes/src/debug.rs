use async_trait::async_trait;
use serde_json::{Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

/// Returns its `value` param unchanged. The loop node's workhorse: a child
/// workflow of a single echo surfaces `$loop.item` as the iteration output.
pub struct EchoNode;

#[async_trait]
impl NodeExecutor for EchoNode {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let value = params.get("value").cloned().unwrap_or(Value::Null);
        tracing::debug!("echo [{}]: {value}", ctx.node_id);
        Ok(value)
    }
}

pub struct EchoNodeFactory;

impl NodeFactory for EchoNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("echo", "Echo")
            .description("Returns its input value unchanged")
            .param("value", ParamSpec::required(ParamKind::Any).doc("value to pass through"))
            .output("value", "the input, unchanged")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(EchoNode))
    }
}
