use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::require_f64;
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

/// Adds two numbers.
pub struct AddNode;

#[async_trait]
impl NodeExecutor for AddNode {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let num1 = require_f64(&params, "num1")?;
        let num2 = require_f64(&params, "num2")?;
        Ok(json!({"result": num1 + num2}))
    }
}

pub struct AddNodeFactory;

impl NodeFactory for AddNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("add", "Add")
            .description("Adds two numbers")
            .param("num1", ParamSpec::required(ParamKind::Float).doc("first addend"))
            .param("num2", ParamSpec::required(ParamKind::Float).doc("second addend"))
            .output("result", "num1 + num2")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(AddNode))
    }
}

/// Multiplies two numbers.
pub struct MultiplyNode;

#[async_trait]
impl NodeExecutor for MultiplyNode {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let num1 = require_f64(&params, "num1")?;
        let num2 = require_f64(&params, "num2")?;
        Ok(json!({"result": num1 * num2}))
    }
}

pub struct MultiplyNodeFactory;

impl NodeFactory for MultiplyNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("multiply", "Multiply")
            .description("Multiplies two numbers")
            .param("num1", ParamSpec::required(ParamKind::Float).doc("first factor"))
            .param("num2", ParamSpec::required(ParamKind::Float).doc("second factor"))
            .output("result", "num1 * num2")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(MultiplyNode))
    }
}
