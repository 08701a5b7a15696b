//! Shared test fixtures: small in-crate node types and an engine builder.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::{Engine, ExecContext, LoopNodeFactory, NodeExecutor, NodeFactory, NodeRegistry};

/// Returns its `value` param unchanged.
pub struct EchoFactory;

struct EchoExecutor;

#[async_trait]
impl NodeExecutor for EchoExecutor {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        Ok(params.get("value").cloned().unwrap_or(Value::Null))
    }
}

impl NodeFactory for EchoFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("echo", "Echo").param("value", ParamSpec::required(ParamKind::Any))
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(EchoExecutor))
    }
}

/// Sleeps for `millis`, cooperatively cancellable.
pub struct SleepFactory;

struct SleepExecutor;

#[async_trait]
impl NodeExecutor for SleepExecutor {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let millis = params.get("millis").and_then(Value::as_u64).unwrap_or(100);
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(millis)) => {
                Ok(json!({"slept_ms": millis}))
            }
            _ = ctx.cancellation.cancelled() => Err(NodeError::Cancelled),
        }
    }
}

impl NodeFactory for SleepFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("sleep", "Sleep").param(
            "millis",
            ParamSpec::optional(ParamKind::Integer, Some(json!(100))),
        )
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(SleepExecutor))
    }
}

/// Always fails with a permanent error.
pub struct FailFactory;

struct FailExecutor;

#[async_trait]
impl NodeExecutor for FailExecutor {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let message = params
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("boom");
        Err(NodeError::Permanent(message.to_string()))
    }
}

impl NodeFactory for FailFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("fail", "Fail").param(
            "message",
            ParamSpec::optional(ParamKind::String, Some(json!("boom"))),
        )
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(FailExecutor))
    }
}

/// Fails with a transient error `fail_times` times, then succeeds. The
/// counter lives on the factory so it spans a whole run.
pub struct FlakyFactory {
    pub attempts: Arc<AtomicU32>,
}

impl FlakyFactory {
    pub fn new() -> Self {
        Self {
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }
}

struct FlakyExecutor {
    attempts: Arc<AtomicU32>,
}

#[async_trait]
impl NodeExecutor for FlakyExecutor {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let fail_times = params.get("fail_times").and_then(Value::as_u64).unwrap_or(2) as u32;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= fail_times {
            Err(NodeError::Transient(format!("flaky failure {attempt}")))
        } else {
            Ok(json!({"attempts": attempt}))
        }
    }
}

impl NodeFactory for FlakyFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("flaky", "Flaky")
            .param(
                "fail_times",
                ParamSpec::optional(ParamKind::Integer, Some(json!(2))),
            )
            .retryable()
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(FlakyExecutor {
            attempts: Arc::clone(&self.attempts),
        }))
    }
}

pub fn test_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(EchoFactory)).unwrap();
    registry.register(Arc::new(SleepFactory)).unwrap();
    registry.register(Arc::new(FailFactory)).unwrap();
    registry.register(Arc::new(FlakyFactory::new())).unwrap();
    registry.register(Arc::new(LoopNodeFactory)).unwrap();
    registry
}

pub fn test_engine() -> Engine {
    Engine::new(Arc::new(test_registry()))
}
