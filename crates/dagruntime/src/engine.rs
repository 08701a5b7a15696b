use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use dagcore::{EngineError, RunSummary, SessionId, Workflow, GLOBAL_ID};

use crate::agent::{AgentLoop, AgentOutcome, Planner, DEFAULT_MAX_ITERATIONS};
use crate::callbacks::RunCallbacks;
use crate::context::ExecContext;
use crate::registry::NodeRegistry;
use crate::scheduler::Scheduler;
use crate::session::{EventStream, SessionBus};
use crate::store::OutputStore;
use crate::validator::validate;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Worker-pool width per run.
    pub max_parallel: usize,
    /// Per-session event queue capacity.
    pub event_capacity: usize,
    /// How long a session outlives its terminal event.
    pub session_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel: 8,
            event_capacity: 1024,
            session_grace: Duration::from_secs(30),
        }
    }
}

/// Process-wide entry point: owns the frozen node registry and the session
/// bus, and drives workflow and agent runs against them.
pub struct Engine {
    registry: Arc<NodeRegistry>,
    bus: Arc<SessionBus>,
    config: EngineConfig,
    runs: Mutex<HashMap<SessionId, CancellationToken>>,
}

impl Engine {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self::with_config(registry, EngineConfig::default())
    }

    pub fn with_config(registry: Arc<NodeRegistry>, config: EngineConfig) -> Self {
        let bus = Arc::new(SessionBus::new(config.event_capacity, config.session_grace));
        Self {
            registry,
            bus,
            config,
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Admit a request: allocate the session and its event queue.
    pub fn create_session(&self) -> SessionId {
        self.bus.create()
    }

    /// Ordered event stream for a session; closes after the terminal
    /// event. Multiple subscribers each get an independent view.
    pub fn subscribe(&self, session_id: SessionId) -> Result<EventStream, EngineError> {
        self.bus
            .subscribe(session_id)
            .ok_or(EngineError::UnknownSession(session_id))
    }

    /// Cancel a running session's run, if any.
    pub fn cancel(&self, session_id: SessionId) {
        if let Some(token) = self.runs.lock().expect("run table poisoned").get(&session_id) {
            token.cancel();
        }
    }

    /// Validate and execute a workflow document, streaming progress to the
    /// session. Exactly one terminal event is published: `error` on
    /// validation failure, `complete` with the aggregate summary otherwise.
    pub async fn execute_workflow(
        &self,
        session_id: SessionId,
        document: Value,
        global_params: Option<Map<String, Value>>,
    ) -> Result<RunSummary, EngineError> {
        let callbacks = RunCallbacks::new(Arc::clone(&self.bus), session_id);
        callbacks.status("validating workflow");

        let workflow = match Workflow::from_value(document) {
            Ok(workflow) => workflow,
            Err(err) => {
                callbacks.error(format!("workflow document is not valid JSON: {err}"));
                return Err(EngineError::Document(err));
            }
        };

        let plan = match validate(&workflow, &self.registry, &[GLOBAL_ID]) {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!("session {session_id}: validation failed: {err}");
                callbacks.error(format!("validation failed: {err}"));
                return Err(EngineError::Validation(err));
            }
        };

        match serde_json::to_value(&plan.workflow) {
            Ok(document) => callbacks.workflow(document),
            Err(err) => {
                callbacks.error(format!("internal: {err}"));
                return Err(EngineError::Document(err));
            }
        }
        callbacks.status("executing workflow");
        tracing::info!(
            "session {session_id}: executing {} nodes in order {:?}",
            plan.order.len(),
            plan.order
        );

        let store = match global_params {
            Some(params) => Arc::new(OutputStore::seeded([(GLOBAL_ID, Value::Object(params))])),
            None => Arc::new(OutputStore::new()),
        };

        let token = self.register_run(session_id);
        let ctx = ExecContext::new(
            callbacks.clone(),
            Arc::clone(&self.registry),
            token,
            self.config.max_parallel,
        );

        let summary = Scheduler::new(self.config.max_parallel)
            .run(&plan, store, &ctx)
            .await;
        self.unregister_run(session_id);

        callbacks.complete(summary);
        tracing::info!(
            "session {session_id}: run finished ({}/{} completed)",
            summary.completed,
            summary.total
        );
        Ok(summary)
    }

    /// Run the agent over the node catalog (C7). `max_iterations` defaults
    /// to [`DEFAULT_MAX_ITERATIONS`].
    pub async fn run_agent(
        &self,
        session_id: SessionId,
        query: &str,
        max_iterations: Option<u32>,
        planner: Arc<dyn Planner>,
    ) -> Result<AgentOutcome, EngineError> {
        let callbacks = RunCallbacks::new(Arc::clone(&self.bus), session_id);
        let token = self.register_run(session_id);
        let ctx = ExecContext::new(
            callbacks.clone(),
            Arc::clone(&self.registry),
            token,
            self.config.max_parallel,
        );

        let agent = AgentLoop::new(planner, max_iterations.unwrap_or(DEFAULT_MAX_ITERATIONS));
        let outcome = agent.run(query, &ctx).await;
        self.unregister_run(session_id);

        callbacks.complete(outcome.summary);
        Ok(outcome)
    }

    fn register_run(&self, session_id: SessionId) -> CancellationToken {
        let token = CancellationToken::new();
        self.runs
            .lock()
            .expect("run table poisoned")
            .insert(session_id, token.clone());
        token
    }

    fn unregister_run(&self, session_id: SessionId) {
        self.runs.lock().expect("run table poisoned").remove(&session_id);
    }
}
