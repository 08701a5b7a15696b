use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use dagcore::{Event, EventPayload, NodeResult, RunSummary, SessionId};

use crate::session::SessionBus;

struct CallbackState {
    last_timestamp: Mutex<DateTime<Utc>>,
    terminal_sent: AtomicBool,
}

/// Uniform callback surface for one run. Everything the executors, the
/// scheduler, the loop sub-scheduler and the agent emit goes through here;
/// the facade fans into the session bus and guarantees:
///
/// - exactly one terminal event per run (later ones are ignored),
/// - no events after the terminal one,
/// - non-decreasing timestamps within the session.
#[derive(Clone)]
pub struct RunCallbacks {
    bus: Arc<SessionBus>,
    session_id: SessionId,
    state: Arc<CallbackState>,
}

impl RunCallbacks {
    pub fn new(bus: Arc<SessionBus>, session_id: SessionId) -> Self {
        Self {
            bus,
            session_id,
            state: Arc::new(CallbackState {
                last_timestamp: Mutex::new(Utc::now()),
                terminal_sent: AtomicBool::new(false),
            }),
        }
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn emit(&self, payload: EventPayload) {
        if payload.is_terminal() {
            if self.state.terminal_sent.swap(true, Ordering::SeqCst) {
                tracing::warn!(
                    "suppressing second terminal event for session {}",
                    self.session_id
                );
                return;
            }
        } else if self.state.terminal_sent.load(Ordering::SeqCst) {
            return;
        }

        let timestamp = {
            let mut last = self.state.last_timestamp.lock().expect("callback clock poisoned");
            let now = Utc::now().max(*last);
            *last = now;
            now
        };

        self.bus.publish(Event {
            session_id: self.session_id,
            timestamp,
            payload,
        });
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(EventPayload::Status {
            message: message.into(),
            dropped: None,
        });
    }

    pub fn workflow(&self, workflow: Value) {
        self.emit(EventPayload::Workflow { workflow });
    }

    pub fn node_result(&self, result: NodeResult) {
        self.emit(EventPayload::NodeResult(result));
    }

    pub fn explanation(&self, content: impl Into<String>) {
        self.emit(EventPayload::Explanation {
            content: content.into(),
        });
    }

    pub fn answer(&self, content: impl Into<String>) {
        self.emit(EventPayload::Answer {
            content: content.into(),
        });
    }

    pub fn tool_progress(&self, node_id: impl Into<String>, status: impl Into<String>, data: Option<Value>) {
        self.emit(EventPayload::ToolProgress {
            node_id: node_id.into(),
            status: status.into(),
            data,
        });
    }

    pub fn tool_retry(
        &self,
        node_id: impl Into<String>,
        attempt: u32,
        max_retries: u32,
        error: impl Into<String>,
    ) {
        self.emit(EventPayload::ToolRetry {
            node_id: node_id.into(),
            attempt,
            max_retries,
            error: error.into(),
        });
    }

    pub fn action_start(&self, action: impl Into<String>, input: Map<String, Value>, action_id: impl Into<String>) {
        self.emit(EventPayload::ActionStart {
            action: action.into(),
            input,
            action_id: action_id.into(),
        });
    }

    pub fn action_complete(&self, action_id: impl Into<String>, result: Value) {
        self.emit(EventPayload::ActionComplete {
            action_id: action_id.into(),
            result,
        });
    }

    pub fn agent_start(&self, query: impl Into<String>) {
        self.emit(EventPayload::AgentStart {
            query: query.into(),
        });
    }

    pub fn agent_thinking(&self, thought: impl Into<String>, iteration: u32) {
        self.emit(EventPayload::AgentThinking {
            thought: thought.into(),
            iteration,
        });
    }

    pub fn agent_error(&self, error: impl Into<String>) {
        self.emit(EventPayload::AgentError {
            error: error.into(),
        });
    }

    pub fn agent_complete(&self, answer: impl Into<String>) {
        self.emit(EventPayload::AgentComplete {
            answer: answer.into(),
        });
    }

    pub fn complete(&self, summary: RunSummary) {
        self.emit(EventPayload::Complete { summary });
    }

    pub fn error(&self, error: impl Into<String>) {
        self.emit(EventPayload::Error {
            error: error.into(),
        });
    }
}
