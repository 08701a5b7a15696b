use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{NodeResult, RunSummary};

pub type SessionId = Uuid;

/// One entry in a session's ordered event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub session_id: SessionId,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Tagged event union. The tag doubles as the SSE `event:` name.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Status {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        dropped: Option<u64>,
    },
    Workflow {
        workflow: Value,
    },
    NodeResult(NodeResult),
    Explanation {
        content: String,
    },
    Answer {
        content: String,
    },
    ToolProgress {
        node_id: String,
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },
    ToolRetry {
        node_id: String,
        attempt: u32,
        max_retries: u32,
        error: String,
    },
    ActionStart {
        action: String,
        input: Map<String, Value>,
        action_id: String,
    },
    ActionComplete {
        action_id: String,
        result: Value,
    },
    AgentStart {
        query: String,
    },
    AgentThinking {
        thought: String,
        iteration: u32,
    },
    AgentError {
        error: String,
    },
    AgentComplete {
        answer: String,
    },
    Complete {
        summary: RunSummary,
    },
    Error {
        error: String,
    },
}

impl EventPayload {
    /// Stable kind string, suitable for the SSE `event:` field.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Status { .. } => "status",
            EventPayload::Workflow { .. } => "workflow",
            EventPayload::NodeResult(_) => "node_result",
            EventPayload::Explanation { .. } => "explanation",
            EventPayload::Answer { .. } => "answer",
            EventPayload::ToolProgress { .. } => "tool_progress",
            EventPayload::ToolRetry { .. } => "tool_retry",
            EventPayload::ActionStart { .. } => "action_start",
            EventPayload::ActionComplete { .. } => "action_complete",
            EventPayload::AgentStart { .. } => "agent_start",
            EventPayload::AgentThinking { .. } => "agent_thinking",
            EventPayload::AgentError { .. } => "agent_error",
            EventPayload::AgentComplete { .. } => "agent_complete",
            EventPayload::Complete { .. } => "complete",
            EventPayload::Error { .. } => "error",
        }
    }

    /// Terminal events close the session; each run publishes exactly one.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventPayload::Complete { .. } | EventPayload::Error { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NodeStatus;
    use serde_json::json;

    #[test]
    fn event_serializes_with_kind_tag() {
        let event = Event {
            session_id: Uuid::nil(),
            timestamp: Utc::now(),
            payload: EventPayload::NodeResult(NodeResult::completed(
                "a",
                json!({"result": 30.0}),
                Utc::now(),
            )),
        };

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "node_result");
        assert_eq!(value["data"]["node_id"], "a");
        assert_eq!(value["data"]["status"], "completed");
    }

    #[test]
    fn terminal_classification() {
        let complete = EventPayload::Complete {
            summary: RunSummary::default(),
        };
        let running = EventPayload::NodeResult(NodeResult::running("a", Utc::now()));
        assert!(complete.is_terminal());
        assert!(!running.is_terminal());
        assert_eq!(complete.kind(), "complete");
        assert_eq!(
            serde_json::to_value(&running).unwrap()["data"]["status"],
            serde_json::to_value(NodeStatus::Running).unwrap()
        );
    }
}
