use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state of one node within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Skipped,
}

impl NodeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NodeStatus::Pending | NodeStatus::Running)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            NodeStatus::Pending => "pending",
            NodeStatus::Running => "running",
            NodeStatus::Completed => "completed",
            NodeStatus::Failed => "failed",
            NodeStatus::Cancelled => "cancelled",
            NodeStatus::Skipped => "skipped",
        };
        f.write_str(name)
    }
}

/// Emitted per node state transition. `data` is present iff the node
/// completed; `error` iff it failed or was cancelled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    pub node_id: String,
    pub status: NodeStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    /// Loop iteration index when the node ran inside a loop subgraph.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
}

impl NodeResult {
    pub fn running(node_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Running,
            data: None,
            error: None,
            started_at,
            ended_at: None,
            iteration: None,
        }
    }

    pub fn completed(node_id: impl Into<String>, data: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Completed,
            data: Some(data),
            error: None,
            started_at,
            ended_at: Some(Utc::now()),
            iteration: None,
        }
    }

    pub fn failed(
        node_id: impl Into<String>,
        error: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Failed,
            data: None,
            error: Some(error.into()),
            started_at,
            ended_at: Some(Utc::now()),
            iteration: None,
        }
    }

    pub fn cancelled(node_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            node_id: node_id.into(),
            status: NodeStatus::Cancelled,
            data: None,
            error: Some("cancelled".to_string()),
            started_at,
            ended_at: Some(Utc::now()),
            iteration: None,
        }
    }

    pub fn with_iteration(mut self, iteration: Option<u32>) -> Self {
        self.iteration = iteration;
        self
    }
}

/// Aggregate run outcome carried by the terminal `complete` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn record(&mut self, status: NodeStatus) {
        match status {
            NodeStatus::Completed => self.completed += 1,
            NodeStatus::Failed => self.failed += 1,
            NodeStatus::Cancelled => self.cancelled += 1,
            NodeStatus::Skipped => self.skipped += 1,
            NodeStatus::Pending | NodeStatus::Running => {}
        }
    }

    /// A run succeeds iff every node completed.
    pub fn is_success(&self) -> bool {
        self.completed == self.total
    }
}
