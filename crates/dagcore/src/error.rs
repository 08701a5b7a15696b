use thiserror::Error;

/// Fatal errors raised before any node executes. A run that hits one of
/// these publishes a single `error` event and never starts the scheduler.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("workflow document is not valid JSON: {0}")]
    Document(#[from] serde_json::Error),

    #[error("duplicate node type registered: {0}")]
    DuplicateNodeType(String),

    #[error("catalog entry for unregistered node type: {0}")]
    UnknownCatalogType(String),

    #[error("unknown session: {0}")]
    UnknownSession(uuid::Uuid),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal: {0}")]
    Internal(String),
}

/// Workflow document rejections (C3). All of these abort the run before
/// execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("workflow has no nodes")]
    EmptyWorkflow,

    #[error("duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("node id '{0}' is reserved")]
    ReservedNodeId(String),

    #[error("unknown node type '{node_type}' on node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("edge {side} endpoint references unknown node id '{node_id}'")]
    UnknownEdgeEndpoint { node_id: String, side: &'static str },

    #[error("node '{node_id}' is missing required param '{param}'")]
    MissingParam { node_id: String, param: String },

    #[error("node '{node_id}' param '{param}': expected {expected}, got {actual}")]
    ParamType {
        node_id: String,
        param: String,
        expected: String,
        actual: String,
    },

    #[error("reference '{reference}' on node '{node_id}' points at unknown id '{target}'")]
    UnknownReference {
        node_id: String,
        reference: String,
        target: String,
    },

    #[error("workflow contains a cycle involving nodes {0:?}")]
    Cycle(Vec<String>),
}

/// Per-node failures. Only [`NodeError::Transient`] is retried; everything
/// else terminates the node on first occurrence.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("parameter resolution failed: {0}")]
    Resolution(String),

    #[error("timed out after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("transient: {0}")]
    Transient(String),

    #[error("{0}")]
    Permanent(String),

    #[error("missing required param '{0}'")]
    MissingParam(String),

    #[error("param '{param}': {message}")]
    InvalidParam { param: String, message: String },

    #[error("cancelled")]
    Cancelled,

    #[error("internal node failure: {0}")]
    Internal(String),
}

impl NodeError {
    /// Whether the retry policy applies. Executors self-classify: an error
    /// surfaced as `Transient` is the only kind the runner will retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, NodeError::Transient(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, NodeError::Cancelled)
    }

    pub fn invalid_param(param: impl Into<String>, message: impl Into<String>) -> Self {
        NodeError::InvalidParam {
            param: param.into(),
            message: message.into(),
        }
    }
}
