//! Core data model for the dag workflow engine.
//!
//! This crate provides the fundamental types that all other components
//! depend on: the workflow document, the node catalog, node results, the
//! event union, and the error taxonomy. It has no runtime dependencies.

mod catalog;
mod error;
mod events;
mod result;
mod workflow;

pub use catalog::{Catalog, NodeSpec, ParamKind, ParamSpec};
pub use error::{EngineError, NodeError, ValidationError};
pub use events::{Event, EventPayload, SessionId};
pub use result::{NodeResult, NodeStatus, RunSummary};
pub use workflow::{Edge, Workflow, WorkflowNode, GLOBAL_ID, LOOP_ID};

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
