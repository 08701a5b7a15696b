//! Standard node library.
//!
//! Built-in leaf node types for the dag workflow engine, plus the
//! OpenAI-compatible LLM collaborators (chat node and ReAct planner).

mod debug;
mod file;
mod http;
mod llm;
mod math;
mod shell;
mod text;
mod time;
mod transform;

pub use debug::EchoNode;
pub use file::FileWriteNode;
pub use http::HttpRequestNode;
pub use llm::{ChatNode, ChatNodeFactory, LlmClient, LlmConfig, ReactPlanner};
pub use math::{AddNode, MultiplyNode};
pub use shell::{PythonExecuteNode, TerminalNode};
pub use text::{TextConcatNode, TextReplaceNode};
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode};

use std::sync::Arc;

use dagcore::EngineError;
use dagruntime::{LoopNodeFactory, NodeRegistry};

/// Register every node type that needs no external configuration,
/// including the runtime's loop node.
pub fn register_all(registry: &mut NodeRegistry) -> Result<(), EngineError> {
    registry.register(Arc::new(math::AddNodeFactory))?;
    registry.register(Arc::new(math::MultiplyNodeFactory))?;
    registry.register(Arc::new(text::TextConcatNodeFactory))?;
    registry.register(Arc::new(text::TextReplaceNodeFactory))?;
    registry.register(Arc::new(debug::EchoNodeFactory))?;
    registry.register(Arc::new(time::DelayNodeFactory))?;
    registry.register(Arc::new(transform::JsonParseNodeFactory))?;
    registry.register(Arc::new(transform::JsonStringifyNodeFactory))?;
    registry.register(Arc::new(http::HttpRequestNodeFactory))?;
    registry.register(Arc::new(file::FileWriteNodeFactory))?;
    registry.register(Arc::new(shell::TerminalNodeFactory))?;
    registry.register(Arc::new(shell::PythonExecuteNodeFactory))?;
    registry.register(Arc::new(LoopNodeFactory))?;
    Ok(())
}

/// Register the LLM-backed node types against a configured client.
pub fn register_llm(registry: &mut NodeRegistry, client: Arc<LlmClient>) -> Result<(), EngineError> {
    registry.register(Arc::new(ChatNodeFactory::new(client)))?;
    Ok(())
}
