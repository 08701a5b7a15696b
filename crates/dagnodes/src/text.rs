use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::{opt_str, require_str};
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

/// Joins two strings with an optional separator.
pub struct TextConcatNode;

#[async_trait]
impl NodeExecutor for TextConcatNode {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let text1 = require_str(&params, "text1")?;
        let text2 = require_str(&params, "text2")?;
        let separator = opt_str(&params, "separator", "");
        Ok(json!({"result": format!("{text1}{separator}{text2}")}))
    }
}

pub struct TextConcatNodeFactory;

impl NodeFactory for TextConcatNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("text_concat", "Text concat")
            .description("Joins two strings")
            .param("text1", ParamSpec::required(ParamKind::String))
            .param("text2", ParamSpec::required(ParamKind::String))
            .param(
                "separator",
                ParamSpec::optional(ParamKind::String, Some(json!(""))).doc("placed between the parts"),
            )
            .output("result", "text1 + separator + text2")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(TextConcatNode))
    }
}

/// Replaces every occurrence of a substring.
pub struct TextReplaceNode;

#[async_trait]
impl NodeExecutor for TextReplaceNode {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let text = require_str(&params, "text")?;
        let old_str = require_str(&params, "old_str")?;
        let new_str = require_str(&params, "new_str")?;
        if old_str.is_empty() {
            return Err(NodeError::invalid_param("old_str", "must not be empty"));
        }
        Ok(json!({"result": text.replace(old_str, new_str)}))
    }
}

pub struct TextReplaceNodeFactory;

impl NodeFactory for TextReplaceNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("text_replace", "Text replace")
            .description("Replaces every occurrence of a substring")
            .param("text", ParamSpec::required(ParamKind::String))
            .param("old_str", ParamSpec::required(ParamKind::String))
            .param("new_str", ParamSpec::required(ParamKind::String))
            .output("result", "text with replacements applied")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(TextReplaceNode))
    }
}
