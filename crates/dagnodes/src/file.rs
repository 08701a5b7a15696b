use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::{opt_bool, require_str};
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

/// Writes text content to a file, creating parent directories as needed.
pub struct FileWriteNode;

#[async_trait]
impl NodeExecutor for FileWriteNode {
    async fn execute(&self, params: Map<String, Value>, _ctx: &ExecContext) -> Result<Value, NodeError> {
        let path = require_str(&params, "path")?;
        let content = require_str(&params, "content")?;
        let append = opt_bool(&params, "append", false);

        if let Some(parent) = std::path::Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|err| NodeError::Permanent(format!("create {}: {err}", parent.display())))?;
            }
        }

        if append {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
                .map_err(|err| NodeError::Permanent(format!("open {path}: {err}")))?;
            file.write_all(content.as_bytes())
                .await
                .map_err(|err| NodeError::Permanent(format!("write {path}: {err}")))?;
        } else {
            tokio::fs::write(path, content)
                .await
                .map_err(|err| NodeError::Permanent(format!("write {path}: {err}")))?;
        }

        Ok(json!({
            "path": path,
            "bytes_written": content.len(),
        }))
    }
}

pub struct FileWriteNodeFactory;

impl NodeFactory for FileWriteNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("file_write", "File write")
            .description("Writes text content to a file")
            .param("path", ParamSpec::required(ParamKind::String).doc("target file path"))
            .param("content", ParamSpec::required(ParamKind::String))
            .param(
                "append",
                ParamSpec::optional(ParamKind::Boolean, Some(json!(false)))
                    .doc("append instead of overwrite"),
            )
            .output("path", "the written path")
            .output("bytes_written", "number of bytes written")
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(FileWriteNode))
    }
}
