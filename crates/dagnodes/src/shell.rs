//! Subprocess-backed node kinds. These run in an isolated OS process;
//! dropping the in-flight future (timeout or hard cancel) kills the child
//! via `kill_on_drop`, which is the hard-kill path reserved for isolated
//! workers.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tokio::process::Command;

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::require_str;
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

async fn run_command(mut command: Command, ctx: &ExecContext) -> Result<Value, NodeError> {
    command
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|err| NodeError::Permanent(format!("failed to spawn process: {err}")))?;

    let output = tokio::select! {
        output = child.wait_with_output() => {
            output.map_err(|err| NodeError::Internal(format!("failed to collect output: {err}")))?
        }
        _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
    };

    Ok(json!({
        "stdout": String::from_utf8_lossy(&output.stdout),
        "stderr": String::from_utf8_lossy(&output.stderr),
        "exit_code": output.status.code(),
    }))
}

/// Runs a shell command line.
pub struct TerminalNode;

#[async_trait]
impl NodeExecutor for TerminalNode {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let command_line = require_str(&params, "command")?;
        ctx.progress("spawning", Some(json!({"command": command_line})));

        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        run_command(command, ctx).await
    }
}

pub struct TerminalNodeFactory;

impl NodeFactory for TerminalNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("terminal", "Terminal")
            .description("Runs a shell command and captures its output")
            .param("command", ParamSpec::required(ParamKind::String).doc("command line for sh -c"))
            .output("stdout", "captured standard output")
            .output("stderr", "captured standard error")
            .output("exit_code", "process exit code, null if killed")
            .isolated()
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(TerminalNode))
    }
}

/// Runs a Python snippet through the system interpreter.
pub struct PythonExecuteNode;

#[async_trait]
impl NodeExecutor for PythonExecuteNode {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let code = require_str(&params, "code")?;
        ctx.progress("spawning", None);

        let mut command = Command::new("python3");
        command.arg("-c").arg(code);
        run_command(command, ctx).await
    }
}

pub struct PythonExecuteNodeFactory;

impl NodeFactory for PythonExecuteNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("python_execute", "Python execute")
            .description("Runs a Python snippet and captures its output")
            .param("code", ParamSpec::required(ParamKind::String).doc("Python source"))
            .output("stdout", "captured standard output")
            .output("stderr", "captured standard error")
            .output("exit_code", "process exit code, null if killed")
            .isolated()
            .timeout_secs(30)
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(PythonExecuteNode))
    }
}
