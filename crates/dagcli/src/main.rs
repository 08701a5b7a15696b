use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};

use dagcore::{Catalog, EventPayload, NodeStatus, Workflow, GLOBAL_ID};
use dagnodes::{LlmClient, LlmConfig, ReactPlanner};
use dagruntime::{validate, Engine, EventStream, NodeRegistry};

#[derive(Parser)]
#[command(name = "dag")]
#[command(about = "DAG workflow engine CLI", long_about = None)]
struct Cli {
    /// Optional node catalog file overlaid on the built-in specs
    #[arg(long, global = true)]
    catalog: Option<PathBuf>,

    /// Show debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to the workflow JSON document
        file: PathBuf,

        /// Global params as a JSON object, resolvable via $global.<name>
        #[arg(short, long)]
        global: Option<String>,
    },

    /// Validate a workflow file without executing it
    Validate {
        /// Path to the workflow JSON document
        file: PathBuf,
    },

    /// Run the agent over the node catalog
    Agent {
        /// Natural-language query
        query: String,

        /// Iteration budget
        #[arg(short, long, default_value_t = 5)]
        max_iterations: u32,
    },

    /// List registered node types
    Nodes,

    /// Write an example workflow to a file
    Init {
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn build_registry(catalog: Option<&PathBuf>, with_llm: bool) -> Result<NodeRegistry> {
    let mut registry = NodeRegistry::new();
    dagnodes::register_all(&mut registry)?;

    if with_llm {
        let config = LlmConfig::from_env().map_err(|err| anyhow!(err))?;
        dagnodes::register_llm(&mut registry, Arc::new(LlmClient::new(config)))?;
    } else if let Ok(config) = LlmConfig::from_env() {
        dagnodes::register_llm(&mut registry, Arc::new(LlmClient::new(config)))?;
    }

    if let Some(path) = catalog {
        let catalog = Catalog::from_path(path)
            .with_context(|| format!("loading catalog {}", path.display()))?;
        registry.apply_catalog(&catalog)?;
    }
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match cli.command {
        Commands::Run { file, global } => run_workflow(cli.catalog.as_ref(), file, global).await,
        Commands::Validate { file } => validate_workflow(cli.catalog.as_ref(), file),
        Commands::Agent {
            query,
            max_iterations,
        } => run_agent(cli.catalog.as_ref(), query, max_iterations).await,
        Commands::Nodes => list_nodes(cli.catalog.as_ref()),
        Commands::Init { output } => create_example_workflow(output),
    }
}

async fn run_workflow(catalog: Option<&PathBuf>, file: PathBuf, global: Option<String>) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    let document: serde_json::Value = serde_json::from_str(&raw)?;

    let global_params = match global {
        Some(raw) => {
            let parsed: serde_json::Value = serde_json::from_str(&raw)?;
            Some(
                parsed
                    .as_object()
                    .cloned()
                    .ok_or_else(|| anyhow!("--global must be a JSON object"))?,
            )
        }
        None => None,
    };

    let registry = build_registry(catalog, false)?;
    let engine = Engine::new(Arc::new(registry));
    let session = engine.create_session();

    let stream = engine.subscribe(session)?;
    let printer = tokio::spawn(print_events(stream));

    let outcome = engine.execute_workflow(session, document, global_params).await;
    printer.await.ok();

    let summary = outcome?;
    println!();
    println!(
        "done: {}/{} completed, {} failed, {} cancelled",
        summary.completed, summary.total, summary.failed, summary.cancelled
    );
    if !summary.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_agent(catalog: Option<&PathBuf>, query: String, max_iterations: u32) -> Result<()> {
    let config = LlmConfig::from_env().map_err(|err| anyhow!(err))?;
    let client = Arc::new(LlmClient::new(config));

    let registry = build_registry(catalog, true)?;
    let engine = Engine::new(Arc::new(registry));
    let session = engine.create_session();

    let stream = engine.subscribe(session)?;
    let printer = tokio::spawn(print_events(stream));

    let outcome = engine
        .run_agent(session, &query, Some(max_iterations), Arc::new(ReactPlanner::new(client)))
        .await?;
    printer.await.ok();

    match outcome.answer {
        Some(answer) => println!("\n{answer}"),
        None => {
            println!("\nno final answer");
            std::process::exit(1);
        }
    }
    Ok(())
}

async fn print_events(mut stream: EventStream) {
    while let Some(event) = stream.next().await {
        match event.payload {
            EventPayload::Status { message, .. } => println!("• {message}"),
            EventPayload::NodeResult(result) => match result.status {
                NodeStatus::Running => println!("  ⚡ {} running", result.node_id),
                NodeStatus::Completed => {
                    let data = result.data.unwrap_or_default();
                    println!("  ✅ {} completed: {data}", result.node_id);
                }
                NodeStatus::Failed => println!(
                    "  ❌ {} failed: {}",
                    result.node_id,
                    result.error.unwrap_or_default()
                ),
                NodeStatus::Cancelled => println!("  ⛔ {} cancelled", result.node_id),
                _ => {}
            },
            EventPayload::ToolRetry { node_id, attempt, max_retries, error } => {
                println!("  🔁 {node_id} retry {attempt}/{max_retries}: {error}");
            }
            EventPayload::ToolProgress { node_id, status, .. } => {
                println!("     [{node_id}] {status}");
            }
            EventPayload::AgentThinking { thought, iteration } => {
                println!("🤔 [{iteration}] {thought}");
            }
            EventPayload::ActionStart { action, .. } => println!("▶️  {action}"),
            EventPayload::ActionComplete { result, .. } => println!("◀️  {result}"),
            EventPayload::AgentError { error } => println!("⚠️  {error}"),
            EventPayload::AgentComplete { answer } => println!("💡 {answer}"),
            EventPayload::Complete { summary } => {
                println!("✨ complete: {}/{} nodes", summary.completed, summary.total);
            }
            EventPayload::Error { error } => println!("💥 {error}"),
            _ => {}
        }
    }
}

fn validate_workflow(catalog: Option<&PathBuf>, file: PathBuf) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow = Workflow::from_json_str(&raw)?;

    let registry = build_registry(catalog, false)?;
    let plan = validate(&workflow, &registry, &[GLOBAL_ID])
        .map_err(|err| anyhow!("invalid workflow: {err}"))?;

    println!("workflow is valid");
    println!("  nodes: {}", plan.workflow.nodes.len());
    println!("  edges: {}", plan.workflow.edges.len());
    println!("  order: {}", plan.order.join(" → "));
    Ok(())
}

fn list_nodes(catalog: Option<&PathBuf>) -> Result<()> {
    let registry = build_registry(catalog, false)?;
    print!("{}", registry.describe());
    Ok(())
}

fn create_example_workflow(output: PathBuf) -> Result<()> {
    let example = serde_json::json!({
        "nodes": [
            {"id": "add1", "type": "add", "params": {"num1": 10, "num2": 20}},
            {"id": "add2", "type": "add", "params": {"num1": 30, "num2": 40}},
            {"id": "multiply1", "type": "multiply",
             "params": {"num1": "$add1.result", "num2": "$add2.result"}}
        ],
        "edges": [
            {"from": "add1", "to": "multiply1"},
            {"from": "add2", "to": "multiply1"}
        ]
    });

    std::fs::write(&output, serde_json::to_string_pretty(&example)?)?;
    println!("wrote example workflow to {}", output.display());
    println!("run it with: dag run {}", output.display());
    Ok(())
}
