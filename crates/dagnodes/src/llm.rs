//! OpenAI-compatible LLM collaborators: the `chat` leaf node and the
//! ReAct planner behind the agent loop. Credentials come from the
//! environment, never from the workflow document.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::{opt_f64, opt_str, require_str};
use dagruntime::{ExecContext, NodeExecutor, NodeFactory, PlanDecision, PlanRequest, PlanStep, Planner};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Connection settings for the chat completions endpoint.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
}

impl LlmConfig {
    /// Reads `DAG_LLM_API_KEY` (required), `DAG_LLM_MODEL` (required),
    /// `DAG_LLM_BASE_URL` and `DAG_LLM_TIMEOUT_SECS` (optional).
    pub fn from_env() -> Result<Self, String> {
        let api_key =
            std::env::var("DAG_LLM_API_KEY").map_err(|_| "DAG_LLM_API_KEY is not set".to_string())?;
        let model =
            std::env::var("DAG_LLM_MODEL").map_err(|_| "DAG_LLM_MODEL is not set".to_string())?;
        let base_url =
            std::env::var("DAG_LLM_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let timeout_secs = std::env::var("DAG_LLM_TIMEOUT_SECS")
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Ok(Self {
            base_url,
            api_key,
            model,
            timeout: Duration::from_secs(timeout_secs),
        })
    }
}

#[derive(Deserialize)]
struct ChatCompletion {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

/// Thin chat-completions client. Network failures, timeouts, 429 and 5xx
/// are transient; everything else is permanent.
pub struct LlmClient {
    client: reqwest::Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("reqwest client");
        Self { client, config }
    }

    pub async fn chat(&self, messages: Vec<Value>, temperature: Option<f64>) -> Result<String, NodeError> {
        let mut body = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": false,
        });
        if let Some(temperature) = temperature {
            body["temperature"] = json!(temperature);
        }

        let response = self
            .client
            .post(format!("{}/chat/completions", self.config.base_url))
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| {
                if err.is_timeout() || err.is_connect() {
                    NodeError::Transient(format!("LLM API call failed: {err}"))
                } else {
                    NodeError::Permanent(format!("LLM API call failed: {err}"))
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(NodeError::Transient(format!("LLM API returned {status}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(NodeError::Permanent(format!(
                "LLM API returned {status}: {detail}"
            )));
        }

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|err| NodeError::Permanent(format!("malformed LLM response: {err}")))?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| NodeError::Permanent("LLM response had no choices".to_string()))
    }
}

/// One LLM round-trip as a workflow node.
pub struct ChatNode {
    client: Arc<LlmClient>,
}

#[async_trait]
impl NodeExecutor for ChatNode {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let user_question = require_str(&params, "user_question")?;
        let system_prompt = opt_str(&params, "system_prompt", "");
        let temperature = opt_f64(&params, "temperature", 0.7);

        let mut messages = Vec::new();
        if !system_prompt.is_empty() {
            messages.push(json!({"role": "system", "content": system_prompt}));
        }
        messages.push(json!({"role": "user", "content": user_question}));

        ctx.progress("calling model", None);
        let response = self.client.chat(messages, Some(temperature)).await?;
        Ok(json!({"response": response}))
    }
}

pub struct ChatNodeFactory {
    client: Arc<LlmClient>,
}

impl ChatNodeFactory {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }
}

impl NodeFactory for ChatNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("chat", "Chat")
            .description("Sends a question to the language model")
            .param("user_question", ParamSpec::required(ParamKind::String))
            .param(
                "system_prompt",
                ParamSpec::optional(ParamKind::String, Some(json!(""))),
            )
            .param(
                "temperature",
                ParamSpec::optional(ParamKind::Float, Some(json!(0.7))),
            )
            .output("response", "model answer")
            .retryable()
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(ChatNode {
            client: Arc::clone(&self.client),
        }))
    }
}

const REACT_PROMPT: &str = r#"You are a task-solving agent with access to tools.

Available tools:
{tools}

Answer the user's question by choosing one tool per step. Respond with a
single JSON object, nothing else:

  {"thought": "<reasoning>", "action": "<tool name>", "action_input": {<params>}}

When you know the final answer, respond with:

  {"thought": "<reasoning>", "final_answer": "<answer>"}

Question: {query}

Previous steps:
{scratchpad}"#;

/// ReAct-style planner: renders the tool catalog into the prompt, asks the
/// model for the next step and parses its JSON reply. A malformed reply
/// degrades to a final answer carrying the raw text, so one bad completion
/// never wedges the loop.
pub struct ReactPlanner {
    client: Arc<LlmClient>,
}

impl ReactPlanner {
    pub fn new(client: Arc<LlmClient>) -> Self {
        Self { client }
    }

    fn parse(response: &str) -> PlanDecision {
        let stripped = strip_code_fence(response);
        let parsed: Value = match serde_json::from_str(stripped) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => {
                return PlanDecision {
                    thought: String::new(),
                    step: PlanStep::Final {
                        answer: response.trim().to_string(),
                    },
                }
            }
        };

        let thought = parsed["thought"].as_str().unwrap_or_default().to_string();
        if let Some(answer) = parsed["final_answer"].as_str() {
            return PlanDecision {
                thought,
                step: PlanStep::Final {
                    answer: answer.to_string(),
                },
            };
        }
        let action = parsed["action"].as_str().unwrap_or_default().to_string();
        if action.is_empty() || action == "Final Answer" {
            let answer = parsed["action_input"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| parsed["action_input"].to_string());
            return PlanDecision {
                thought,
                step: PlanStep::Final { answer },
            };
        }
        let input = parsed["action_input"].as_object().cloned().unwrap_or_default();
        PlanDecision {
            thought,
            step: PlanStep::Action { action, input },
        }
    }
}

#[async_trait]
impl Planner for ReactPlanner {
    async fn plan(&self, request: PlanRequest<'_>) -> Result<PlanDecision, NodeError> {
        let prompt = REACT_PROMPT
            .replace("{tools}", request.tools)
            .replace("{query}", request.query)
            .replace("{scratchpad}", request.scratchpad);

        let response = self
            .client
            .chat(vec![json!({"role": "user", "content": prompt})], None)
            .await?;
        tracing::debug!("planner response (iteration {}): {response}", request.iteration);
        Ok(Self::parse(&response))
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
