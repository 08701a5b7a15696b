use async_trait::async_trait;
use serde_json::{json, Map, Value};

use dagcore::{NodeError, NodeSpec, ParamKind, ParamSpec};
use dagruntime::params::{opt_str, require_str};
use dagruntime::{ExecContext, NodeExecutor, NodeFactory};

/// HTTP request node. Connection problems, timeouts, 429 and 5xx are
/// reported transient so the runner's retry policy applies; other error
/// statuses are permanent.
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeExecutor for HttpRequestNode {
    async fn execute(&self, params: Map<String, Value>, ctx: &ExecContext) -> Result<Value, NodeError> {
        let url = require_str(&params, "url")?;
        let method = opt_str(&params, "method", "GET").to_uppercase();

        ctx.progress("requesting", Some(json!({"method": method, "url": url})));

        let mut request = match method.as_str() {
            "GET" => self.client.get(url),
            "POST" => self.client.post(url),
            "PUT" => self.client.put(url),
            "DELETE" => self.client.delete(url),
            other => {
                return Err(NodeError::invalid_param(
                    "method",
                    format!("unsupported method '{other}'"),
                ))
            }
        };

        if let Some(Value::Object(headers)) = params.get("headers") {
            for (name, value) in headers {
                if let Some(text) = value.as_str() {
                    request = request.header(name.as_str(), text);
                }
            }
        }
        if let Some(body) = params.get("body") {
            request = match body {
                Value::String(text) => request.body(text.clone()),
                other => request.json(other),
            };
        }

        let response = tokio::select! {
            response = request.send() => response.map_err(classify_reqwest_error)?,
            _ = ctx.cancellation.cancelled() => return Err(NodeError::Cancelled),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(NodeError::Transient(format!("HTTP {status}")));
        }
        if status.is_client_error() {
            return Err(NodeError::Permanent(format!("HTTP {status}")));
        }

        let headers: Map<String, Value> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.to_string(),
                    Value::String(value.to_str().unwrap_or_default().to_string()),
                )
            })
            .collect();
        let body = response.text().await.map_err(classify_reqwest_error)?;
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "body": body,
            "json": parsed,
        }))
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> NodeError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        NodeError::Transient(format!("HTTP request failed: {err}"))
    } else {
        NodeError::Permanent(format!("HTTP request failed: {err}"))
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn spec(&self) -> NodeSpec {
        NodeSpec::new("http_request", "HTTP request")
            .description("Performs an HTTP request and captures the response")
            .param("url", ParamSpec::required(ParamKind::String))
            .param(
                "method",
                ParamSpec::optional(ParamKind::String, Some(json!("GET")))
                    .doc("GET, POST, PUT or DELETE"),
            )
            .param("headers", ParamSpec::optional(ParamKind::Mapping, None))
            .param(
                "body",
                ParamSpec::optional(ParamKind::Any, None).doc("string sent verbatim, other values as JSON"),
            )
            .output("status", "HTTP status code")
            .output("headers", "response headers")
            .output("body", "response body as text")
            .output("json", "response body parsed as JSON, when possible")
            .retryable()
    }

    fn create(&self) -> Result<Box<dyn NodeExecutor>, NodeError> {
        Ok(Box::new(HttpRequestNode::new()))
    }
}
