use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;

use crate::models::ChatTurn;
use crate::selector::Model;

/** \brief Driver-call endpoint of the hosted completion API. */
pub const DEFAULT_ENDPOINT: &str = "https://api.puter.com/drivers/call";
/** \brief Reply text used when no known payload shape carries content. */
pub const NO_RESPONSE_PLACEHOLDER: &str = "No response received";
const LOGICAL_FAILURE_FALLBACK: &str = "Failed to get response";

/**
 * \brief Driver-call envelope sent to the endpoint.
 */
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub interface: &'static str,
    pub driver: &'static str,
    pub method: &'static str,
    pub args: CompletionArgs,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionArgs {
    pub messages: Vec<ChatTurn>,
    pub model: Model,
}

impl CompletionRequest {
    pub fn new(messages: Vec<ChatTurn>, model: Model) -> Self {
        Self {
            interface: "puter-chat-completion",
            driver: "openai-completion",
            method: "complete",
            args: CompletionArgs { messages, model },
        }
    }
}

/**
 * \brief Performs the single round trip to the completion endpoint.
 * \details Returns the parsed JSON body; interpreting it is left to `interpret_response`.
 */
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, token: &str, request: &CompletionRequest) -> Result<Value>;
}

/**
 * \brief reqwest-backed transport.
 */
#[derive(Clone)]
pub struct PuterClient {
    client: reqwest::Client,
    endpoint: String,
}

impl PuterClient {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    /**
     * \brief Endpoint from `PUTERCHAT_API_URL`, falling back to the hosted API.
     */
    pub fn from_env() -> Self {
        let endpoint =
            std::env::var("PUTERCHAT_API_URL").unwrap_or_else(|_| DEFAULT_ENDPOINT.to_string());
        Self::new(endpoint)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CompletionTransport for PuterClient {
    async fn complete(&self, token: &str, request: &CompletionRequest) -> Result<Value> {
        let resp = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .json(request)
            .send()
            .await?;

        // Error payloads often arrive with a non-2xx status, so the body is parsed first.
        let status = resp.status();
        let text = resp.text().await?;
        match serde_json::from_str::<Value>(&text) {
            Ok(v) => Ok(v),
            Err(_) if !status.is_success() => {
                Err(anyhow!("request failed: {} -> {}", status, text))
            }
            Err(e) => Err(anyhow!("invalid response body: {}", e)),
        }
    }
}

/**
 * \brief Turn a parsed payload into reply text, or an error for logical failures.
 */
pub fn interpret_response(v: &Value) -> Result<String> {
    check_logical_failure(v)?;
    Ok(extract_reply(v))
}

fn check_logical_failure(v: &Value) -> Result<()> {
    let failed = v.get("success").and_then(Value::as_bool) == Some(false);
    let error = v.get("error").filter(|e| is_truthy(e));
    if !failed && error.is_none() {
        return Ok(());
    }
    let reason = error
        .and_then(|e| {
            e.get("message")
                .and_then(Value::as_str)
                .or_else(|| e.as_str())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or(LOGICAL_FAILURE_FALLBACK);
    Err(anyhow!("{}", reason))
}

fn is_truthy(v: &Value) -> bool {
    match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        _ => true,
    }
}

/**
 * \brief Compatibility shim over the payload shapes the endpoint has returned.
 * \details First non-empty of `result.message.content`, `message.content`,
 * `result.choices[0].message.content`; otherwise the placeholder. Claude models
 * answer with an array of content blocks, whose `text` parts are joined.
 */
pub fn extract_reply(v: &Value) -> String {
    const SHAPES: [&str; 3] = [
        "/result/message/content",
        "/message/content",
        "/result/choices/0/message/content",
    ];
    SHAPES
        .iter()
        .filter_map(|ptr| v.pointer(ptr).and_then(content_text))
        .find(|s| !s.is_empty())
        .unwrap_or_else(|| NO_RESPONSE_PLACEHOLDER.to_string())
}

fn content_text(content: &Value) -> Option<String> {
    match content {
        Value::String(s) => Some(s.clone()),
        Value::Array(blocks) => Some(
            blocks
                .iter()
                .filter_map(|b| b.as_str().or_else(|| b.get("text").and_then(Value::as_str)))
                .collect::<Vec<_>>()
                .join(""),
        ),
        _ => None,
    }
}
