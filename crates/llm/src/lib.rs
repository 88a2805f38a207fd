//! Chat-client boundary for the planner.
//!
//! The planner only ever sees [`ChatClient`]: ordered system messages plus a
//! user message in, raw text out. Any provider can sit behind it; this crate
//! ships one OpenAI-compatible HTTP adapter so the workspace works out of
//! the box. Provider-side tool calling is deliberately not modeled: plans
//! arrive as plain text JSON, and the `tools` parameter is passed through
//! opaquely for adapters that want it.

use async_trait::async_trait;
use serde_json::{Value, json};
use thiserror::Error;
use tracing::debug;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Adapter failures. The planner classifies every variant as a network-level
/// attempt failure and retries within the tier budget.
#[derive(Debug, Error)]
pub enum ChatClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("response carried no message content")]
    MissingContent,
    #[error("API key environment variable '{0}' is not set")]
    MissingApiKey(String),
}

// ── Client trait ─────────────────────────────────────────────────────────────

/// Prompt-in / text-out chat client.
///
/// `system_messages` arrive in assembly order and must be rendered in that
/// order, per provider convention. `tools` is opaque to the runtime.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn invoke(
        &self,
        system_messages: &[String],
        user_message: &str,
        tools: &[Value],
    ) -> Result<String, ChatClientError>;
}

// ── OpenAI-compatible HTTP adapter ───────────────────────────────────────────

/// Adapter for any OpenAI-compatible `/chat/completions` endpoint.
///
/// The bearer token is read per request from the configured environment
/// variable, so rotating a key never requires rebuilding the client.
#[derive(Debug, Clone)]
pub struct HttpChatClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key_env: Option<String>,
}

impl HttpChatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            api_key_env: None,
        }
    }

    /// Name the environment variable holding the bearer token. Without this
    /// the adapter sends unauthenticated requests (local gateways).
    pub fn with_api_key_env(mut self, var: impl Into<String>) -> Self {
        self.api_key_env = Some(var.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn api_key(&self) -> Result<Option<String>, ChatClientError> {
        let Some(var) = &self.api_key_env else {
            return Ok(None);
        };
        match std::env::var(var) {
            Ok(key) if !key.trim().is_empty() => Ok(Some(key)),
            _ => Err(ChatClientError::MissingApiKey(var.clone())),
        }
    }
}

#[async_trait]
impl ChatClient for HttpChatClient {
    async fn invoke(
        &self,
        system_messages: &[String],
        user_message: &str,
        tools: &[Value],
    ) -> Result<String, ChatClientError> {
        let payload = build_payload(&self.model, system_messages, user_message, tools);
        debug!(model = %self.model, endpoint = %self.endpoint(), "chat completion request");

        let mut request = self.client.post(self.endpoint()).json(&payload);
        if let Some(key) = self.api_key()? {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        let body: Value = response.json().await?;
        if !status.is_success() {
            return Err(ChatClientError::Status {
                status: status.as_u16(),
                body: body.to_string(),
            });
        }
        parse_chat_content(&body)
    }
}

/// Build the `/chat/completions` request body: system messages in assembly
/// order, then the single user message.
fn build_payload(
    model: &str,
    system_messages: &[String],
    user_message: &str,
    tools: &[Value],
) -> Value {
    let mut messages: Vec<Value> = system_messages
        .iter()
        .map(|content| json!({"role": "system", "content": content}))
        .collect();
    messages.push(json!({"role": "user", "content": user_message}));

    let mut payload = json!({
        "model": model,
        "messages": messages,
    });
    if !tools.is_empty() {
        payload["tools"] = Value::Array(tools.to_vec());
    }
    payload
}

/// Extract `choices[0].message.content` from a completion response.
fn parse_chat_content(body: &Value) -> Result<String, ChatClientError> {
    body.get("choices")
        .and_then(|choices| choices.get(0))
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .and_then(|content| content.as_str())
        .map(ToString::to_string)
        .ok_or(ChatClientError::MissingContent)
}

// ── Tests ────────────────────────────────────────────────────────────────────
