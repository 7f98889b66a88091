//! Chat-completion backends.
//!
//! [`ChatModel`] is the only way the advisor and the analyzers talk to a
//! language model. Calls are not retried: a failed completion aborts the
//! current turn and the caller decides what to report.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;

use crate::config::LlmConfig;
use crate::error::{AdvisorError, Result};
use crate::models::{Message, Role};

/// One completion call: system prompt, prior conversation, the current user
/// turn, and optional document context attached to that turn.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub user_turn: String,
    pub context: Option<String>,
}

impl CompletionRequest {
    pub fn new(system_prompt: impl Into<String>, user_turn: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
            user_turn: user_turn.into(),
            ..Self::default()
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context;
        self
    }

    /// The final user message as sent to the model.
    pub fn rendered_user_turn(&self) -> String {
        match &self.context {
            Some(ctx) => format!("Document context:\n{}\n\nQuestion: {}", ctx, self.user_turn),
            None => self.user_turn.clone(),
        }
    }

    /// Flatten into an ordered message list: system, history, user turn.
    pub fn to_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(self.history.len() + 2);
        if !self.system_prompt.is_empty() {
            messages.push(Message::system(self.system_prompt.clone()));
        }
        messages.extend(self.history.iter().cloned());
        messages.push(Message::user(self.rendered_user_turn()));
        messages
    }
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;
}

fn gen_err(msg: impl Into<String>) -> AdvisorError {
    AdvisorError::Generation(msg.into())
}

fn wire_messages(request: &CompletionRequest) -> Vec<serde_json::Value> {
    request
        .to_messages()
        .iter()
        .map(|m| json!({ "role": m.role.as_str(), "content": m.content }))
        .collect()
}

async fn post_json(
    request: reqwest::RequestBuilder,
    backend: &str,
) -> Result<serde_json::Value> {
    let response = request
        .send()
        .await
        .map_err(|e| gen_err(format!("{} request failed: {}", backend, e)))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(gen_err(format!("{} API error {}: {}", backend, status, body)));
    }
    response
        .json()
        .await
        .map_err(|e| gen_err(format!("{} response was not JSON: {}", backend, e)))
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| AdvisorError::Configuration(format!("failed to build HTTP client: {}", e)))
}

/// `POST https://api.openai.com/v1/chat/completions`.
pub struct OpenAiChat {
    model: String,
    temperature: f32,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
            AdvisorError::Configuration("OPENAI_API_KEY environment variable not set".into())
        })?;
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            api_key,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "temperature": self.temperature,
            "messages": wire_messages(request),
        });
        let json = post_json(
            self.client
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&body),
            "OpenAI",
        )
        .await?;
        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| gen_err("OpenAI response contained no choices"))
    }
}

/// `POST {url}/api/chat` with `stream: false`.
pub struct OllamaChat {
    model: String,
    temperature: f32,
    url: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model: config.model.clone(),
            temperature: config.temperature,
            url: url.trim_end_matches('/').to_string(),
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl ChatModel for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let body = json!({
            "model": self.model,
            "stream": false,
            "options": { "temperature": self.temperature },
            "messages": wire_messages(request),
        });
        let json = post_json(
            self.client.post(format!("{}/api/chat", self.url)).json(&body),
            "Ollama",
        )
        .await?;
        json["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| gen_err("Ollama response contained no message"))
    }
}

pub fn create_chat_model(config: &LlmConfig) -> Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaChat::new(config)?)),
        other => Err(AdvisorError::Configuration(format!(
            "Unknown llm provider: {}",
            other
        ))),
    }
}

/// Defers [`create_chat_model`] until the first completion, so commands
/// that never generate text run without LLM credentials.
pub struct LazyChatModel {
    config: LlmConfig,
    inner: OnceCell<Arc<dyn ChatModel>>,
}

impl LazyChatModel {
    pub fn new(config: LlmConfig) -> Self {
        Self {
            config,
            inner: OnceCell::new(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.inner.initialized()
    }
}

#[async_trait]
impl ChatModel for LazyChatModel {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let model = self
            .inner
            .get_or_try_init(|| async { create_chat_model(&self.config) })
            .await?;
        model.complete(request).await
    }
}

/// Render a transcript as `role: content` lines.
pub fn transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "human",
                Role::Assistant => "ai",
                Role::System => "system",
            };
            format!("{}: {}", role, m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}
