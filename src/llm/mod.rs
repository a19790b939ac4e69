//! Language-model integration.
//!
//! The agent only needs a request/response chat call. `OllamaProvider` speaks
//! the Ollama-compatible `/api/chat` protocol; tests plug in stub providers
//! through the `LlmProvider` trait.

pub mod ollama;

pub use ollama::OllamaProvider;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// Role of a chat message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Sampling options forwarded to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatOptions {
    pub temperature: f32,
    /// Ask the provider to constrain output to JSON when it supports it.
    #[serde(skip)]
    pub json_mode: bool,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: 0.2,
            json_mode: false,
        }
    }
}

impl ChatOptions {
    /// Deterministic JSON extraction settings.
    pub fn json() -> Self {
        Self {
            temperature: 0.0,
            json_mode: true,
        }
    }
}

/// Response of a chat call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

impl ChatResponse {
    pub fn content(&self) -> &str {
        &self.message.content
    }
}

/// Request/response language-model service.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Model identifier used for requests.
    fn model_name(&self) -> &str;

    /// Send `messages` and return the assistant reply.
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<ChatResponse, LlmError>;
}

/// Configuration for creating an LLM provider.
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// Sent as a bearer token when set (hosted Ollama-compatible gateways).
    pub api_key: Option<secrecy::SecretString>,
    pub timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1:8b".to_string(),
            api_key: None,
            timeout: Duration::from_secs(60),
        }
    }
}

impl LlmConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            base_url: std::env::var("PLANNER_LLM_URL").unwrap_or(defaults.base_url),
            model: std::env::var("PLANNER_LLM_MODEL").unwrap_or(defaults.model),
            api_key: std::env::var("PLANNER_LLM_API_KEY")
                .ok()
                .filter(|k| !k.is_empty())
                .map(secrecy::SecretString::from),
            timeout: std::env::var("PLANNER_LLM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }
}

/// Create an LLM provider from configuration.
pub fn create_provider(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider = OllamaProvider::new(config)?;
    tracing::info!(base_url = %config.base_url, model = %config.model, "Using Ollama-compatible chat provider");
    Ok(Arc::new(provider))
}

/// Extract the first balanced JSON object (`{...}`) from model output.
///
/// Braces inside string literals are ignored, so prose around the object and
/// code fences do not confuse it.
pub fn extract_json_object(text: &str) -> Option<&str> {
    extract_balanced(text, b'{', b'}')
}

/// Extract the first balanced JSON array (`[...]`) from model output.
pub fn extract_json_array(text: &str) -> Option<&str> {
    extract_balanced(text, b'[', b']')
}

fn extract_balanced(text: &str, open: u8, close: u8) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = bytes.iter().position(|&b| b == open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}
