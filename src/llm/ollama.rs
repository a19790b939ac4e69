//! Ollama-compatible chat provider.
//!
//! `POST {base_url}/api/chat` with `stream: false`; the reply carries the
//! assistant message under `message.content`.

use async_trait::async_trait;
use reqwest::Client;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};

use super::{ChatMessage, ChatOptions, ChatResponse, LlmConfig, LlmProvider};
use crate::error::LlmError;

const PROVIDER: &str = "ollama";

/// Chat provider for Ollama and API-compatible gateways.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    base_url: String,
    model: String,
    api_key: Option<secrecy::SecretString>,
    timeout: std::time::Duration,
    client: Client,
}

impl OllamaProvider {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("Failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: config.api_key.clone(),
            timeout: config.timeout,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

#[async_trait]
impl LlmProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        options: ChatOptions,
    ) -> Result<ChatResponse, LlmError> {
        tracing::debug!(
            model = %self.model,
            messages = messages.len(),
            total_chars = messages.iter().map(|m| m.content.len()).sum::<usize>(),
            "Chat request"
        );

        let request = OllamaRequest {
            model: &self.model,
            messages: &messages,
            stream: false,
            format: options.json_mode.then_some("json"),
            options: OllamaOptions {
                temperature: options.temperature,
            },
        };

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if let Some(ref key) = self.api_key {
            builder = builder.bearer_auth(key.expose_secret());
        }

        let start = std::time::Instant::now();
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                LlmError::Timeout {
                    provider: PROVIDER.to_string(),
                    timeout: self.timeout,
                }
            } else {
                LlmError::RequestFailed {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                reason: format!("HTTP {status}: {body}"),
            });
        }

        let parsed: OllamaResponse =
            response
                .json()
                .await
                .map_err(|e| LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: e.to_string(),
                })?;

        tracing::debug!(
            elapsed_ms = start.elapsed().as_millis() as u64,
            chars = parsed.message.content.len(),
            "Chat response received"
        );

        Ok(ChatResponse {
            message: parsed.message,
        })
    }
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: ChatMessage,
}
