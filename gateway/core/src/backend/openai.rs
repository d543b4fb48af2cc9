//! OpenAI-Compatible Backend
//!
//! Completion backend for hosted providers that speak the OpenAI chat
//! completions protocol (OpenAI itself, OpenRouter, vLLM, llama.cpp server).
//!
//! Streaming responses are server-sent events: every event is a `data:` line
//! holding a JSON chunk whose `choices[0].delta.content` is the next piece of
//! text. The stream ends with `data: [DONE]`.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::lines::{pump_lines, LineEvent};
use super::traits::{BackendConfig, CompletionBackend, StreamingToken, STREAM_CHANNEL_CAPACITY};
use crate::messages::Turn;

/// OpenAI-compatible backend client
#[derive(Clone)]
pub struct OpenAiBackend {
    base_url: String,
    api_key: String,
    model: String,
    http_client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl OpenAiBackend {
    /// Create a new backend
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .context("Failed to create HTTP client")?,
        })
    }

    /// Create from `BackendConfig`, resolving the API key
    ///
    /// An inline `api_key` wins over `api_key_env`. Returns `Ok(None)` for
    /// non-OpenAI configurations.
    ///
    /// # Errors
    ///
    /// Fails when no API key can be resolved or the HTTP client cannot be
    /// built.
    pub fn from_config(config: &BackendConfig) -> anyhow::Result<Option<Self>> {
        let BackendConfig::OpenAi {
            base_url,
            api_key,
            api_key_env,
            model,
        } = config
        else {
            return Ok(None);
        };

        let api_key = match api_key {
            Some(key) => key.clone(),
            None => std::env::var(api_key_env)
                .with_context(|| format!("API key variable {api_key_env} is not set"))?,
        };

        Self::new(base_url.clone(), api_key, model.clone()).map(Some)
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    fn chat_body(&self, conversation: &[Turn]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": conversation,
            "stream": true,
        })
    }
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: String,
}

/// Interpret one line of a server-sent event stream
fn parse_sse_line(line: &str) -> LineEvent {
    // Comments, `event:` and `id:` lines carry nothing
    let Some(data) = line.strip_prefix("data:") else {
        return LineEvent::Skip;
    };
    let data = data.trim();

    if data == "[DONE]" {
        return LineEvent::Done;
    }

    let chunk: CompletionChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(e) => return LineEvent::Error(format!("malformed completion chunk: {e}")),
    };

    if let Some(error) = chunk.error {
        return LineEvent::Error(error.message);
    }

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(content) if !content.is_empty() => LineEvent::Token(content),
        _ => LineEvent::Skip,
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "OpenAI"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.models_url())
            .bearer_auth(&self.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn stream_complete(
        &self,
        conversation: &[Turn],
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);

        let response = self
            .http_client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(&self.chat_body(conversation))
            .send()
            .await
            .with_context(|| format!("Failed to reach {}", self.base_url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {status}: {body}", self.base_url);
        }

        tracing::debug!(model = %self.model, turns = conversation.len(), "Completion stream opened");

        tokio::spawn(pump_lines(
            Box::pin(response.bytes_stream()),
            tx,
            parse_sse_line,
        ));

        Ok(rx)
    }
}
