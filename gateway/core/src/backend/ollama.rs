//! Ollama Backend Implementation
//!
//! Completion backend for Ollama (locally hosted model server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions with message history (streaming)
//! - `/api/tags` - List available models (used as a health probe)
//!
//! A streaming chat response is newline-delimited JSON. Each line carries a
//! `message.content` chunk; the last line has `"done": true`. Failures are
//! reported as a line with an `error` field.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::lines::{pump_lines, LineEvent};
use super::traits::{BackendConfig, CompletionBackend, StreamingToken, STREAM_CHANNEL_CAPACITY};
use crate::messages::Turn;

/// Ollama backend client
#[derive(Clone, Debug)]
pub struct OllamaBackend {
    /// Host address
    host: String,
    /// Port number
    port: u16,
    /// Model to request
    model: String,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create a new Ollama backend
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built (e.g. no TLS backend).
    pub fn new(
        host: impl Into<String>,
        port: u16,
        model: impl Into<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            host: host.into(),
            port,
            model: model.into(),
            http_client: reqwest::Client::builder()
                .timeout(Duration::from_secs(120))
                .build()
                .context("Failed to create HTTP client")?,
        })
    }

    /// Create from `BackendConfig`
    ///
    /// Returns `Ok(None)` for non-Ollama configurations.
    ///
    /// # Errors
    ///
    /// Fails if the HTTP client cannot be built.
    pub fn from_config(config: &BackendConfig) -> anyhow::Result<Option<Self>> {
        match config {
            BackendConfig::Ollama { host, port, model } => {
                Self::new(host.clone(), *port, model.clone()).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Get the base URL
    fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Get chat endpoint URL
    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    /// Get tags endpoint URL
    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for a streaming chat request
    fn chat_body(&self, conversation: &[Turn]) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": conversation,
            "stream": true,
        })
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

/// Interpret one line of an `/api/chat` stream
fn parse_chat_line(line: &str) -> LineEvent {
    let chunk: ChatChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(e) => return LineEvent::Error(format!("malformed Ollama chunk: {e}")),
    };

    if let Some(error) = chunk.error {
        return LineEvent::Error(error);
    }
    if chunk.done {
        return LineEvent::Done;
    }
    match chunk.message {
        Some(message) if !message.content.is_empty() => LineEvent::Token(message.content),
        _ => LineEvent::Skip,
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
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
            .post(self.chat_url())
            .json(&self.chat_body(conversation))
            .send()
            .await
            .with_context(|| format!("Failed to reach Ollama at {}", self.base_url()))?;

        // Check for HTTP errors
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama returned {status}: {body}");
        }

        tracing::debug!(model = %self.model, turns = conversation.len(), "Ollama stream opened");

        // Spawn task to process stream
        tokio::spawn(pump_lines(
            Box::pin(response.bytes_stream()),
            tx,
            parse_chat_line,
        ));

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_backend_creation() {
        let backend = OllamaBackend::new("localhost", 11434, "llama3.2").unwrap();
        assert_eq!(backend.host, "localhost");
        assert_eq!(backend.port, 11434);
        assert_eq!(backend.base_url(), "http://localhost:11434");
        assert_eq!(backend.chat_url(), "http://localhost:11434/api/chat");
    }

    #[test]
    fn test_chat_body_carries_roles() {
        let backend = OllamaBackend::new("localhost", 11434, "llama3.2").unwrap();
        let body = backend.chat_body(&[Turn::system("Be helpful"), Turn::user("Hello")]);

        assert_eq!(body["model"], "llama3.2");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "Hello");
    }

    #[test]
    fn test_parse_chat_line() {
        assert_eq!(
            parse_chat_line(r#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#),
            LineEvent::Token("Hel".into())
        );
        assert_eq!(
            parse_chat_line(r#"{"message":{"role":"assistant","content":""},"done":true}"#),
            LineEvent::Done
        );
        assert_eq!(
            parse_chat_line(r#"{"error":"model 'nope' not found"}"#),
            LineEvent::Error("model 'nope' not found".into())
        );
        assert!(matches!(parse_chat_line("not json"), LineEvent::Error(_)));
    }

    #[test]
    fn test_from_config() {
        let config = BackendConfig::ollama("example.com", 8080, "mistral");

        let backend = OllamaBackend::from_config(&config).unwrap().unwrap();
        assert_eq!(backend.host, "example.com");
        assert_eq!(backend.port, 8080);
        assert_eq!(backend.model, "mistral");

        // Wrong config type returns None
        let config = BackendConfig::stub(["x"]);
        assert!(OllamaBackend::from_config(&config).unwrap().is_none());
    }
}
