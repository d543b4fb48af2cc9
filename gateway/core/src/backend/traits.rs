//! Completion Backend Traits
//!
//! Trait definitions for completion backends. The router treats every
//! provider (a cloud API, a local model server, a scripted stub) as the same
//! opaque capability: given a conversation, produce a lazy sequence of text
//! chunks.
//!
//! Implementations own the provider-specific request shape, the wire format
//! of the provider's streaming response, and authentication.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::messages::Turn;

/// Capacity of the channel between a backend's producer task and its consumer
pub const STREAM_CHANNEL_CAPACITY: usize = 100;

/// Token stream events from completion backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A chunk of the response
    Token(String),
    /// Response completed successfully
    Complete {
        /// The complete message (concatenation of all tokens)
        message: String,
    },
    /// Error occurred during streaming
    Error(String),
}

/// Completion backend trait
///
/// Implement this trait to add support for another provider.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama", "OpenAI")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Start a streaming completion for a conversation
    ///
    /// Returns a channel receiver that yields tokens as they arrive and ends
    /// with exactly one [`StreamingToken::Complete`] or
    /// [`StreamingToken::Error`]. A channel that closes without either means
    /// the producer died; consumers treat it as a failure.
    ///
    /// Dropping the receiver stops the producer.
    async fn stream_complete(
        &self,
        conversation: &[Turn],
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;
}

/// Backend connection configuration
///
/// Deserializes from a `[backends.<id>]` table whose `kind` field selects the
/// variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BackendConfig {
    /// Local Ollama server
    Ollama {
        /// Ollama host address
        #[serde(default = "default_ollama_host")]
        host: String,
        /// Ollama port number
        #[serde(default = "default_ollama_port")]
        port: u16,
        /// Model to request
        #[serde(default = "default_ollama_model")]
        model: String,
    },
    /// OpenAI-compatible chat completions API
    #[serde(rename = "openai")]
    OpenAi {
        /// API base URL, without the `/chat/completions` suffix
        #[serde(default = "default_openai_base_url")]
        base_url: String,
        /// Inline API key (prefer `api_key_env`)
        #[serde(default)]
        api_key: Option<String>,
        /// Environment variable holding the API key
        #[serde(default = "default_openai_key_env")]
        api_key_env: String,
        /// Model to request
        model: String,
    },
    /// Scripted backend that replays fixed fragments
    Stub {
        /// Fragments to stream, in order
        #[serde(default)]
        fragments: Vec<String>,
        /// If set, fail with this message after the fragments
        #[serde(default)]
        fail_with: Option<String>,
    },
}

fn default_ollama_host() -> String {
    "localhost".to_string()
}

fn default_ollama_port() -> u16 {
    11434
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_openai_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::Ollama {
            host: default_ollama_host(),
            port: default_ollama_port(),
            model: default_ollama_model(),
        }
    }
}

impl BackendConfig {
    /// Create Ollama configuration
    pub fn ollama(host: impl Into<String>, port: u16, model: impl Into<String>) -> Self {
        Self::Ollama {
            host: host.into(),
            port,
            model: model.into(),
        }
    }

    /// Create Ollama configuration from environment
    #[must_use]
    pub fn ollama_from_env() -> Self {
        let host = std::env::var("OLLAMA_HOST").unwrap_or_else(|_| default_ollama_host());
        let port: u16 = std::env::var("OLLAMA_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(default_ollama_port);
        let model = std::env::var("OLLAMA_MODEL").unwrap_or_else(|_| default_ollama_model());

        Self::Ollama { host, port, model }
    }

    /// Create stub configuration
    pub fn stub<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Stub {
            fragments: fragments.into_iter().map(Into::into).collect(),
            fail_with: None,
        }
    }

    /// Short name of the variant, as written in the `kind` field
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ollama { .. } => "ollama",
            Self::OpenAi { .. } => "openai",
            Self::Stub { .. } => "stub",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_config_default() {
        let config = BackendConfig::default();
        match config {
            BackendConfig::Ollama { host, port, model } => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 11434);
                assert_eq!(model, "llama3.2");
            }
            _ => panic!("Expected Ollama config"),
        }
    }

    #[test]
    fn test_backend_config_from_toml_tables() {
        let config: BackendConfig = toml::from_str(
            r#"
            kind = "openai"
            model = "gpt-4o-mini"
            "#,
        )
        .unwrap();
        assert_eq!(
            config,
            BackendConfig::OpenAi {
                base_url: "https://api.openai.com/v1".into(),
                api_key: None,
                api_key_env: "OPENAI_API_KEY".into(),
                model: "gpt-4o-mini".into(),
            }
        );

        let config: BackendConfig = toml::from_str(
            r#"
            kind = "stub"
            fragments = ["Hel", "lo"]
            "#,
        )
        .unwrap();
        assert_eq!(config, BackendConfig::stub(["Hel", "lo"]));
        assert_eq!(config.kind(), "stub");
    }

    #[test]
    fn test_backend_config_unknown_kind() {
        let result = toml::from_str::<BackendConfig>(r#"kind = "carrier-pigeon""#);
        assert!(result.is_err());
    }
}
