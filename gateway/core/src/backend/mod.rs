//! Completion Backend Integration
//!
//! This module provides uniform access to completion providers through the
//! [`CompletionBackend`] trait.
//!
//! # Available Backends
//!
//! - **Ollama**: Local model server (`kind = "ollama"`)
//! - **OpenAI**: Any OpenAI-compatible chat completions API (`kind = "openai"`)
//! - **Stub**: Scripted fragments for demos and tests (`kind = "stub"`)
//!
//! # Usage
//!
//! ```ignore
//! use gateway_core::backend::{build_backend, BackendConfig};
//!
//! let backend = build_backend(&BackendConfig::ollama_from_env())?;
//! let mut rx = backend.stream_complete(&conversation).await?;
//! ```

mod lines;
mod ollama;
mod openai;
mod stub;
mod traits;

use std::sync::Arc;

pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;
pub use stub::{StubBackend, StubEnding};
pub use traits::{BackendConfig, CompletionBackend, StreamingToken, STREAM_CHANNEL_CAPACITY};

/// Construct the backend described by a configuration entry
///
/// # Errors
///
/// Fails when the backend cannot be set up (missing API key, HTTP client
/// construction failure).
pub fn build_backend(config: &BackendConfig) -> anyhow::Result<Arc<dyn CompletionBackend>> {
    let backend: Arc<dyn CompletionBackend> = match config {
        BackendConfig::Ollama { .. } => Arc::new(
            OllamaBackend::from_config(config)?
                .ok_or_else(|| anyhow::anyhow!("not an Ollama configuration"))?,
        ),
        BackendConfig::OpenAi { .. } => Arc::new(
            OpenAiBackend::from_config(config)?
                .ok_or_else(|| anyhow::anyhow!("not an OpenAI configuration"))?,
        ),
        BackendConfig::Stub { .. } => Arc::new(
            StubBackend::from_config(config)
                .ok_or_else(|| anyhow::anyhow!("not a stub configuration"))?,
        ),
    };
    Ok(backend)
}
