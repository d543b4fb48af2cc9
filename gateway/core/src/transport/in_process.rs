//! In-Process Transport
//!
//! Calls the completion service directly. Used by the chat client's
//! embedded mode and by tests that need no daemon.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::traits::ChatTransport;
use crate::error::GatewayError;
use crate::messages::Turn;
use crate::service::CompletionService;
use crate::streaming::FragmentSource;

/// Transport backed by a local [`CompletionService`]
#[derive(Clone, Debug)]
pub struct InProcessTransport {
    service: Arc<CompletionService>,
    backend: Option<String>,
}

impl InProcessTransport {
    /// Route requests to the service's default backend
    #[must_use]
    pub fn new(service: Arc<CompletionService>) -> Self {
        Self {
            service,
            backend: None,
        }
    }

    /// Route requests to `backend` instead of the default
    #[must_use]
    pub fn with_backend(mut self, backend: Option<String>) -> Self {
        self.backend = backend;
        self
    }

    fn backend_id(&self) -> &str {
        self.backend
            .as_deref()
            .unwrap_or_else(|| self.service.default_backend())
    }
}

#[async_trait]
impl ChatTransport for InProcessTransport {
    async fn stream_chat(
        &self,
        turns: &[Turn],
        cancel: CancellationToken,
    ) -> Result<Box<dyn FragmentSource>, GatewayError> {
        let stream = self
            .service
            .complete_streaming(turns, self.backend_id(), cancel)
            .await?;
        Ok(Box::new(stream))
    }

    async fn stream_prompt(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<Box<dyn FragmentSource>, GatewayError> {
        let stream = self
            .service
            .complete_prompt(prompt, self.backend_id(), cancel)
            .await?;
        Ok(Box::new(stream))
    }
}
