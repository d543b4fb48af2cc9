//! Streaming Completion Service
//!
//! Validates a conversation, selects a backend and relays the backend's
//! fragments. Everything that can be rejected is rejected before the backend
//! sees the request.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::backend::CompletionBackend;
use crate::conversation::validate;
use crate::error::GatewayError;
use crate::messages::Turn;
use crate::routing::BackendRegistry;
use crate::streaming::FragmentStream;

/// Routes conversations to registered backends
#[derive(Clone, Debug)]
pub struct CompletionService {
    registry: Arc<BackendRegistry>,
    default_backend: String,
}

impl CompletionService {
    /// Create a service over a registry
    ///
    /// `default_backend` is used by the `*_default` entry points; it is not
    /// checked here (configuration validation does that).
    pub fn new(registry: Arc<BackendRegistry>, default_backend: impl Into<String>) -> Self {
        Self {
            registry,
            default_backend: default_backend.into(),
        }
    }

    /// The registry requests are routed through
    #[must_use]
    pub fn registry(&self) -> &Arc<BackendRegistry> {
        &self.registry
    }

    /// Identifier used when a request names no backend
    #[must_use]
    pub fn default_backend(&self) -> &str {
        &self.default_backend
    }

    /// Stream the reply to a conversation
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Validation`] if the conversation is malformed
    /// - [`GatewayError::UnknownBackend`] if `backend_id` is not registered
    /// - [`GatewayError::StreamFailure`] if the backend refuses the request
    /// - [`GatewayError::Cancelled`] if `cancel` fires before streaming starts
    ///
    /// Failures after streaming starts are reported by the returned stream.
    pub async fn complete_streaming(
        &self,
        turns: &[Turn],
        backend_id: &str,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, GatewayError> {
        validate(turns)?;
        let backend = self.registry.select(backend_id)?;
        open_stream(backend.as_ref(), backend_id, turns, cancel).await
    }

    /// Stream the reply to a single prompt
    ///
    /// The prompt is sent as one user turn without conversation validation.
    ///
    /// # Errors
    ///
    /// As [`complete_streaming`](Self::complete_streaming), minus validation.
    pub async fn complete_prompt(
        &self,
        prompt: &str,
        backend_id: &str,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, GatewayError> {
        let backend = self.registry.select(backend_id)?;
        open_stream(backend.as_ref(), backend_id, &[Turn::user(prompt)], cancel).await
    }

    /// [`complete_streaming`](Self::complete_streaming) on the default backend
    ///
    /// # Errors
    ///
    /// See [`complete_streaming`](Self::complete_streaming).
    pub async fn complete_streaming_default(
        &self,
        turns: &[Turn],
        cancel: CancellationToken,
    ) -> Result<FragmentStream, GatewayError> {
        self.complete_streaming(turns, &self.default_backend, cancel)
            .await
    }

    /// [`complete_prompt`](Self::complete_prompt) on the default backend
    ///
    /// # Errors
    ///
    /// See [`complete_prompt`](Self::complete_prompt).
    pub async fn complete_prompt_default(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<FragmentStream, GatewayError> {
        self.complete_prompt(prompt, &self.default_backend, cancel)
            .await
    }
}

async fn open_stream(
    backend: &dyn CompletionBackend,
    backend_id: &str,
    turns: &[Turn],
    cancel: CancellationToken,
) -> Result<FragmentStream, GatewayError> {
    tracing::debug!(backend = %backend_id, turns = turns.len(), "Starting completion");

    let rx = tokio::select! {
        biased;
        () = cancel.cancelled() => return Err(GatewayError::Cancelled),
        result = backend.stream_complete(turns) => result.map_err(|e| {
            tracing::warn!(backend = %backend_id, error = %e, "Backend refused completion");
            GatewayError::StreamFailure(format!("{e:#}"))
        })?,
    };

    Ok(FragmentStream::new(rx, cancel))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::StubBackend;
    use crate::error::ValidationError;
    use crate::messages::{Fragment, Role};

    fn conversation(input: &str) -> Vec<Turn> {
        vec![Turn::system("You are a helpful assistant."), Turn::user(input)]
    }

    fn service_with(id: &str, stub: StubBackend) -> CompletionService {
        let registry = BackendRegistry::new().with(id, Arc::new(stub));
        CompletionService::new(Arc::new(registry), id)
    }

    #[tokio::test]
    async fn test_demo_backend_answers() {
        let service = service_with("demo", StubBackend::new(["4"]));

        let mut stream = service
            .complete_streaming(&conversation("2+2?"), "demo", CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), Fragment::assistant("4"));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_fragments_arrive_in_order() {
        let service = service_with("demo", StubBackend::new(["Hel", "lo"]));

        let stream = service
            .complete_streaming_default(&conversation("hi"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stream.collect_text().await.unwrap(), "Hello");
    }

    #[tokio::test]
    async fn test_failure_after_partial_reply() {
        let service = service_with("demo", StubBackend::new(["Hi"]).failing_with("upstream 500"));

        let mut stream = service
            .complete_streaming(&conversation("hi"), "demo", CancellationToken::new())
            .await
            .unwrap();

        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.text, "Hi");
        assert!(matches!(
            stream.next().await,
            Some(Err(GatewayError::StreamFailure(ref reason))) if reason == "upstream 500"
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_backend_rejected_before_io() {
        let stub = StubBackend::new(["4"]);
        let service = service_with("demo", stub.clone());

        let result = service
            .complete_streaming(&conversation("hi"), "ghost", CancellationToken::new())
            .await;

        assert!(matches!(result, Err(GatewayError::UnknownBackend(ref id)) if id == "ghost"));
        assert_eq!(stub.request_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_conversation_rejected_before_io() {
        let stub = StubBackend::new(["4"]);
        let service = service_with("demo", stub.clone());
        let cancel = CancellationToken::new();

        let cases = [
            (vec![Turn::system("s")], ValidationError::TooFewTurns { count: 1 }),
            (
                vec![Turn::user("u"), Turn::user("u")],
                ValidationError::MissingLeadingSystemTurn,
            ),
            (
                vec![Turn::system("s"), Turn::assistant("a")],
                ValidationError::MissingFollowingUserTurn,
            ),
        ];

        for (turns, expected) in cases {
            match service.complete_streaming(&turns, "demo", cancel.clone()).await {
                Err(GatewayError::Validation(actual)) => assert_eq!(actual, expected),
                other => panic!("expected {expected:?}, got {other:?}"),
            }
        }
        // Validation runs before selection
        let result = service
            .complete_streaming(&[Turn::system("s")], "ghost", cancel)
            .await;
        assert!(matches!(result, Err(GatewayError::Validation(_))));
        assert_eq!(stub.request_count(), 0);
    }

    #[tokio::test]
    async fn test_selected_backend_is_the_one_invoked() {
        let local = StubBackend::new(["local"]).named("local");
        let cloud = StubBackend::new(["cloud"]).named("cloud").recording();
        let registry = BackendRegistry::new()
            .with("local", Arc::new(local.clone()))
            .with("cloud", Arc::new(cloud.clone()));
        let service = CompletionService::new(Arc::new(registry), "local");

        let text = service
            .complete_streaming(&conversation("hi"), "cloud", CancellationToken::new())
            .await
            .unwrap()
            .collect_text()
            .await
            .unwrap();

        assert_eq!(text, "cloud");
        assert_eq!(cloud.request_count(), 1);
        assert_eq!(local.request_count(), 0);
        assert_eq!(cloud.requests()[0], conversation("hi"));
    }

    #[tokio::test]
    async fn test_prompt_skips_validation() {
        let stub = StubBackend::new(["ok"]).recording();
        let service = service_with("demo", stub.clone());

        let text = service
            .complete_prompt_default("just this", CancellationToken::new())
            .await
            .unwrap()
            .collect_text()
            .await
            .unwrap();

        assert_eq!(text, "ok");
        let sent = &stub.requests()[0];
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].role, Role::User);
        assert_eq!(sent[0].content, "just this");
    }

    #[tokio::test]
    async fn test_cancellation_is_distinct_from_failure() {
        let stub = StubBackend::new(["a"]).hanging();
        let service = service_with("demo", stub);
        let cancel = CancellationToken::new();

        let mut stream = service
            .complete_streaming(&conversation("hi"), "demo", cancel.clone())
            .await
            .unwrap();
        assert!(stream.next().await.unwrap().is_ok());

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let last = stream.next().await;
        assert!(matches!(last, Some(Err(GatewayError::Cancelled))), "{last:?}");
    }

    #[tokio::test]
    async fn test_already_cancelled_never_reaches_backend() {
        let stub = StubBackend::new(["a"]);
        let service = service_with("demo", stub.clone());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = service.complete_streaming(&conversation("hi"), "demo", cancel).await;
        assert!(matches!(result, Err(GatewayError::Cancelled)));
        assert_eq!(stub.request_count(), 0);
    }
}
