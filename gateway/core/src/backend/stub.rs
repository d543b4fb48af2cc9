//! Scripted Backend
//!
//! A backend that replays a fixed list of fragments, optionally followed by
//! a failure. It backs the `demo` identifier so a gateway can be exercised
//! without any model server. It counts the streams it opens so tests can
//! check which backend a request reached; tests that also need the
//! conversations themselves turn on [`StubBackend::recording`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::traits::{BackendConfig, CompletionBackend, StreamingToken, STREAM_CHANNEL_CAPACITY};
use crate::messages::Turn;

/// How a scripted stream ends once its fragments are exhausted
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StubEnding {
    /// Send `Complete`
    Complete,
    /// Send `Error` with this message
    Fail(String),
    /// Keep the stream open until the consumer goes away
    Hang,
}

/// Backend that streams scripted fragments
#[derive(Clone, Debug)]
pub struct StubBackend {
    name: String,
    fragments: Vec<String>,
    ending: StubEnding,
    token_delay: Duration,
    request_count: Arc<AtomicUsize>,
    recorded: Option<Arc<Mutex<Vec<Vec<Turn>>>>>,
}

impl StubBackend {
    /// Stream `fragments`, then complete
    pub fn new<I, S>(fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: "Stub".to_string(),
            fragments: fragments.into_iter().map(Into::into).collect(),
            ending: StubEnding::Complete,
            token_delay: Duration::ZERO,
            request_count: Arc::new(AtomicUsize::new(0)),
            recorded: None,
        }
    }

    /// Create from `BackendConfig`
    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Option<Self> {
        match config {
            BackendConfig::Stub {
                fragments,
                fail_with,
            } => {
                let stub = Self::new(fragments.clone());
                Some(match fail_with {
                    Some(message) => stub.failing_with(message.clone()),
                    None => stub,
                })
            }
            _ => None,
        }
    }

    /// Set the reported backend name
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Fail with `message` after the fragments
    #[must_use]
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.ending = StubEnding::Fail(message.into());
        self
    }

    /// Never finish after the fragments
    #[must_use]
    pub fn hanging(mut self) -> Self {
        self.ending = StubEnding::Hang;
        self
    }

    /// Wait this long before each fragment
    #[must_use]
    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = delay;
        self
    }

    /// Keep a copy of every conversation received
    #[must_use]
    pub fn recording(mut self) -> Self {
        self.recorded = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    /// Number of streams requested so far
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::SeqCst)
    }

    /// Conversations received so far, oldest first
    ///
    /// Always empty unless the stub was built with [`recording`](Self::recording).
    #[must_use]
    pub fn requests(&self) -> Vec<Vec<Turn>> {
        self.recorded
            .as_ref()
            .map(|recorded| recorded.lock().clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CompletionBackend for StubBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn stream_complete(
        &self,
        conversation: &[Turn],
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        self.request_count.fetch_add(1, Ordering::SeqCst);
        if let Some(ref recorded) = self.recorded {
            recorded.lock().push(conversation.to_vec());
        }

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        let fragments = self.fragments.clone();
        let ending = self.ending.clone();
        let delay = self.token_delay;

        tokio::spawn(async move {
            for fragment in &fragments {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(StreamingToken::Token(fragment.clone())).await.is_err() {
                    return;
                }
            }

            match ending {
                StubEnding::Complete => {
                    let _ = tx
                        .send(StreamingToken::Complete {
                            message: fragments.concat(),
                        })
                        .await;
                }
                StubEnding::Fail(message) => {
                    let _ = tx.send(StreamingToken::Error(message)).await;
                }
                StubEnding::Hang => tx.closed().await,
            }
        });

        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn drain(mut rx: mpsc::Receiver<StreamingToken>) -> Vec<StreamingToken> {
        let mut tokens = Vec::new();
        while let Some(token) = rx.recv().await {
            tokens.push(token);
        }
        tokens
    }

    #[tokio::test]
    async fn test_stub_replays_fragments() {
        let stub = StubBackend::new(["Hel", "lo"]).recording();
        let rx = stub.stream_complete(&[Turn::user("hi")]).await.unwrap();

        assert_eq!(
            drain(rx).await,
            vec![
                StreamingToken::Token("Hel".into()),
                StreamingToken::Token("lo".into()),
                StreamingToken::Complete {
                    message: "Hello".into()
                },
            ]
        );
        assert_eq!(stub.request_count(), 1);
        assert_eq!(stub.requests()[0], vec![Turn::user("hi")]);
    }

    #[tokio::test]
    async fn test_stub_failure_after_fragments() {
        let stub = StubBackend::new(["Hi"]).failing_with("provider exploded");
        let rx = stub.stream_complete(&[]).await.unwrap();

        assert_eq!(
            drain(rx).await,
            vec![
                StreamingToken::Token("Hi".into()),
                StreamingToken::Error("provider exploded".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stub_from_config() {
        let config = BackendConfig::Stub {
            fragments: vec!["a".into()],
            fail_with: Some("nope".into()),
        };
        let stub = StubBackend::from_config(&config).unwrap();
        assert_eq!(stub.ending, StubEnding::Fail("nope".into()));
        assert!(StubBackend::from_config(&BackendConfig::default()).is_none());
    }

    #[tokio::test]
    async fn test_configured_stub_counts_without_keeping_conversations() {
        let stub = StubBackend::from_config(&BackendConfig::stub(["4"])).unwrap();
        for _ in 0..100 {
            let rx = stub.stream_complete(&[Turn::user("2+2?")]).await.unwrap();
            drain(rx).await;
        }

        assert_eq!(stub.request_count(), 100);
        assert!(stub.recorded.is_none());
        assert!(stub.requests().is_empty());
    }
}
