//! Fragment Stream
//!
//! Turns a backend's token channel into a sequence of [`Fragment`]s with
//! explicit end, failure and cancellation outcomes.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::StreamingToken;
use crate::error::GatewayError;
use crate::messages::Fragment;

/// A pull-based sequence of fragments
///
/// `next_fragment` yields `Some(Ok(_))` per fragment, then either `None`
/// (normal end) or one `Some(Err(_))` (failure or cancellation). Once a
/// terminal item has been returned, every later call returns `None`.
#[async_trait]
pub trait FragmentSource: Send {
    /// Wait for the next fragment
    async fn next_fragment(&mut self) -> Option<Result<Fragment, GatewayError>>;
}

/// Fragments relayed straight from a backend
///
/// No buffering, batching or reordering happens here: each token is mapped
/// to an assistant fragment as it is received. Dropping the stream drops the
/// backend receiver, which stops the backend's producer task.
#[derive(Debug)]
pub struct FragmentStream {
    rx: mpsc::Receiver<StreamingToken>,
    cancel: CancellationToken,
    finished: bool,
    delivered: usize,
}

impl FragmentStream {
    /// Wrap a backend receiver
    #[must_use]
    pub fn new(rx: mpsc::Receiver<StreamingToken>, cancel: CancellationToken) -> Self {
        Self {
            rx,
            cancel,
            finished: false,
            delivered: 0,
        }
    }

    /// Wait for the next fragment
    ///
    /// Cancellation is checked first, so a token that fires while fragments
    /// are queued still stops delivery immediately.
    pub async fn next(&mut self) -> Option<Result<Fragment, GatewayError>> {
        if self.finished {
            return None;
        }

        let item = tokio::select! {
            biased;
            () = self.cancel.cancelled() => Some(Err(GatewayError::Cancelled)),
            token = self.rx.recv() => match token {
                Some(StreamingToken::Token(text)) => {
                    self.delivered += 1;
                    return Some(Ok(Fragment::assistant(text)));
                }
                Some(StreamingToken::Complete { .. }) => None,
                Some(StreamingToken::Error(e)) => Some(Err(GatewayError::StreamFailure(e))),
                None => Some(Err(GatewayError::StreamFailure(
                    "backend stream closed without completing".to_string(),
                ))),
            },
        };

        self.finished = true;
        match &item {
            None => tracing::debug!(fragments = self.delivered, "Fragment stream complete"),
            Some(Err(e)) => {
                tracing::debug!(fragments = self.delivered, error = %e, "Fragment stream ended early");
            }
            Some(Ok(_)) => {}
        }
        item
    }

    /// Number of fragments delivered so far
    #[must_use]
    pub fn delivered(&self) -> usize {
        self.delivered
    }

    /// Whether a terminal item has been returned
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Drain the stream, concatenating fragment text
    ///
    /// # Errors
    ///
    /// Returns the terminal error together with the text collected before
    /// it, so partial output is never lost.
    pub async fn collect_text(mut self) -> Result<String, (String, GatewayError)> {
        let mut text = String::new();
        while let Some(item) = self.next().await {
            match item {
                Ok(fragment) => text.push_str(&fragment.text),
                Err(e) => return Err((text, e)),
            }
        }
        Ok(text)
    }
}

#[async_trait]
impl FragmentSource for FragmentStream {
    async fn next_fragment(&mut self) -> Option<Result<Fragment, GatewayError>> {
        self.next().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(tokens: Vec<StreamingToken>) -> (FragmentStream, CancellationToken) {
        let (tx, rx) = mpsc::channel(tokens.len().max(1));
        for token in tokens {
            tx.try_send(token).unwrap();
        }
        let cancel = CancellationToken::new();
        (FragmentStream::new(rx, cancel.clone()), cancel)
    }

    #[tokio::test]
    async fn test_fragments_in_order_then_end() {
        let (mut stream, _cancel) = stream_of(vec![
            StreamingToken::Token("Hel".into()),
            StreamingToken::Token("lo".into()),
            StreamingToken::Complete {
                message: "Hello".into(),
            },
        ]);

        assert_eq!(stream.next().await.unwrap().unwrap(), Fragment::assistant("Hel"));
        assert_eq!(stream.next().await.unwrap().unwrap(), Fragment::assistant("lo"));
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());
        assert_eq!(stream.delivered(), 2);
    }

    #[tokio::test]
    async fn test_partial_then_failure() {
        let (stream, _cancel) = stream_of(vec![
            StreamingToken::Token("Hi".into()),
            StreamingToken::Error("connection reset".into()),
        ]);

        let (partial, error) = stream.collect_text().await.unwrap_err();
        assert_eq!(partial, "Hi");
        assert!(matches!(error, GatewayError::StreamFailure(ref e) if e == "connection reset"));
    }

    #[tokio::test]
    async fn test_closed_channel_is_failure_not_end() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(StreamingToken::Token("Hi".into())).await.unwrap();
        drop(tx);

        let mut stream = FragmentStream::new(rx, CancellationToken::new());
        assert!(stream.next().await.unwrap().is_ok());
        assert!(matches!(
            stream.next().await,
            Some(Err(GatewayError::StreamFailure(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_wins_over_queued_fragments() {
        let (mut stream, cancel) = stream_of(vec![
            StreamingToken::Token("a".into()),
            StreamingToken::Token("b".into()),
        ]);

        assert!(stream.next().await.unwrap().is_ok());
        cancel.cancel();
        assert!(matches!(stream.next().await, Some(Err(GatewayError::Cancelled))));
        assert!(stream.next().await.is_none());
        assert!(stream.is_finished());
    }

    #[tokio::test]
    async fn test_cancel_while_waiting() {
        let (_tx, rx) = mpsc::channel::<StreamingToken>(1);
        let cancel = CancellationToken::new();
        let mut stream = FragmentStream::new(rx, cancel.clone());

        let waiter = tokio::spawn(async move { stream.next().await });
        cancel.cancel();

        let item = waiter.await.unwrap();
        assert!(matches!(item, Some(Err(GatewayError::Cancelled))));
    }
}
