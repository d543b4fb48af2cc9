//! Gateway Client
//!
//! Connects to a gateway daemon and streams completions from it. One
//! connection carries any number of requests; a dispatch task routes each
//! inbound frame to the stream waiting for its request ID.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{connect, spawn_frame_io, FRAME_CHANNEL_CAPACITY};
use crate::conversation::validate;
use crate::error::GatewayError;
use crate::messages::{Fragment, RequestId, Turn};
use crate::streaming::FragmentSource;
use crate::transport::config::{Endpoint, TransportConfig};
use crate::transport::protocol::{ClientFrame, ServerFrame};
use crate::transport::traits::ChatTransport;
use crate::transport::TransportError;

type PendingMap = Arc<DashMap<RequestId, mpsc::Sender<ServerFrame>>>;

/// Client connection to a gateway daemon
#[derive(Debug)]
pub struct GatewayClient {
    endpoint: Endpoint,
    backend: Option<String>,
    outbound: mpsc::Sender<ClientFrame>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
}

impl GatewayClient {
    /// Connect to the gateway at `endpoint`
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if nothing is listening there.
    pub async fn connect(endpoint: &Endpoint) -> Result<Self, TransportError> {
        let (read, write) = connect(endpoint).await?;
        let (mut inbound, outbound) =
            spawn_frame_io::<ServerFrame, ClientFrame>(read, write, endpoint.to_string());

        let pending: PendingMap = Arc::new(DashMap::new());
        let connected = Arc::new(AtomicBool::new(true));

        // Dispatch task: inbound frames -> per-request channels
        let dispatch_pending = Arc::clone(&pending);
        let dispatch_connected = Arc::clone(&connected);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                let request_id = frame.request_id().clone();
                let terminal = frame.is_terminal();

                let Some(tx) = dispatch_pending
                    .get(&request_id)
                    .map(|entry| entry.value().clone())
                else {
                    tracing::debug!(%request_id, "Frame for an unknown request");
                    continue;
                };
                if terminal {
                    dispatch_pending.remove(&request_id);
                }
                if tx.send(frame).await.is_err() {
                    dispatch_pending.remove(&request_id);
                }
            }

            // Streams still waiting see their channel close
            dispatch_connected.store(false, Ordering::SeqCst);
            dispatch_pending.clear();
            tracing::info!("Disconnected from gateway");
        });

        tracing::info!(%endpoint, "Connected to gateway");

        Ok(Self {
            endpoint: endpoint.clone(),
            backend: None,
            outbound,
            pending,
            connected,
        })
    }

    /// Connect using a transport configuration, honouring its timeout
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the gateway is unreachable or does not accept
    /// within the timeout.
    pub async fn connect_with(config: &TransportConfig) -> Result<Self, TransportError> {
        Self::connect_timeout(&config.endpoint, config.connect_timeout()).await
    }

    /// Connect, giving up after `timeout`
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` on failure or timeout.
    pub async fn connect_timeout(
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        tokio::time::timeout(timeout, Self::connect(endpoint))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "Timed out after {}ms connecting to {endpoint}",
                    timeout.as_millis()
                ))
            })?
    }

    /// Ask the gateway for `backend` instead of its default
    #[must_use]
    pub fn with_backend(mut self, backend: Option<String>) -> Self {
        self.backend = backend;
        self
    }

    /// The gateway address
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether the connection is still up
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Stream the reply to a conversation
    ///
    /// The conversation is validated before anything is sent. An unknown
    /// backend can only be detected by the gateway, so that rejection
    /// arrives as the stream's first item.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed conversation, `Transport` if the
    /// connection is gone.
    pub async fn chat(
        &self,
        turns: &[Turn],
        cancel: CancellationToken,
    ) -> Result<RemoteFragmentStream, GatewayError> {
        validate(turns)?;
        let request_id = RequestId::new();
        let frame = ClientFrame::chat(request_id.clone(), self.backend.clone(), turns);
        self.start(request_id, frame, cancel).await
    }

    /// Stream the reply to a single prompt
    ///
    /// # Errors
    ///
    /// `Transport` if the connection is gone.
    pub async fn prompt(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<RemoteFragmentStream, GatewayError> {
        let request_id = RequestId::new();
        let frame = ClientFrame::Prompt {
            request_id: request_id.clone(),
            backend: self.backend.clone(),
            prompt: prompt.to_string(),
        };
        self.start(request_id, frame, cancel).await
    }

    async fn start(
        &self,
        request_id: RequestId,
        frame: ClientFrame,
        cancel: CancellationToken,
    ) -> Result<RemoteFragmentStream, GatewayError> {
        let (tx, rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);

        // Register before checking the flag: the dispatch task clears the
        // map only after clearing the flag
        self.pending.insert(request_id.clone(), tx);
        if !self.is_connected() {
            self.pending.remove(&request_id);
            return Err(TransportError::ConnectionClosed.into());
        }

        if self.outbound.send(frame).await.is_err() {
            self.pending.remove(&request_id);
            return Err(TransportError::ConnectionClosed.into());
        }

        tracing::debug!(%request_id, "Request sent");
        Ok(RemoteFragmentStream {
            request_id,
            rx,
            cancel,
            outbound: self.outbound.clone(),
            pending: Arc::clone(&self.pending),
            finished: false,
        })
    }
}

#[async_trait]
impl ChatTransport for GatewayClient {
    async fn stream_chat(
        &self,
        turns: &[Turn],
        cancel: CancellationToken,
    ) -> Result<Box<dyn FragmentSource>, GatewayError> {
        Ok(Box::new(self.chat(turns, cancel).await?))
    }

    async fn stream_prompt(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<Box<dyn FragmentSource>, GatewayError> {
        Ok(Box::new(self.prompt(prompt, cancel).await?))
    }
}

/// Fragments of one request, received from the gateway
///
/// Cancelling the token (or dropping the stream before it ends) sends a
/// `Cancel` frame so the gateway stops the backend.
#[derive(Debug)]
pub struct RemoteFragmentStream {
    request_id: RequestId,
    rx: mpsc::Receiver<ServerFrame>,
    cancel: CancellationToken,
    outbound: mpsc::Sender<ClientFrame>,
    pending: PendingMap,
    finished: bool,
}

impl RemoteFragmentStream {
    /// The request this stream belongs to
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Wait for the next fragment
    ///
    /// Same contract as [`FragmentStream::next`](crate::streaming::FragmentStream::next).
    /// A connection that drops before the end marker yields `StreamFailure`.
    pub async fn next(&mut self) -> Option<Result<Fragment, GatewayError>> {
        if self.finished {
            return None;
        }

        let item = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                self.abandon();
                Some(Err(GatewayError::Cancelled))
            }
            frame = self.rx.recv() => match frame {
                Some(ServerFrame::Fragment { fragment, .. }) => return Some(Ok(fragment)),
                Some(ServerFrame::End { .. }) => None,
                Some(ServerFrame::Error { kind, message, .. }) => Some(Err(kind.into_error(message))),
                Some(ServerFrame::Cancelled { .. }) => Some(Err(GatewayError::Cancelled)),
                None => Some(Err(GatewayError::StreamFailure(
                    "connection to gateway closed before the reply ended".to_string(),
                ))),
            },
        };

        self.finished = true;
        item
    }

    /// Tell the gateway to stop and forget this request
    fn abandon(&mut self) {
        self.pending.remove(&self.request_id);
        let cancel = ClientFrame::Cancel {
            request_id: self.request_id.clone(),
        };
        if self.outbound.try_send(cancel).is_err() {
            tracing::debug!(request_id = %self.request_id, "Could not send cancel frame");
        }
    }
}

impl Drop for RemoteFragmentStream {
    fn drop(&mut self) {
        if !self.finished {
            self.abandon();
        }
    }
}

#[async_trait]
impl FragmentSource for RemoteFragmentStream {
    async fn next_fragment(&mut self) -> Option<Result<Fragment, GatewayError>> {
        self.next().await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_connect_no_server() {
        let temp_dir = TempDir::new().unwrap();
        let endpoint = Endpoint::Unix(temp_dir.path().join("nonexistent.sock"));

        let result = GatewayClient::connect(&endpoint).await;
        assert!(matches!(result, Err(TransportError::ConnectionFailed(_))));
    }

    #[tokio::test]
    async fn test_connection_drop_is_stream_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("gw.sock");
        let listener = tokio::net::UnixListener::bind(&path).unwrap();

        // A "gateway" that accepts and hangs up without answering
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(stream);
        });

        let client = GatewayClient::connect(&Endpoint::Unix(path)).await.unwrap();
        let mut stream = client
            .prompt("hello?", CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(
            stream.next().await,
            Some(Err(GatewayError::StreamFailure(_)))
        ));
        assert!(stream.next().await.is_none());
        server.await.unwrap();
    }
}
