//! Gateway Server
//!
//! Accepts client connections and streams completions back over them. Each
//! connection gets its own handler task; within a connection, requests are
//! served one at a time in arrival order.

use std::collections::VecDeque;
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{spawn_frame_io, BoxedRead, BoxedWrite, MAX_QUEUED_REQUESTS};
use crate::error::GatewayError;
use crate::messages::{RequestId, Turn};
use crate::service::CompletionService;
use crate::streaming::FragmentStream;
use crate::transport::config::Endpoint;
use crate::transport::protocol::{ClientFrame, ServerFrame, WireTurn};
use crate::transport::TransportError;

enum Listener {
    #[cfg(unix)]
    Unix(UnixListener),
    Tcp(TcpListener),
}

impl Listener {
    async fn accept(&self) -> std::io::Result<(BoxedRead, BoxedWrite, String)> {
        match self {
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _addr) = listener.accept().await?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write), "unix".to_string()))
            }
            Self::Tcp(listener) => {
                let (stream, addr) = listener.accept().await?;
                stream.set_nodelay(true)?;
                let (read, write) = stream.into_split();
                Ok((Box::new(read), Box::new(write), addr.to_string()))
            }
        }
    }
}

/// Socket server for the completion service
pub struct GatewayServer {
    endpoint: Endpoint,
    service: Arc<CompletionService>,
    shutdown: CancellationToken,
    listener: Option<Listener>,
    /// Socket file this server created, removed again on drop
    socket_file: Option<PathBuf>,
}

impl GatewayServer {
    /// Create a server; nothing is bound until [`bind`](Self::bind) or
    /// [`run`](Self::run)
    pub fn new(endpoint: Endpoint, service: Arc<CompletionService>) -> Self {
        Self {
            endpoint,
            service,
            shutdown: CancellationToken::new(),
            listener: None,
            socket_file: None,
        }
    }

    /// Token that stops the server and cancels every in-flight request
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// The address clients should connect to
    ///
    /// After binding a TCP endpoint with port 0, this is the actual port.
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Start listening
    ///
    /// For Unix sockets the parent directory is created if needed, a stale
    /// socket file is replaced, and the new socket gets mode 0600.
    ///
    /// # Errors
    ///
    /// Fails if the address cannot be bound.
    pub async fn bind(&mut self) -> Result<(), TransportError> {
        if self.listener.is_some() {
            return Err(TransportError::InvalidState("Already listening".to_string()));
        }

        match &self.endpoint {
            #[cfg(unix)]
            Endpoint::Unix(path) => {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        std::io::Error::new(
                            e.kind(),
                            format!("Failed to create directory {}: {e}", parent.display()),
                        )
                    })?;
                }
                if path.exists() {
                    std::fs::remove_file(path).map_err(|e| {
                        std::io::Error::new(
                            e.kind(),
                            format!("Failed to remove old socket {}: {e}", path.display()),
                        )
                    })?;
                }

                let listener = UnixListener::bind(path)?;
                std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;

                self.socket_file = Some(path.clone());
                self.listener = Some(Listener::Unix(listener));
            }
            Endpoint::Tcp(addr) => {
                let listener = TcpListener::bind(addr.as_str()).await?;
                self.endpoint = Endpoint::Tcp(listener.local_addr()?.to_string());
                self.listener = Some(Listener::Tcp(listener));
            }
        }

        tracing::info!(endpoint = %self.endpoint, "Gateway listening");
        Ok(())
    }

    /// Accept connections until the shutdown token fires
    ///
    /// On shutdown, in-flight requests are cancelled (their clients receive
    /// a `Cancelled` frame) and every handler is awaited before returning.
    ///
    /// # Errors
    ///
    /// Fails only if binding fails.
    pub async fn run(mut self) -> Result<(), TransportError> {
        if self.listener.is_none() {
            self.bind().await?;
        }
        let Some(listener) = self.listener.take() else {
            return Err(TransportError::InvalidState("Not listening".to_string()));
        };

        let mut connections = JoinSet::new();
        let mut next_conn_id: u64 = 0;

        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((read, write, peer)) => {
                        next_conn_id += 1;
                        let span = tracing::info_span!("connection", conn = next_conn_id, %peer);
                        let handler = ConnectionHandler::new(
                            Arc::clone(&self.service),
                            self.shutdown.clone(),
                            read,
                            write,
                            next_conn_id,
                        );
                        connections.spawn(handler.run().instrument(span));
                    }
                    Err(e) => tracing::warn!(error = %e, "Accept failed"),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }

        drop(listener);
        tracing::info!(open = connections.len(), "Gateway shutting down");
        while connections.join_next().await.is_some() {}
        Ok(())
    }
}

impl Drop for GatewayServer {
    fn drop(&mut self) {
        if let Some(path) = self.socket_file.take() {
            std::fs::remove_file(path).ok();
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Disconnect,
}

enum Request {
    Chat {
        backend: Option<String>,
        turns: Vec<WireTurn>,
    },
    Prompt {
        backend: Option<String>,
        prompt: String,
    },
}

async fn open_stream(
    service: &CompletionService,
    request: Request,
    cancel: CancellationToken,
) -> Result<FragmentStream, GatewayError> {
    match request {
        Request::Chat { backend, turns } => {
            let turns = turns
                .into_iter()
                .map(Turn::try_from)
                .collect::<Result<Vec<_>, _>>()?;
            let backend = backend.as_deref().unwrap_or(service.default_backend());
            service.complete_streaming(&turns, backend, cancel).await
        }
        Request::Prompt { backend, prompt } => {
            let backend = backend.as_deref().unwrap_or(service.default_backend());
            service.complete_prompt(&prompt, backend, cancel).await
        }
    }
}

/// Serves the requests of one connection
struct ConnectionHandler {
    service: Arc<CompletionService>,
    shutdown: CancellationToken,
    inbound: mpsc::Receiver<ClientFrame>,
    outbound: mpsc::Sender<ServerFrame>,
    /// Requests that arrived while another was streaming
    queued: VecDeque<ClientFrame>,
}

impl ConnectionHandler {
    fn new(
        service: Arc<CompletionService>,
        shutdown: CancellationToken,
        read: BoxedRead,
        write: BoxedWrite,
        conn_id: u64,
    ) -> Self {
        let (inbound, outbound) = spawn_frame_io(read, write, conn_id);
        Self {
            service,
            shutdown,
            inbound,
            outbound,
            queued: VecDeque::new(),
        }
    }

    async fn run(mut self) {
        tracing::info!("Client connected");

        loop {
            let frame = match self.queued.pop_front() {
                Some(frame) => frame,
                None => tokio::select! {
                    biased;
                    () = self.shutdown.cancelled() => break,
                    frame = self.inbound.recv() => match frame {
                        Some(frame) => frame,
                        None => break,
                    },
                },
            };
            if self.serve(frame).await == Flow::Disconnect {
                break;
            }
        }

        // Anything still queued will never run
        for frame in std::mem::take(&mut self.queued) {
            let request_id = frame.request_id().clone();
            if self.send(ServerFrame::Cancelled { request_id }).await == Flow::Disconnect {
                break;
            }
        }

        tracing::info!("Client disconnected");
    }

    async fn serve(&mut self, frame: ClientFrame) -> Flow {
        let (request_id, request) = match frame {
            ClientFrame::Cancel { request_id } => {
                tracing::debug!(%request_id, "Cancel for a request that is not running");
                return Flow::Continue;
            }
            ClientFrame::Chat {
                request_id,
                backend,
                turns,
            } => (request_id, Request::Chat { backend, turns }),
            ClientFrame::Prompt {
                request_id,
                backend,
                prompt,
            } => (request_id, Request::Prompt { backend, prompt }),
        };

        let span = tracing::debug_span!("request", %request_id);
        self.stream_request(request_id, request)
            .instrument(span)
            .await
    }

    async fn stream_request(&mut self, request_id: RequestId, request: Request) -> Flow {
        let cancel = self.shutdown.child_token();
        let service = Arc::clone(&self.service);
        let open = open_stream(&service, request, cancel.clone());
        tokio::pin!(open);

        // Keep reading frames while the backend connects, so a Cancel can
        // interrupt it
        let opened = loop {
            tokio::select! {
                biased;
                frame = self.inbound.recv() => {
                    if self.route_inbound(frame, &request_id, &cancel).await == Flow::Disconnect {
                        return Flow::Disconnect;
                    }
                }
                result = &mut open => break result,
            }
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                tracing::info!(error = %e, "Request rejected");
                return self.send(ServerFrame::failure(request_id, &e)).await;
            }
        };

        loop {
            tokio::select! {
                biased;
                frame = self.inbound.recv() => {
                    if self.route_inbound(frame, &request_id, &cancel).await == Flow::Disconnect {
                        return Flow::Disconnect;
                    }
                }
                item = stream.next() => {
                    let frame = match item {
                        Some(Ok(fragment)) => ServerFrame::Fragment {
                            request_id: request_id.clone(),
                            fragment,
                        },
                        Some(Err(e)) => {
                            tracing::info!(error = %e, fragments = stream.delivered(), "Stream ended early");
                            ServerFrame::failure(request_id.clone(), &e)
                        }
                        None => {
                            tracing::debug!(fragments = stream.delivered(), "Stream complete");
                            ServerFrame::End {
                                request_id: request_id.clone(),
                            }
                        }
                    };

                    let terminal = frame.is_terminal();
                    if self.send(frame).await == Flow::Disconnect {
                        return Flow::Disconnect;
                    }
                    if terminal {
                        return Flow::Continue;
                    }
                }
            }
        }
    }

    /// Handle a frame that arrived while `current` is in flight
    async fn route_inbound(
        &mut self,
        frame: Option<ClientFrame>,
        current: &RequestId,
        cancel: &CancellationToken,
    ) -> Flow {
        match frame {
            None => {
                cancel.cancel();
                Flow::Disconnect
            }
            Some(ClientFrame::Cancel { request_id }) if &request_id == current => {
                tracing::debug!("Cancel requested");
                cancel.cancel();
                Flow::Continue
            }
            Some(ClientFrame::Cancel { request_id }) => {
                let position = self
                    .queued
                    .iter()
                    .position(|queued| queued.request_id() == &request_id);
                match position {
                    Some(index) => {
                        self.queued.remove(index);
                        self.send(ServerFrame::Cancelled { request_id }).await
                    }
                    None => {
                        tracing::debug!(%request_id, "Cancel for an unknown request");
                        Flow::Continue
                    }
                }
            }
            Some(request) if self.queued.len() >= MAX_QUEUED_REQUESTS => {
                let request_id = request.request_id().clone();
                tracing::warn!(%request_id, queued = self.queued.len(), "Request queue full");
                let busy = GatewayError::StreamFailure(format!(
                    "gateway busy: {MAX_QUEUED_REQUESTS} requests already queued on this connection"
                ));
                self.send(ServerFrame::failure(request_id, &busy)).await
            }
            Some(request) => {
                self.queued.push_back(request);
                Flow::Continue
            }
        }
    }

    async fn send(&self, frame: ServerFrame) -> Flow {
        match self.outbound.send(frame).await {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Disconnect,
        }
    }
}
