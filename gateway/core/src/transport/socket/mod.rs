//! Socket Transport
//!
//! Gateway daemon and client over a Unix domain socket (the default) or TCP.
//!
//! # Socket Location
//!
//! Default: `$XDG_RUNTIME_DIR/chat-gateway/gateway.sock`
//! Fallback: `/tmp/chat-gateway-$UID/gateway.sock`
//!
//! Unix sockets are created with mode 0600.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐                       ┌─────────────────┐
//! │   chat client   │                       │  gateway daemon │
//! │                 │                       │                 │
//! │  GatewayClient  ├──────────────────────►│  GatewayServer  │
//! │                 │   gateway.sock / TCP  │                 │
//! │  ClientFrame ──►│                       │◄── ClientFrame  │
//! │  ◄── ServerFrame│                       │ ServerFrame ──► │
//! └─────────────────┘                       └─────────────────┘
//! ```
//!
//! Each side splits its stream into a read task (bytes → frames → channel)
//! and a write task (channel → frames → bytes). Frames are written as soon
//! as they are queued.

mod client;
mod server;

pub use client::{GatewayClient, RemoteFragmentStream};
pub use server::GatewayServer;

use std::fmt::Display;

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::config::Endpoint;
use super::frame::{encode, FrameDecoder};
use super::TransportError;

/// Frames buffered per direction per connection
const FRAME_CHANNEL_CAPACITY: usize = 100;

/// Requests a connection may have waiting behind the one being served
pub const MAX_QUEUED_REQUESTS: usize = FRAME_CHANNEL_CAPACITY;

type BoxedRead = Box<dyn AsyncRead + Send + Unpin>;
type BoxedWrite = Box<dyn AsyncWrite + Send + Unpin>;

/// Open a client connection
async fn connect(endpoint: &Endpoint) -> Result<(BoxedRead, BoxedWrite), TransportError> {
    let failed = |e: std::io::Error| {
        TransportError::ConnectionFailed(format!("Failed to connect to {endpoint}: {e}"))
    };

    match endpoint {
        #[cfg(unix)]
        Endpoint::Unix(path) => {
            let stream = tokio::net::UnixStream::connect(path).await.map_err(failed)?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
        Endpoint::Tcp(addr) => {
            let stream = tokio::net::TcpStream::connect(addr.as_str())
                .await
                .map_err(failed)?;
            stream.set_nodelay(true)?;
            let (read, write) = stream.into_split();
            Ok((Box::new(read), Box::new(write)))
        }
    }
}

/// Run the read and write halves of a connection on their own tasks
///
/// Returns the channel of decoded inbound frames and the sender for
/// outbound frames. The inbound channel closes when the peer disconnects or
/// sends a frame that cannot be decoded; dropping every outbound sender
/// closes the write half.
fn spawn_frame_io<In, Out>(
    mut read_half: BoxedRead,
    mut write_half: BoxedWrite,
    label: impl Display + Clone + Send + 'static,
) -> (mpsc::Receiver<In>, mpsc::Sender<Out>)
where
    In: DeserializeOwned + Send + 'static,
    Out: Serialize + Send + 'static,
{
    let (in_tx, in_rx) = mpsc::channel::<In>(FRAME_CHANNEL_CAPACITY);
    let (out_tx, mut out_rx) = mpsc::channel::<Out>(FRAME_CHANNEL_CAPACITY);

    // Read task: stream -> in_tx
    let read_label = label.clone();
    tokio::spawn(async move {
        let mut decoder = FrameDecoder::new();
        let mut buf = [0u8; 4096];

        'read: loop {
            match read_half.read(&mut buf).await {
                Ok(0) => {
                    tracing::debug!(conn = %read_label, "Connection closed by peer");
                    break;
                }
                Ok(n) => {
                    decoder.push(&buf[..n]);
                    loop {
                        match decoder.decode::<In>() {
                            Ok(Some(frame)) => {
                                if in_tx.send(frame).await.is_err() {
                                    tracing::debug!(conn = %read_label, "Frame receiver dropped");
                                    break 'read;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!(conn = %read_label, error = %e, "Frame decode error");
                                break 'read;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(conn = %read_label, error = %e, "Read error");
                    break;
                }
            }
        }
    });

    // Write task: out_rx -> stream
    tokio::spawn(async move {
        while let Some(frame) = out_rx.recv().await {
            let data = match encode(&frame) {
                Ok(data) => data,
                Err(e) => {
                    tracing::error!(conn = %label, error = %e, "Encode error, closing connection");
                    break;
                }
            };
            if let Err(e) = write_half.write_all(&data).await {
                tracing::warn!(conn = %label, error = %e, "Write error");
                break;
            }
            if let Err(e) = write_half.flush().await {
                tracing::warn!(conn = %label, error = %e, "Flush error");
                break;
            }
        }
        let _ = write_half.shutdown().await;
    });

    (in_rx, out_tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::messages::{Fragment, RequestId};
    use crate::transport::frame::MAX_FRAME_SIZE;
    use crate::transport::protocol::{ClientFrame, ServerFrame};

    #[tokio::test]
    async fn test_unencodable_frame_closes_connection() {
        let (local, mut remote) = tokio::io::duplex(4096);
        let (read, write) = tokio::io::split(local);
        let (_inbound, outbound) =
            spawn_frame_io::<ClientFrame, ServerFrame>(Box::new(read), Box::new(write), "test");

        let request_id = RequestId("big".into());
        outbound
            .send(ServerFrame::Fragment {
                request_id: request_id.clone(),
                fragment: Fragment::assistant("x".repeat(MAX_FRAME_SIZE + 1)),
            })
            .await
            .unwrap();
        // Never written: the connection is already closing
        outbound.send(ServerFrame::End { request_id }).await.ok();

        let mut received = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(2), remote.read_to_end(&mut received))
            .await
            .expect("peer was left waiting")
            .unwrap();
        assert_eq!(read, 0);
    }
}
