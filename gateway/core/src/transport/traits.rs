//! Transport Traits
//!
//! The seam between the chat client and wherever completions come from:
//! a service in the same process or a gateway daemon across a socket.

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::messages::Turn;
use crate::streaming::FragmentSource;

/// Errors from the transport layer itself
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the peer
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The peer went away
    #[error("connection closed")]
    ConnectionClosed,

    /// A frame could not be encoded or decoded
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Underlying socket I/O failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Operation not valid in the current state
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Frame checksum did not match its payload
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum carried by the frame
        expected: u32,
        /// Checksum computed over the payload
        actual: u32,
    },

    /// An endpoint string could not be parsed
    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        /// The rejected input
        endpoint: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Something that can stream completions to a chat client
///
/// Both methods return once the request has been accepted for streaming;
/// fragments and the terminal outcome come from the returned source.
/// Rejections may surface either as the `Err` here or as the source's
/// first item, depending on where the validation runs.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Stream the reply to a conversation
    async fn stream_chat(
        &self,
        turns: &[Turn],
        cancel: CancellationToken,
    ) -> Result<Box<dyn FragmentSource>, GatewayError>;

    /// Stream the reply to a single prompt
    async fn stream_prompt(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<Box<dyn FragmentSource>, GatewayError>;
}
