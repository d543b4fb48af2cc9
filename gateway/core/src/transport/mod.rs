//! Fragment Transport
//!
//! Carries fragment streams between the gateway and its clients:
//! - [`InProcessTransport`]: direct calls into a [`CompletionService`](crate::service::CompletionService)
//! - [`GatewayServer`] / [`GatewayClient`]: framed protocol over a Unix
//!   domain socket or TCP
//!
//! Whatever the transport, fragments arrive in production order, each one
//! is forwarded as soon as it exists, and a stream never ends silently: it
//! finishes with an end marker, an error, or a cancellation.

pub mod config;
pub mod frame;
pub mod in_process;
pub mod protocol;
pub mod socket;
pub mod traits;

#[cfg(unix)]
pub use config::default_socket_path;
pub use config::{Endpoint, TransportConfig};
pub use frame::{encode, FrameDecoder, MAX_FRAME_SIZE};
pub use in_process::InProcessTransport;
pub use protocol::{ClientFrame, ServerFrame, WireTurn};
pub use socket::{GatewayClient, GatewayServer, RemoteFragmentStream, MAX_QUEUED_REQUESTS};
pub use traits::{ChatTransport, TransportError};
