//! Gateway Protocol
//!
//! Frames exchanged between a chat client and the gateway daemon. Every
//! frame names the request it belongs to, so one connection can carry
//! several requests.
//!
//! A request ends with exactly one of `End`, `Error` or `Cancelled`. `End`
//! is distinct from an empty fragment.

use serde::{Deserialize, Serialize};

use crate::error::{error_detail, ErrorKind, GatewayError, InvalidRole};
use crate::messages::{Fragment, RequestId, Turn};

/// A turn as it appears on the wire
///
/// The role stays a raw token until the server parses it, so an unknown
/// role is answered with an `invalid_role` error frame for that request
/// instead of failing the whole connection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireTurn {
    /// Role token
    pub role: String,
    /// Turn text
    #[serde(default)]
    pub content: Option<String>,
}

impl From<&Turn> for WireTurn {
    fn from(turn: &Turn) -> Self {
        Self {
            role: turn.role.as_str().to_string(),
            content: Some(turn.content.clone()),
        }
    }
}

impl TryFrom<WireTurn> for Turn {
    type Error = InvalidRole;

    fn try_from(wire: WireTurn) -> Result<Self, Self::Error> {
        Ok(Turn::new(wire.role.parse()?, wire.content.unwrap_or_default()))
    }
}

/// Client → gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Stream the reply to a conversation
    Chat {
        /// Request identifier
        request_id: RequestId,
        /// Backend identifier (absent = gateway default)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backend: Option<String>,
        /// The conversation
        turns: Vec<WireTurn>,
    },
    /// Stream the reply to a single prompt
    Prompt {
        /// Request identifier
        request_id: RequestId,
        /// Backend identifier (absent = gateway default)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        backend: Option<String>,
        /// Prompt text
        prompt: String,
    },
    /// Stop a request
    Cancel {
        /// Request to stop
        request_id: RequestId,
    },
}

impl ClientFrame {
    /// Build a `Chat` frame from typed turns
    #[must_use]
    pub fn chat(request_id: RequestId, backend: Option<String>, turns: &[Turn]) -> Self {
        Self::Chat {
            request_id,
            backend,
            turns: turns.iter().map(WireTurn::from).collect(),
        }
    }

    /// The request this frame refers to
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Chat { request_id, .. }
            | Self::Prompt { request_id, .. }
            | Self::Cancel { request_id } => request_id,
        }
    }
}

/// Gateway → client
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// One piece of the reply
    Fragment {
        /// Request identifier
        request_id: RequestId,
        /// The fragment
        fragment: Fragment,
    },
    /// The reply is complete
    End {
        /// Request identifier
        request_id: RequestId,
    },
    /// The request failed
    Error {
        /// Request identifier
        request_id: RequestId,
        /// Which error
        kind: ErrorKind,
        /// Error detail (role token, backend id, turn count or reason)
        message: String,
    },
    /// The request was cancelled
    Cancelled {
        /// Request identifier
        request_id: RequestId,
    },
}

impl ServerFrame {
    /// The terminal frame reporting `error`
    #[must_use]
    pub fn failure(request_id: RequestId, error: &GatewayError) -> Self {
        match error {
            GatewayError::Cancelled => Self::Cancelled { request_id },
            other => Self::Error {
                request_id,
                kind: other.kind(),
                message: error_detail(other),
            },
        }
    }

    /// The request this frame refers to
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::Fragment { request_id, .. }
            | Self::End { request_id }
            | Self::Error { request_id, .. }
            | Self::Cancelled { request_id } => request_id,
        }
    }

    /// Whether this frame ends its request
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Fragment { .. })
    }
}
