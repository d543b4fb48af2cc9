//! Gateway Errors
//!
//! Error taxonomy for the streaming completion router.
//!
//! Validation and selection errors are raised synchronously, before any
//! network I/O. Streaming errors (`StreamFailure`, `Cancelled`) are raised in
//! position, after whatever fragments were already delivered.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transport::TransportError;

/// An external role token that matches none of the known roles
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("invalid role: {0:?}")]
pub struct InvalidRole(pub String);

/// Structural problems with a conversation
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Fewer than two turns
    #[error("conversation needs at least 2 turns, got {count}")]
    TooFewTurns {
        /// Number of turns present
        count: usize,
    },

    /// First turn is not a system turn
    #[error("conversation must start with a system turn")]
    MissingLeadingSystemTurn,

    /// Second turn is not a user turn
    #[error("second turn of a conversation must be a user turn")]
    MissingFollowingUserTurn,
}

/// Errors surfaced by the completion service and its transports
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Unrecognized role token
    #[error(transparent)]
    InvalidRole(#[from] InvalidRole),

    /// Conversation failed validation
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No backend registered under the identifier
    #[error("unknown backend: {0:?}")]
    UnknownBackend(String),

    /// Backend or transport failed after streaming began
    #[error("stream failed: {0}")]
    StreamFailure(String),

    /// Caller- or deadline-initiated termination
    #[error("stream cancelled")]
    Cancelled,

    /// Transport could not carry the request at all
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl GatewayError {
    /// The wire tag for this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRole(_) => ErrorKind::InvalidRole,
            Self::Validation(ValidationError::TooFewTurns { .. }) => ErrorKind::TooFewTurns,
            Self::Validation(ValidationError::MissingLeadingSystemTurn) => {
                ErrorKind::MissingLeadingSystemTurn
            }
            Self::Validation(ValidationError::MissingFollowingUserTurn) => {
                ErrorKind::MissingFollowingUserTurn
            }
            Self::UnknownBackend(_) => ErrorKind::UnknownBackend,
            Self::StreamFailure(_) | Self::Transport(_) => ErrorKind::StreamFailure,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether the error was raised before any backend I/O took place
    #[must_use]
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidRole(_) | Self::Validation(_) | Self::UnknownBackend(_)
        )
    }
}

/// Wire representation of a [`GatewayError`] variant
///
/// Carried in error frames so the receiving side can rebuild the same
/// variant it would have seen in-process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// See [`GatewayError::InvalidRole`]
    InvalidRole,
    /// See [`ValidationError::TooFewTurns`]
    TooFewTurns,
    /// See [`ValidationError::MissingLeadingSystemTurn`]
    MissingLeadingSystemTurn,
    /// See [`ValidationError::MissingFollowingUserTurn`]
    MissingFollowingUserTurn,
    /// See [`GatewayError::UnknownBackend`]
    UnknownBackend,
    /// See [`GatewayError::StreamFailure`]
    StreamFailure,
    /// See [`GatewayError::Cancelled`]
    Cancelled,
}

impl ErrorKind {
    /// Rebuild a [`GatewayError`] from a wire tag and its message
    ///
    /// `detail` is the value the sender attached: the role token, backend
    /// identifier, turn count or failure description.
    #[must_use]
    pub fn into_error(self, detail: String) -> GatewayError {
        match self {
            Self::InvalidRole => InvalidRole(detail).into(),
            Self::TooFewTurns => ValidationError::TooFewTurns {
                count: detail.parse().unwrap_or(0),
            }
            .into(),
            Self::MissingLeadingSystemTurn => ValidationError::MissingLeadingSystemTurn.into(),
            Self::MissingFollowingUserTurn => ValidationError::MissingFollowingUserTurn.into(),
            Self::UnknownBackend => GatewayError::UnknownBackend(detail),
            Self::StreamFailure => GatewayError::StreamFailure(detail),
            Self::Cancelled => GatewayError::Cancelled,
        }
    }
}

/// The detail string that [`ErrorKind::into_error`] expects for an error
#[must_use]
pub fn error_detail(error: &GatewayError) -> String {
    match error {
        GatewayError::InvalidRole(InvalidRole(token)) => token.clone(),
        GatewayError::Validation(ValidationError::TooFewTurns { count }) => count.to_string(),
        GatewayError::UnknownBackend(id) => id.clone(),
        GatewayError::StreamFailure(reason) => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_survives_rebuild() {
        let errors = [
            GatewayError::from(InvalidRole("bot".into())),
            GatewayError::from(ValidationError::TooFewTurns { count: 1 }),
            GatewayError::from(ValidationError::MissingLeadingSystemTurn),
            GatewayError::from(ValidationError::MissingFollowingUserTurn),
            GatewayError::UnknownBackend("ghost".into()),
            GatewayError::StreamFailure("boom".into()),
            GatewayError::Cancelled,
        ];

        for error in errors {
            let rebuilt = error.kind().into_error(error_detail(&error));
            assert_eq!(rebuilt.kind(), error.kind());
            assert_eq!(rebuilt.to_string(), error.to_string());
        }
    }

    #[test]
    fn test_rejections_precede_io() {
        assert!(GatewayError::UnknownBackend("x".into()).is_rejection());
        assert!(GatewayError::from(ValidationError::MissingLeadingSystemTurn).is_rejection());
        assert!(!GatewayError::StreamFailure("x".into()).is_rejection());
        assert!(!GatewayError::Cancelled.is_rejection());
    }

    #[test]
    fn test_error_kind_wire_tag() {
        let json = serde_json::to_string(&ErrorKind::UnknownBackend).unwrap();
        assert_eq!(json, "\"unknown_backend\"");
    }
}
