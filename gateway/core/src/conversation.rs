//! Conversation Validation
//!
//! A conversation is an ordered list of [`Turn`]s; order is chronology.
//! Before a conversation is sent to any backend it must open with a system
//! turn followed by a user turn. Nothing is enforced about the tail.

use crate::error::ValidationError;
use crate::messages::{Role, Turn};

/// An ordered, caller-owned sequence of turns
pub type Conversation = Vec<Turn>;

/// Check the structural invariants of a conversation
///
/// Checks run in order and stop at the first failure:
/// 1. at least two turns
/// 2. the first turn is a system turn
/// 3. the second turn is a user turn
///
/// # Errors
///
/// Returns the [`ValidationError`] for the first check that fails.
pub fn validate(turns: &[Turn]) -> Result<(), ValidationError> {
    match turns {
        [] | [_] => Err(ValidationError::TooFewTurns { count: turns.len() }),
        [first, ..] if first.role != Role::System => Err(ValidationError::MissingLeadingSystemTurn),
        [_, second, ..] if second.role != Role::User => {
            Err(ValidationError::MissingFollowingUserTurn)
        }
        _ => Ok(()),
    }
}
