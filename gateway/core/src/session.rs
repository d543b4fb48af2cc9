//! Chat Session
//!
//! Client-side conversation state for an interactive chat. Each round adds a
//! user turn and an assistant placeholder; streamed fragments grow the
//! placeholder, which becomes prior context for the next round.
//!
//! # State machine
//!
//! ```text
//!   Idle ──begin_round(non-empty)──► Building ──finish_round──► Idle
//!    │                                  │
//!    └──begin_round(empty)──┐           └──fail──┐
//!                           ▼                    ▼
//!                       Terminated ◄─────────────┘
//! ```
//!
//! The session is owned by one consumer loop and never shared, so it needs
//! no locking.

use crate::messages::{Fragment, Role, Turn};

/// System prompt that opens every interactive conversation
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant.";

/// Where a session is in its round cycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the next line of input
    Idle,
    /// A reply is streaming into the placeholder
    Building,
    /// The session is over; no further rounds
    Terminated,
}

/// One interactive conversation
#[derive(Clone, Debug)]
pub struct ChatSession {
    system_prompt: String,
    turns: Vec<Turn>,
    state: SessionState,
}

impl Default for ChatSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatSession {
    /// Create a session using [`DEFAULT_SYSTEM_PROMPT`]
    #[must_use]
    pub fn new() -> Self {
        Self::with_system_prompt(DEFAULT_SYSTEM_PROMPT)
    }

    /// Create a session with a custom system prompt
    pub fn with_system_prompt(prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: prompt.into(),
            turns: Vec::new(),
            state: SessionState::Idle,
        }
    }

    /// Current state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// The whole conversation, including the current placeholder
    #[must_use]
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// Start a round with a line of user input
    ///
    /// Returns the turns to send: everything except the new assistant
    /// placeholder. Empty or whitespace-only input terminates the session
    /// and returns `None`, as does calling this outside the idle state.
    pub fn begin_round(&mut self, input: &str) -> Option<Vec<Turn>> {
        if self.state != SessionState::Idle {
            return None;
        }
        if input.trim().is_empty() {
            self.state = SessionState::Terminated;
            return None;
        }

        if self.turns.is_empty() {
            self.turns.push(Turn::system(self.system_prompt.clone()));
        }
        self.turns.push(Turn::user(input));
        let outbound = self.turns.clone();
        self.turns.push(Turn::assistant(""));
        self.state = SessionState::Building;

        Some(outbound)
    }

    /// Fold a fragment into the reply
    ///
    /// Returns the text to display, or `None` when the fragment is ignored
    /// (non-assistant role, or no round in progress).
    pub fn apply<'f>(&mut self, fragment: &'f Fragment) -> Option<&'f str> {
        if self.state != SessionState::Building || fragment.role != Role::Assistant {
            return None;
        }
        let placeholder = self.turns.last_mut()?;
        placeholder.content.push_str(&fragment.text);
        Some(&fragment.text)
    }

    /// Text accumulated for the current (or most recent) reply
    #[must_use]
    pub fn reply(&self) -> &str {
        match self.turns.last() {
            Some(turn) if turn.role == Role::Assistant => &turn.content,
            _ => "",
        }
    }

    /// The reply ended normally; wait for the next input
    pub fn finish_round(&mut self) {
        if self.state == SessionState::Building {
            self.state = SessionState::Idle;
        }
    }

    /// The reply ended with an error; the session is over
    ///
    /// Whatever text arrived stays in the placeholder.
    pub fn fail(&mut self) {
        self.state = SessionState::Terminated;
    }

    /// Number of completed or in-progress rounds
    #[must_use]
    pub fn rounds(&self) -> usize {
        self.turns.iter().filter(|t| t.role == Role::User).count()
    }
}
