//! Streaming Infrastructure
//!
//! Relays a backend's token channel to the caller one fragment at a time.
//!
//! ```text
//!  backend task ──StreamingToken──► mpsc (100) ──► FragmentStream::next()
//!                                                        │
//!                                   CancellationToken ───┘ (checked first)
//! ```
//!
//! A stream has exactly one terminal outcome: normal end (`None`), a
//! `StreamFailure`, or `Cancelled`. Fragments already delivered before a
//! failure stay delivered.

mod fragment_stream;

pub use fragment_stream::{FragmentSource, FragmentStream};
