//! Gateway Chat - interactive client for the chat gateway
//!
//! Reads one line of input per round, sends the growing conversation through
//! a [`ChatTransport`](gateway_core::ChatTransport) and echoes the reply as
//! it streams in.
//!
//! # Architecture
//!
//! - **App**: the read/stream/echo loop around a [`ChatSession`](gateway_core::ChatSession)
//! - **Transport**: a socket connection to `gateway-daemon`, or an embedded
//!   completion service when running with `--embedded`

pub mod app;

pub use app::{run_prompt, ChatApp, Outcome};
