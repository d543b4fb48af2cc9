//! Gateway Core - Streaming Chat Completion Router
//!
//! This crate validates chat conversations, routes them to one of several
//! interchangeable completion backends, and streams the reply back one
//! fragment at a time, in process or across a socket.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │         chat client          │        │        gateway daemon        │
//! │  ChatSession (accumulator)   │        │        GatewayServer         │
//! │            │                 │ frames │              │               │
//! │      ChatTransport ──────────┼───────►│     CompletionService        │
//! │  (GatewayClient/InProcess)   │◄───────┼   validate → select → stream │
//! └──────────────────────────────┘        │              │               │
//!                                         │       BackendRegistry        │
//!                                         │   ┌────────┬────────┬─────┐  │
//!                                         │   │ Ollama │ OpenAI │ Stub│  │
//!                                         │   └────────┴────────┴─────┘  │
//!                                         └──────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use gateway_core::{BackendRegistry, CompletionService, StubBackend, Turn};
//! use tokio_util::sync::CancellationToken;
//!
//! let registry = BackendRegistry::new().with("demo", Arc::new(StubBackend::new(["4"])));
//! let service = CompletionService::new(Arc::new(registry), "demo");
//!
//! let turns = [Turn::system("You are helpful"), Turn::user("2+2?")];
//! let mut stream = service
//!     .complete_streaming(&turns, "demo", CancellationToken::new())
//!     .await?;
//! while let Some(fragment) = stream.next().await {
//!     print!("{}", fragment?.text);
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`messages`]: Roles, turns, fragments and request IDs
//! - [`conversation`]: Conversation validation
//! - [`backend`]: Completion backends (Ollama, OpenAI-compatible, stub)
//! - [`routing`]: Backend registry and selection
//! - [`streaming`]: Fragment streams with cancellation
//! - [`service`]: The streaming completion service
//! - [`session`]: Client-side reply accumulation
//! - [`transport`]: Frame codec, socket server/client, in-process transport
//! - [`config`]: TOML/env/CLI configuration
//! - [`error`]: Error types

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod conversation;
pub mod error;
pub mod messages;
pub mod routing;
pub mod service;
pub mod session;
pub mod streaming;
pub mod transport;

// Re-exports for convenience
pub use backend::{
    BackendConfig, CompletionBackend, OllamaBackend, OpenAiBackend, StreamingToken, StubBackend,
};
pub use conversation::{validate, Conversation};
pub use error::{ErrorKind, GatewayError, InvalidRole, ValidationError};
pub use messages::{Fragment, RequestId, Role, Turn};
pub use routing::BackendRegistry;
pub use service::CompletionService;
pub use session::{ChatSession, SessionState, DEFAULT_SYSTEM_PROMPT};
pub use streaming::{FragmentSource, FragmentStream};

// Transport exports
pub use transport::{
    ChatTransport, ClientFrame, Endpoint, GatewayClient, GatewayServer, InProcessTransport,
    RemoteFragmentStream, ServerFrame, TransportConfig, TransportError,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ConfigError,
    ConfigOverrides, ConfigSource, GatewayConfig, GatewayToml,
};
