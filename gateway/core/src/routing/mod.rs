//! Backend Selection
//!
//! Resolves a backend identifier to one registered completion backend.
//!
//! # Architecture
//!
//! ```text
//! +-------------------+
//! | CompletionService |  <-- validates, then asks for a backend
//! +---------+---------+
//!           |  "demo"
//!           v
//! +-------------------+
//! |  BackendRegistry  |  <-- identifier -> Arc<dyn CompletionBackend>
//! +---------+---------+
//!           |
//!     +-----+------+
//!     |     |      |
//!     v     v      v
//! +------+ +------+ +----+
//! |Ollama| |OpenAI| |Stub|
//! +------+ +------+ +----+
//! ```
//!
//! Selection is static: one identifier resolves to one backend for the
//! lifetime of a request. There is no fallback chain and no load balancing.

mod registry;

pub use registry::BackendRegistry;
