//! Transport Configuration
//!
//! Where the gateway listens and how clients reach it.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::TransportError;

/// Default connection timeout in milliseconds
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5000;

/// A gateway address
///
/// Written as `unix:<path>`, `unix://<path>` or `tcp://<host>:<port>`. A
/// bare absolute path is read as a Unix socket path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Endpoint {
    /// Unix domain socket at this path
    #[cfg(unix)]
    Unix(PathBuf),
    /// TCP `host:port`
    Tcp(String),
}

impl Default for Endpoint {
    #[cfg(unix)]
    fn default() -> Self {
        Self::Unix(default_socket_path())
    }

    #[cfg(not(unix))]
    fn default() -> Self {
        Self::Tcp("127.0.0.1:7878".to_string())
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| TransportError::InvalidEndpoint {
            endpoint: input.to_string(),
            reason: reason.to_string(),
        };

        if let Some(addr) = input.strip_prefix("tcp://") {
            let (host, port) = addr
                .rsplit_once(':')
                .ok_or_else(|| invalid("expected tcp://host:port"))?;
            if host.is_empty() {
                return Err(invalid("missing host"));
            }
            port.parse::<u16>().map_err(|_| invalid("port must be 0-65535"))?;
            return Ok(Self::Tcp(addr.to_string()));
        }

        #[cfg(unix)]
        {
            let path = input
                .strip_prefix("unix://")
                .or_else(|| input.strip_prefix("unix:"))
                .or_else(|| input.starts_with('/').then_some(input));
            if let Some(path) = path {
                if path.is_empty() {
                    return Err(invalid("missing socket path"));
                }
                return Ok(Self::Unix(PathBuf::from(path)));
            }
        }

        Err(invalid("expected unix:<path> or tcp://host:port"))
    }
}

impl TryFrom<String> for Endpoint {
    type Error = TransportError;

    fn try_from(input: String) -> Result<Self, Self::Error> {
        input.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            #[cfg(unix)]
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}

/// Client/server transport settings
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Gateway address
    pub endpoint: Endpoint,

    /// How long a client waits when connecting to the gateway
    pub connect_timeout_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
        }
    }
}

impl TransportConfig {
    /// Connection timeout as a `Duration`
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Default Unix socket path
///
/// `$XDG_RUNTIME_DIR/chat-gateway/gateway.sock`, or
/// `/tmp/chat-gateway-$UID/gateway.sock` when no runtime directory is set.
#[cfg(unix)]
#[must_use]
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(runtime_dir) if !runtime_dir.is_empty() => PathBuf::from(runtime_dir)
            .join("chat-gateway")
            .join("gateway.sock"),
        _ => {
            // SAFETY: getuid has no preconditions and cannot fail
            let uid = unsafe { libc::getuid() };
            PathBuf::from(format!("/tmp/chat-gateway-{uid}/gateway.sock"))
        }
    }
}
