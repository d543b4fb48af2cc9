//! TOML Configuration File Support
//!
//! Configuration for the gateway daemon and the chat client, read from
//! `~/.config/chat-gateway/gateway.toml`.
//!
//! # Configuration Priority
//!
//! Highest first:
//! 1. CLI arguments ([`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [gateway]
//! backend = "ollama"
//! endpoint = "unix:/run/user/1000/chat-gateway/gateway.sock"
//! connect_timeout_ms = 5000
//!
//! [backends.ollama]
//! kind = "ollama"
//! host = "localhost"
//! port = 11434
//! model = "llama3.2"
//!
//! [backends.openai]
//! kind = "openai"
//! base_url = "https://api.openai.com/v1"
//! api_key_env = "OPENAI_API_KEY"
//! model = "gpt-4o-mini"
//!
//! [backends.demo]
//! kind = "stub"
//! fragments = ["Hel", "lo"]
//! ```
//!
//! A file that declares any `[backends.*]` table replaces the built-in
//! backend set entirely.
//!
//! # Environment Variables
//!
//! - `GATEWAY_CONFIG`: configuration file path
//! - `GATEWAY_BACKEND`: default backend identifier
//! - `GATEWAY_ENDPOINT`: gateway address
//! - `GATEWAY_CONNECT_TIMEOUT`: client connect timeout in milliseconds

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::BackendConfig;
use crate::routing::BackendRegistry;
use crate::service::CompletionService;
use crate::transport::config::{Endpoint, TransportConfig};

/// Backend used when nothing else is configured
pub const DEFAULT_BACKEND: &str = "ollama";

/// Identifier of the built-in scripted backend
pub const DEMO_BACKEND: &str = "demo";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// `[gateway]` section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewaySection {
    /// Default backend identifier
    pub backend: Option<String>,

    /// Gateway address (`unix:<path>` or `tcp://host:port`)
    pub endpoint: Option<Endpoint>,

    /// Client connect timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayToml {
    /// `[gateway]` section
    pub gateway: GatewaySection,

    /// `[backends.<id>]` tables
    pub backends: BTreeMap<String, BackendConfig>,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Resolved gateway configuration
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Identifier used when a request names no backend
    pub default_backend: String,

    /// Where the daemon listens and clients connect
    pub transport: TransportConfig,

    /// Backends to register, by identifier
    pub backends: BTreeMap<String, BackendConfig>,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    source: ConfigSource,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_backend: DEFAULT_BACKEND.to_string(),
            transport: TransportConfig::default(),
            backends: default_backends(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

/// Built-in backends: local Ollama and the scripted `demo` stub
fn default_backends() -> BTreeMap<String, BackendConfig> {
    BTreeMap::from([
        (DEFAULT_BACKEND.to_string(), BackendConfig::ollama_from_env()),
        (DEMO_BACKEND.to_string(), BackendConfig::stub(["4"])),
    ])
}

impl GatewayConfig {
    /// Create a configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest-priority source that contributed a value
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// `ValidationError` if the default backend is not declared, no backend
    /// is declared at all, or the connect timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backends.is_empty() {
            return Err(ConfigError::ValidationError(
                "no backends configured".to_string(),
            ));
        }
        if !self.backends.contains_key(&self.default_backend) {
            let known: Vec<&str> = self.backends.keys().map(String::as_str).collect();
            return Err(ConfigError::ValidationError(format!(
                "default backend {:?} is not configured (known: {})",
                self.default_backend,
                known.join(", ")
            )));
        }
        if self.transport.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Construct every configured backend
    ///
    /// # Errors
    ///
    /// Fails on the first backend that cannot be built (for example an
    /// `openai` backend whose API key variable is unset).
    pub fn build_registry(&self) -> anyhow::Result<BackendRegistry> {
        BackendRegistry::from_configs(&self.backends)
    }

    /// Construct the completion service for this configuration
    ///
    /// # Errors
    ///
    /// See [`build_registry`](Self::build_registry).
    pub fn build_service(&self) -> anyhow::Result<CompletionService> {
        let registry = self.build_registry()?;
        Ok(CompletionService::new(
            Arc::new(registry),
            self.default_backend.clone(),
        ))
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chat-gateway/gateway.toml` or
/// `~/.config/chat-gateway/gateway.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chat-gateway").join("gateway.toml"))
}

/// Load configuration from `GATEWAY_CONFIG` or the default path
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the result fails validation. A missing file is not an error.
pub fn load_config() -> Result<GatewayConfig, ConfigError> {
    let path = std::env::var_os("GATEWAY_CONFIG")
        .map(PathBuf::from)
        .or_else(default_config_path);
    load_config_from_path(path)
}

/// Load configuration from a specific path
///
/// If `path` is `None`, only defaults and environment variables are used.
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<GatewayConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
///
/// # Errors
///
/// See [`load_config`].
pub fn load_config_with_env<F>(path: Option<PathBuf>, env: F) -> Result<GatewayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = GatewayConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: GatewayToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(path = %config_path.display(), "Loaded configuration from file");
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    apply_env_config(&mut config, env)?;
    config.validate()?;

    Ok(config)
}

fn apply_toml_config(config: &mut GatewayConfig, toml: GatewayToml) {
    if let Some(backend) = toml.gateway.backend {
        config.default_backend = backend;
    }
    if let Some(endpoint) = toml.gateway.endpoint {
        config.transport.endpoint = endpoint;
    }
    if let Some(timeout) = toml.gateway.connect_timeout_ms {
        config.transport.connect_timeout_ms = timeout;
    }
    if !toml.backends.is_empty() {
        config.backends = toml.backends;
    }
}

fn apply_env_config<F>(config: &mut GatewayConfig, env: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(backend) = env("GATEWAY_BACKEND").filter(|b| !b.is_empty()) {
        config.default_backend = backend;
        config.source = ConfigSource::Env;
    }
    if let Some(endpoint) = env("GATEWAY_ENDPOINT").filter(|e| !e.is_empty()) {
        config.transport.endpoint = endpoint
            .parse()
            .map_err(|e| ConfigError::ValidationError(format!("GATEWAY_ENDPOINT: {e}")))?;
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = env("GATEWAY_CONNECT_TIMEOUT") {
        if let Ok(ms) = timeout.parse::<u64>() {
            config.transport.connect_timeout_ms = ms;
            config.source = ConfigSource::Env;
        } else {
            tracing::warn!(value = %timeout, "Ignoring unparseable GATEWAY_CONNECT_TIMEOUT");
        }
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Command-line overrides, applied after [`load_config`]
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Default backend override
    pub backend: Option<String>,

    /// Endpoint override
    pub endpoint: Option<Endpoint>,

    /// Connect timeout override (milliseconds)
    pub connect_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    /// Create an empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default backend
    #[must_use]
    pub fn with_backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Set the endpoint
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set the connect timeout
    #[must_use]
    pub fn with_connect_timeout_ms(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = Some(ms);
        self
    }

    /// Apply overrides and re-validate
    ///
    /// # Errors
    ///
    /// `ValidationError` if the overridden configuration is inconsistent,
    /// e.g. `--backend` names an undeclared backend.
    pub fn apply(&self, config: &mut GatewayConfig) -> Result<(), ConfigError> {
        if self.backend.is_some() || self.endpoint.is_some() || self.connect_timeout_ms.is_some() {
            config.source = ConfigSource::Cli;
        }
        if let Some(ref backend) = self.backend {
            config.default_backend = backend.clone();
        }
        if let Some(ref endpoint) = self.endpoint {
            config.transport.endpoint = endpoint.clone();
        }
        if let Some(timeout) = self.connect_timeout_ms {
            config.transport.connect_timeout_ms = timeout;
        }
        config.validate()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = load_config_with_env(None, no_env).unwrap();

        assert_eq!(config.default_backend, "ollama");
        assert_eq!(
            config.backends.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["demo", "ollama"]
        );
        assert_eq!(config.backends["demo"], BackendConfig::stub(["4"]));
        assert_eq!(config.transport.connect_timeout_ms, 5000);
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.ends_with("chat-gateway/gateway.toml"));
        }
    }

    #[test]
    fn test_parse_full_toml() {
        let file = write_toml(
            r#"
[gateway]
backend = "demo"
endpoint = "tcp://127.0.0.1:7878"
connect_timeout_ms = 1500

[backends.local]
kind = "ollama"
model = "mistral"

[backends.demo]
kind = "stub"
fragments = ["Hel", "lo"]
fail_with = "scripted failure"
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.default_backend, "demo");
        assert_eq!(
            config.transport.endpoint,
            Endpoint::Tcp("127.0.0.1:7878".into())
        );
        assert_eq!(config.transport.connect_timeout_ms, 1500);
        assert_eq!(
            config.backends["local"],
            BackendConfig::ollama("localhost", 11434, "mistral")
        );
        assert_eq!(
            config.backends["demo"],
            BackendConfig::Stub {
                fragments: vec!["Hel".into(), "lo".into()],
                fail_with: Some("scripted failure".into()),
            }
        );
        // Declared backends replace the built-in set
        assert!(!config.backends.contains_key("ollama"));
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path.as_deref(), Some(file.path()));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let file = write_toml("[gateway]\nconnect_timeout_ms = 7500\n");
        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.transport.connect_timeout_ms, 7500);
        assert_eq!(config.default_backend, "ollama");
        assert!(config.backends.contains_key("demo"));
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/gateway.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml("[gateway\nbackend = 3\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_unknown_backend_kind_is_parse_error() {
        let file = write_toml("[backends.x]\nkind = \"carrier-pigeon\"\n");
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_default_backend_must_be_declared() {
        let file = write_toml(
            r#"
[gateway]
backend = "ghost"

[backends.demo]
kind = "stub"
"#,
        );
        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        match result {
            Err(ConfigError::ValidationError(message)) => assert!(message.contains("ghost")),
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml(
            r#"
[gateway]
backend = "ollama"
connect_timeout_ms = 5000
"#,
        );
        let env = env_from(&[
            ("GATEWAY_BACKEND", "demo"),
            ("GATEWAY_CONNECT_TIMEOUT", "3000"),
            ("GATEWAY_ENDPOINT", "unix:/tmp/gw-test.sock"),
        ]);

        let config = load_config_with_env(Some(file.path().to_path_buf()), env).unwrap();

        assert_eq!(config.default_backend, "demo");
        assert_eq!(config.transport.connect_timeout_ms, 3000);
        assert_eq!(config.transport.endpoint.to_string(), "unix:/tmp/gw-test.sock");
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_bad_env_endpoint_is_rejected() {
        let result = load_config_with_env(None, env_from(&[("GATEWAY_ENDPOINT", "ftp://x")]));
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config =
            load_config_with_env(None, env_from(&[("GATEWAY_BACKEND", "ollama")])).unwrap();

        ConfigOverrides::new()
            .with_backend("demo")
            .with_connect_timeout_ms(250)
            .apply(&mut config)
            .unwrap();

        assert_eq!(config.default_backend, "demo");
        assert_eq!(config.transport.connect_timeout_ms, 250);
        assert_eq!(config.source(), ConfigSource::Cli);

        let result = ConfigOverrides::new().with_backend("ghost").apply(&mut config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_build_service_routes_to_demo() {
        let mut config = load_config_with_env(None, no_env).unwrap();
        ConfigOverrides::new()
            .with_backend(DEMO_BACKEND)
            .apply(&mut config)
            .unwrap();

        let service = config.build_service().unwrap();
        let text = service
            .complete_prompt_default("2+2?", tokio_util::sync::CancellationToken::new())
            .await
            .unwrap()
            .collect_text()
            .await
            .unwrap();
        assert_eq!(text, "4");
    }
}
