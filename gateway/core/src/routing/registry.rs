//! Backend Registry
//!
//! Maps backend identifiers to backend handles. Built once at startup and
//! shared read-only; selection is a plain lookup with no failover.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::backend::{build_backend, BackendConfig, CompletionBackend};
use crate::error::GatewayError;

/// Identifier → backend lookup table
#[derive(Clone, Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Arc<dyn CompletionBackend>>,
}

impl fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.backends.iter().map(|(id, b)| (id, b.name())))
            .finish()
    }
}

impl BackendRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from configuration entries
    ///
    /// # Errors
    ///
    /// Fails on the first backend that cannot be constructed, naming its
    /// identifier.
    pub fn from_configs<'a, I>(configs: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = (&'a String, &'a BackendConfig)>,
    {
        let mut registry = Self::new();
        for (id, config) in configs {
            let backend = build_backend(config).map_err(|e| {
                anyhow::anyhow!("backend {id:?} ({}) could not be created: {e:#}", config.kind())
            })?;
            registry.register(id.clone(), backend);
        }
        Ok(registry)
    }

    /// Register a backend under an identifier
    ///
    /// Registering an identifier twice replaces the earlier backend.
    pub fn register(&mut self, id: impl Into<String>, backend: Arc<dyn CompletionBackend>) {
        let id = id.into();
        tracing::debug!(backend = %id, name = backend.name(), "Backend registered");
        if self.backends.insert(id.clone(), backend).is_some() {
            tracing::warn!(backend = %id, "Backend registration replaced an earlier one");
        }
    }

    /// Builder-style [`register`](Self::register)
    #[must_use]
    pub fn with(mut self, id: impl Into<String>, backend: Arc<dyn CompletionBackend>) -> Self {
        self.register(id, backend);
        self
    }

    /// Resolve an identifier to its backend
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::UnknownBackend`] if nothing is registered
    /// under `id`.
    pub fn select(&self, id: &str) -> Result<Arc<dyn CompletionBackend>, GatewayError> {
        self.backends
            .get(id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownBackend(id.to_string()))
    }

    /// Whether `id` is registered
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.backends.contains_key(id)
    }

    /// Registered identifiers, sorted
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.backends.keys().map(String::as_str)
    }

    /// Number of registered backends
    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    /// Whether the registry is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Probe every backend, in identifier order
    pub async fn health_report(&self) -> Vec<(String, bool)> {
        let mut report = Vec::with_capacity(self.backends.len());
        for (id, backend) in &self.backends {
            report.push((id.clone(), backend.health_check().await));
        }
        report
    }
}
