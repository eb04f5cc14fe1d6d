//! Resolving "the current connection".
//!
//! Query builders and models that were not handed a registry explicitly fall
//! back to one process-wide registry installed with
//! [`set_connection_resolver`]. The global is a plain `RwLock`: install it
//! during startup, remove it at teardown (tests do this for isolation).
//!
//! # Precedence Rules
//!
//! 1. Registry passed explicitly via `with_registry()`
//! 2. Global resolver (if set)
//! 3. Otherwise resolution fails with a configuration error

use crate::db::{Connection, ConnectionRegistry};
use crate::error::{DbError, DbResult};
use std::sync::{Arc, RwLock};

static RESOLVER: RwLock<Option<Arc<ConnectionRegistry>>> = RwLock::new(None);

/// Install `registry` as the process-wide resolver, replacing any previous one.
pub fn set_connection_resolver(registry: Arc<ConnectionRegistry>) {
    *RESOLVER.write().unwrap_or_else(|p| p.into_inner()) = Some(registry);
}

/// The installed resolver, if any.
pub fn connection_resolver() -> Option<Arc<ConnectionRegistry>> {
    RESOLVER.read().unwrap_or_else(|p| p.into_inner()).clone()
}

/// Remove the process-wide resolver, returning it.
pub fn unset_connection_resolver() -> Option<Arc<ConnectionRegistry>> {
    RESOLVER.write().unwrap_or_else(|p| p.into_inner()).take()
}

/// Where a builder or model gets its connection from.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTarget {
    registry: Option<Arc<ConnectionRegistry>>,
    name: Option<String>,
}

impl ConnectionTarget {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the named connection instead of the registry default.
    pub fn on(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Use `registry` instead of the global resolver.
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
    }

    pub fn registry(&self) -> Option<&Arc<ConnectionRegistry>> {
        self.registry.as_ref()
    }

    /// Resolve the live connection at the moment it is needed.
    pub async fn connection(&self) -> DbResult<Arc<Connection>> {
        let registry = match &self.registry {
            Some(registry) => registry.clone(),
            None => connection_resolver().ok_or_else(|| {
                DbError::configuration(
                    "No connection resolver is set; call set_connection_resolver or pass a registry",
                )
            })?,
        };
        registry.connection(self.name.as_deref()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConnectionConfig;

    #[tokio::test]
    async fn test_explicit_registry_wins() {
        let registry = Arc::new(ConnectionRegistry::new());
        registry
            .add_connection(ConnectionConfig::sqlite_memory(), Some("local"))
            .unwrap();

        let target = ConnectionTarget::new()
            .with_registry(registry.clone())
            .on("local");
        assert_eq!(target.name(), Some("local"));
        let conn = target.connection().await.unwrap();
        assert_eq!(conn.name(), "local");
    }

    #[tokio::test]
    async fn test_explicit_registry_unknown_name() {
        let target = ConnectionTarget::new()
            .with_registry(Arc::new(ConnectionRegistry::new()))
            .on("missing");
        let err = target.connection().await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
    }
}
