//! Named connection management.
//!
//! The registry stores one [`ConnectionConfig`] per name and lazily opens a
//! single [`Connection`] for a name the first time it is requested. The
//! handle is cached and shared until `disconnect` or `reconnect`.

use crate::config::DEFAULT_CONNECTION_NAME;
use crate::db::connection::Connection;
use crate::db::connector::ConnectionFactory;
use crate::error::{DbError, DbResult};
use crate::models::{ConnectionConfig, validate_connection_name};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Debug)]
pub struct ConnectionRegistry {
    configs: std::sync::RwLock<HashMap<String, ConnectionConfig>>,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    default_name: std::sync::RwLock<String>,
    factory: ConnectionFactory,
}

impl ConnectionRegistry {
    /// Create an empty registry whose default connection name is "default".
    pub fn new() -> Self {
        Self {
            configs: std::sync::RwLock::new(HashMap::new()),
            connections: RwLock::new(HashMap::new()),
            default_name: std::sync::RwLock::new(DEFAULT_CONNECTION_NAME.to_string()),
            factory: ConnectionFactory::new(),
        }
    }

    /// Register `config` under `name`, or under the default name when `None`.
    ///
    /// Re-registering a name replaces its configuration; an already open
    /// handle keeps the old settings until `reconnect`.
    pub fn add_connection(&self, config: ConnectionConfig, name: Option<&str>) -> DbResult<()> {
        let name = self.resolve_name(name);
        validate_connection_name(&name)?;
        config.database_type()?;

        debug!(connection = %name, target = %config.masked(), "Registered connection");
        write(&self.configs).insert(name, config);
        Ok(())
    }

    /// Get the configuration registered under `name`.
    pub fn get_config(&self, name: &str) -> DbResult<ConnectionConfig> {
        read(&self.configs)
            .get(name)
            .cloned()
            .ok_or_else(|| DbError::configuration(format!("Database [{}] not configured.", name)))
    }

    /// The live connection for `name` (default name when `None`), opened on first use.
    pub async fn connection(&self, name: Option<&str>) -> DbResult<Arc<Connection>> {
        let name = self.resolve_name(name);

        if let Some(conn) = self.connections.read().await.get(&name) {
            return Ok(conn.clone());
        }

        let config = self.get_config(&name)?;
        let handle = self.factory.connect(&config).await?;
        let created = Arc::new(Connection::new(name.clone(), handle, &config));

        // Re-check after async work: a concurrent caller may have cached one first.
        let (conn, duplicate) = {
            let mut connections = self.connections.write().await;
            match connections.get(&name) {
                Some(existing) => (existing.clone(), Some(created)),
                None => {
                    connections.insert(name.clone(), created.clone());
                    (created, None)
                }
            }
        }; // Lock released here

        if let Some(duplicate) = duplicate {
            // Best effort: the duplicate was never handed out.
            let _ = duplicate.close().await;
        } else {
            info!(
                connection = %name,
                db_type = %conn.database_type(),
                "Connected successfully"
            );
        }
        Ok(conn)
    }

    /// Drop the cached handle for `name` and open a fresh one.
    pub async fn reconnect(&self, name: Option<&str>) -> DbResult<Arc<Connection>> {
        let name = self.resolve_name(name);
        self.disconnect(Some(&name)).await?;
        self.connection(Some(&name)).await
    }

    /// Close and evict the cached handle for `name`, if one is open.
    pub async fn disconnect(&self, name: Option<&str>) -> DbResult<()> {
        let name = self.resolve_name(name);
        let removed = self.connections.write().await.remove(&name);
        if let Some(conn) = removed {
            info!(connection = %name, "Disconnecting");
            conn.close().await?;
        }
        Ok(())
    }

    /// Names with a live handle, sorted.
    pub async fn connections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Registered connection names, sorted.
    pub fn configured(&self) -> Vec<String> {
        let mut names: Vec<String> = read(&self.configs).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn default_connection(&self) -> String {
        read(&self.default_name).clone()
    }

    pub fn set_default_connection(&self, name: impl Into<String>) -> DbResult<()> {
        let name = name.into();
        validate_connection_name(&name)?;
        *write(&self.default_name) = name;
        Ok(())
    }

    /// Close all connections.
    pub async fn close_all(&self) {
        let mut connections = self.connections.write().await;
        for (name, conn) in connections.drain() {
            info!(connection = %name, "Closing connection");
            if let Err(e) = conn.close().await {
                tracing::warn!(connection = %name, error = %e, "Failed to close connection");
            }
        }
        info!("All connections closed");
    }

    fn resolve_name(&self, name: Option<&str>) -> String {
        name.map(String::from)
            .unwrap_or_else(|| self.default_connection())
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &std::sync::RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
