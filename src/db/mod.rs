//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Driver connectors and session setup
//! - Named connection registry with lazy, cached handles
//! - Statement execution, transactions and the query log
//! - Named placeholder compilation and parameter binding
//! - Row decoding into records

pub mod connection;
pub mod connector;
#[macro_use]
pub mod macros;
pub mod params;
pub mod registry;
pub mod types;

pub use crate::models::DatabaseType;
pub use connection::Connection;
pub use connector::{
    ConnectionFactory, Connector, DbHandle, MySqlConnector, PostgresConnector, SqliteConnector,
};
pub use registry::ConnectionRegistry;
