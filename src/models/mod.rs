//! Data models for dbkit.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod query;
pub mod value;

// Re-export commonly used types
pub use connection::{ConnectionConfig, DatabaseType, validate_connection_name};
pub use query::QueryLogEntry;
pub use value::{Bindings, Record, Value, ValueKind};
