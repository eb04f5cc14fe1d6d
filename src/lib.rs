//! dbkit: a lightweight relational database access layer.
//!
//! Named connections live in a [`ConnectionRegistry`] and open lazily, one
//! handle per name. [`QueryBuilder`] renders flat SELECT/UPDATE/DELETE/INSERT
//! statements with `:name` placeholders, and [`Model`] is an active record
//! that writes only the columns that changed. MySQL, PostgreSQL and SQLite are
//! supported through sqlx.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod query;
pub mod record;
pub mod resolver;

pub use config::Config;
pub use db::{Connection, ConnectionRegistry};
pub use error::{DbError, DbResult};
pub use models::{Bindings, ConnectionConfig, DatabaseType, Record, Value, ValueKind};
pub use query::{QueryBuilder, QueryOutput, QueryType};
pub use record::{Column, Entity, Model, Saved};
pub use resolver::{
    ConnectionTarget, connection_resolver, set_connection_resolver, unset_connection_resolver,
};
