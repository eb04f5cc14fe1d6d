//! Query-related data models.

use crate::models::value::Bindings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One entry of a connection's query log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    /// SQL after table-prefix substitution, before placeholder compilation.
    pub sql: String,
    pub bindings: Bindings,
    /// Milliseconds, rounded to two decimals.
    pub elapsed_ms: f64,
    pub executed_at: DateTime<Utc>,
}

impl QueryLogEntry {
    pub fn new(sql: impl Into<String>, bindings: Bindings, elapsed: Duration) -> Self {
        Self {
            sql: sql.into(),
            bindings,
            elapsed_ms: round_millis(elapsed),
            executed_at: Utc::now(),
        }
    }
}

fn round_millis(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}
