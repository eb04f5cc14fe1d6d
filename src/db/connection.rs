//! A live database connection.
//!
//! [`Connection`] owns one driver handle (not a pool). Every statement goes
//! through the same path: table-prefix substitution, `:name` placeholder
//! compilation for the backend, execution under the query deadline, and an
//! optional entry in the query log.
//!
//! The handle sits behind an async mutex, so concurrent callers are
//! serialized per statement. A transaction spans several statements, so
//! code sharing a connection with other tasks should not interleave work
//! with an open transaction; use one connection per worker instead.

use crate::db::DatabaseType;
use crate::db::connector::DbHandle;
use crate::db::params::{self, bind_mysql_param, bind_postgres_param, bind_sqlite_param};
use crate::db::types::RowToRecord;
use crate::error::{DbError, DbResult};
use crate::models::{Bindings, ConnectionConfig, QueryLogEntry, Record, Value};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::time::error::Elapsed;
use tracing::{debug, info, warn};

/// What a statement should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fetch {
    Execute,
    Row,
    All,
}

enum Outcome {
    Affected { rows: u64, insert_id: Option<i64> },
    Row(Option<Record>),
    Rows(Vec<Record>),
}

/// Bind compiled parameters and run the query in the requested fetch mode.
macro_rules! run_query {
    ($conn:expr, $compiled:expr, $fetch:expr, $bind:path, $insert_id:expr) => {{
        let mut query = sqlx::query(&$compiled.sql);
        for param in &$compiled.params {
            query = $bind(query, param);
        }
        match $fetch {
            Fetch::Execute => query.execute(&mut *$conn).await.map(|done| Outcome::Affected {
                rows: done.rows_affected(),
                insert_id: $insert_id(&done),
            }),
            Fetch::Row => query
                .fetch_optional(&mut *$conn)
                .await
                .map(|row| Outcome::Row(row.as_ref().map(RowToRecord::to_record))),
            Fetch::All => query
                .fetch_all(&mut *$conn)
                .await
                .map(|rows| Outcome::Rows(rows.iter().map(RowToRecord::to_record).collect())),
        }
    }};
}

#[derive(Debug)]
pub struct Connection {
    name: String,
    db_type: DatabaseType,
    database: String,
    table_prefix: String,
    query_timeout: Duration,
    handle: Mutex<Option<DbHandle>>,
    logging: AtomicBool,
    query_log: std::sync::Mutex<Vec<QueryLogEntry>>,
    in_transaction: AtomicBool,
    last_insert_id: std::sync::Mutex<Option<i64>>,
}

impl Connection {
    /// Wrap an open handle using the settings from `config`.
    pub fn new(name: impl Into<String>, handle: DbHandle, config: &ConnectionConfig) -> Self {
        Self {
            name: name.into(),
            db_type: handle.db_type(),
            database: config.database.clone(),
            table_prefix: config.prefix.clone(),
            query_timeout: Duration::from_secs(config.query_timeout_secs),
            handle: Mutex::new(Some(handle)),
            logging: AtomicBool::new(false),
            query_log: std::sync::Mutex::new(Vec::new()),
            in_transaction: AtomicBool::new(false),
            last_insert_id: std::sync::Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn database_type(&self) -> DatabaseType {
        self.db_type
    }

    pub fn database_name(&self) -> &str {
        &self.database
    }

    pub fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    /// Replace every `@` with the table prefix, verbatim and in a single pass.
    pub fn replace_prefix(&self, sql: &str) -> String {
        sql.replace('@', &self.table_prefix)
    }

    // =========================================================================
    // Statements
    // =========================================================================

    /// Execute a statement, discarding any result rows.
    pub async fn statement(&self, sql: &str, bindings: &Bindings) -> DbResult<()> {
        self.run(sql, bindings, Fetch::Execute).await.map(|_| ())
    }

    /// Execute a statement and return the number of affected rows.
    pub async fn execute(&self, sql: &str, bindings: &Bindings) -> DbResult<u64> {
        match self.run(sql, bindings, Fetch::Execute).await? {
            Outcome::Affected { rows, .. } => Ok(rows),
            _ => Err(DbError::internal("execute returned rows")),
        }
    }

    /// First column of the first row.
    pub async fn single(&self, sql: &str, bindings: &Bindings) -> DbResult<Option<Value>> {
        Ok(self
            .row(sql, bindings)
            .await?
            .and_then(|row| row.into_iter().next().map(|(_, value)| value)))
    }

    /// First row, if any.
    pub async fn row(&self, sql: &str, bindings: &Bindings) -> DbResult<Option<Record>> {
        match self.run(sql, bindings, Fetch::Row).await? {
            Outcome::Row(row) => Ok(row),
            _ => Err(DbError::internal("row fetch returned no row set")),
        }
    }

    /// All rows in result order.
    pub async fn all(&self, sql: &str, bindings: &Bindings) -> DbResult<Vec<Record>> {
        match self.run(sql, bindings, Fetch::All).await? {
            Outcome::Rows(rows) => Ok(rows),
            _ => Err(DbError::internal("fetch returned no row set")),
        }
    }

    /// Identifier assigned by the most recent INSERT on this connection.
    ///
    /// MySQL and SQLite report it with the statement result. PostgreSQL asks
    /// the session for `lastval()`, which fails when no sequence was used.
    pub async fn last_insert_id(&self) -> DbResult<Option<i64>> {
        if self.db_type == DatabaseType::Postgres {
            let mut guard = self.handle.lock().await;
            let handle = guard.as_mut().ok_or_else(closed_error)?;
            let compiled = params::compile("SELECT lastval()", &Bindings::new(), self.db_type)?;
            let result =
                tokio::time::timeout(self.query_timeout, dispatch(handle, &compiled, Fetch::Row))
                    .await;
            let outcome = self.settle(&mut guard, result, "SELECT lastval()")?;
            return Ok(match outcome {
                Outcome::Row(Some(row)) => row.first_value().and_then(Value::as_i64),
                _ => None,
            });
        }
        Ok(*lock(&self.last_insert_id))
    }

    async fn run(&self, sql: &str, bindings: &Bindings, fetch: Fetch) -> DbResult<Outcome> {
        let sql = self.replace_prefix(sql);
        let compiled = params::compile(&sql, bindings, self.db_type)?;

        let start = Instant::now();
        let outcome = {
            let mut guard = self.handle.lock().await;
            let handle = guard.as_mut().ok_or_else(closed_error)?;
            let result =
                tokio::time::timeout(self.query_timeout, dispatch(handle, &compiled, fetch)).await;
            self.settle(&mut guard, result, "query")?
        };
        let elapsed = start.elapsed();

        debug!(
            connection = %self.name,
            sql = %sql,
            bindings = compiled.params.len(),
            elapsed_ms = elapsed.as_secs_f64() * 1000.0,
            "Executed statement"
        );

        if let Outcome::Affected {
            insert_id: Some(id),
            ..
        } = outcome
        {
            *lock(&self.last_insert_id) = Some(id);
        }
        if self.logging() {
            lock(&self.query_log).push(QueryLogEntry::new(sql, bindings.clone(), elapsed));
        }
        Ok(outcome)
    }

    /// Unwrap a deadline-bound call.
    ///
    /// On timeout the statement may still be running server side, so the
    /// handle is dropped: later calls fail with a connection error until the
    /// registry reconnects, and any open transaction is gone with it.
    fn settle<T, E>(
        &self,
        slot: &mut Option<DbHandle>,
        result: Result<Result<T, E>, Elapsed>,
        operation: &str,
    ) -> DbResult<T>
    where
        E: Into<DbError>,
    {
        match result {
            Ok(result) => result.map_err(Into::into),
            Err(_) => {
                slot.take();
                self.in_transaction.store(false, Ordering::SeqCst);
                warn!(
                    connection = %self.name,
                    operation = %operation,
                    timeout_secs = self.query_timeout.as_secs(),
                    "Statement timed out, handle dropped"
                );
                Err(DbError::timeout(operation, self.query_timeout.as_secs()))
            }
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Start a transaction. Fails if one is already open on this connection.
    pub async fn begin_transaction(&self) -> DbResult<()> {
        if self
            .in_transaction
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(DbError::transaction(
                "A transaction is already open on this connection; nested transactions are not supported",
            ));
        }
        if let Err(e) = self.raw("BEGIN").await {
            self.in_transaction.store(false, Ordering::SeqCst);
            return Err(e);
        }
        info!(connection = %self.name, "Transaction started");
        Ok(())
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.finish_transaction("COMMIT").await?;
        info!(connection = %self.name, "Transaction committed");
        Ok(())
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.finish_transaction("ROLLBACK").await?;
        info!(connection = %self.name, "Transaction rolled back");
        Ok(())
    }

    async fn finish_transaction(&self, sql: &str) -> DbResult<()> {
        if !self.in_transaction() {
            return Err(DbError::transaction("No transaction is open on this connection"));
        }
        let result = self.raw(sql).await;
        // A failed COMMIT leaves the transaction open for a ROLLBACK.
        if result.is_ok() || sql == "ROLLBACK" {
            self.in_transaction.store(false, Ordering::SeqCst);
        }
        result
    }

    async fn raw(&self, sql: &str) -> DbResult<()> {
        let mut guard = self.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(closed_error)?;
        let result = tokio::time::timeout(self.query_timeout, handle.execute_raw(sql)).await;
        self.settle(&mut guard, result, sql).map(|_| ())
    }

    /// Run `body` inside a transaction.
    ///
    /// Commits when `body` succeeds and returns its value; a failed commit is
    /// rolled back and its error returned. When `body` fails
    /// the transaction is rolled back and the body's own error is returned;
    /// when it panics the transaction is rolled back and the panic resumes.
    /// Calling this while a transaction is open fails without running `body`.
    ///
    /// ```ignore
    /// let id = conn
    ///     .transaction(|c| Box::pin(async move {
    ///         c.execute("INSERT INTO @posts (title) VALUES (:title)", &bindings).await?;
    ///         c.last_insert_id().await
    ///     }))
    ///     .await?;
    /// ```
    pub async fn transaction<T, E, F>(&self, body: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c Connection) -> BoxFuture<'c, Result<T, E>>,
        E: From<DbError>,
    {
        self.begin_transaction().await?;

        match AssertUnwindSafe(body(self)).catch_unwind().await {
            Ok(Ok(value)) => match self.commit().await {
                Ok(()) => Ok(value),
                Err(e) => {
                    if self.in_transaction() {
                        self.rollback_after_failure().await;
                    }
                    Err(e.into())
                }
            },
            Ok(Err(err)) => {
                self.rollback_after_failure().await;
                Err(err)
            }
            Err(panic) => {
                self.rollback_after_failure().await;
                std::panic::resume_unwind(panic)
            }
        }
    }

    async fn rollback_after_failure(&self) {
        if let Err(e) = self.rollback().await {
            warn!(connection = %self.name, error = %e, "Rollback failed");
        }
    }

    // =========================================================================
    // Query log
    // =========================================================================

    pub fn enable_query_log(&self) {
        self.logging.store(true, Ordering::SeqCst);
    }

    pub fn disable_query_log(&self) {
        self.logging.store(false, Ordering::SeqCst);
    }

    pub fn logging(&self) -> bool {
        self.logging.load(Ordering::SeqCst)
    }

    /// Snapshot of the logged statements, oldest first.
    pub fn query_log(&self) -> Vec<QueryLogEntry> {
        lock(&self.query_log).clone()
    }

    pub fn flush_query_log(&self) {
        lock(&self.query_log).clear();
    }

    /// Close the driver handle. Later statements fail with a connection error.
    pub async fn close(&self) -> DbResult<()> {
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            handle.close().await?;
            info!(connection = %self.name, "Connection closed");
        }
        Ok(())
    }
}

async fn dispatch(
    handle: &mut DbHandle,
    compiled: &params::CompiledSql,
    fetch: Fetch,
) -> Result<Outcome, sqlx::Error> {
    crate::impl_db_dispatch!(handle, {
        MySql(conn) => run_query!(conn, compiled, fetch, bind_mysql_param,
            |done: &sqlx::mysql::MySqlQueryResult| {
                let id = done.last_insert_id();
                (id > 0).then(|| i64::try_from(id).ok()).flatten()
            }),
        Postgres(conn) => run_query!(conn, compiled, fetch, bind_postgres_param,
            |_: &sqlx::postgres::PgQueryResult| None),
        SQLite(conn) => run_query!(conn, compiled, fetch, bind_sqlite_param,
            |done: &sqlx::sqlite::SqliteQueryResult| {
                (done.rows_affected() > 0).then(|| done.last_insert_rowid())
            }),
    })
}

fn closed_error() -> DbError {
    DbError::connection("Connection is closed", "Reconnect to the database")
}

fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
