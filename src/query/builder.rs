//! Fluent SQL builder.
//!
//! A [`QueryBuilder`] accumulates flat clause lists for one statement kind and
//! renders them in a single deterministic pass. Rendering is a pure function
//! of the builder state: the same state always yields byte-identical SQL, and
//! every list renders in insertion order.
//!
//! Identifiers passed to `field`, `set`, `values` and `where_` are bound
//! through `:name` placeholders. The `*_raw` variants inline a trusted SQL
//! fragment instead and must never receive user input.

use super::clause::{Field, IntoColumns, Order, QueryType, TableRef, upsert};
use crate::db::{Connection, ConnectionRegistry};
use crate::error::{DbError, DbResult};
use crate::models::{Bindings, DatabaseType, Record, Value};
use crate::resolver::ConnectionTarget;
use std::sync::Arc;

/// Result of [`QueryBuilder::execute`], shaped by the statement kind.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryOutput {
    Rows(Vec<Record>),
    Updated(u64),
    Deleted(u64),
    /// Backend-assigned id of the inserted row, when the backend reports one.
    Inserted(Option<i64>),
}

impl QueryOutput {
    pub fn into_rows(self) -> Vec<Record> {
        match self {
            Self::Rows(rows) => rows,
            _ => Vec::new(),
        }
    }

    /// Affected-row count for UPDATE and DELETE.
    pub fn affected(&self) -> Option<u64> {
        match self {
            Self::Updated(n) | Self::Deleted(n) => Some(*n),
            _ => None,
        }
    }

    pub fn insert_id(&self) -> Option<i64> {
        match self {
            Self::Inserted(id) => *id,
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query_type: Option<QueryType>,
    tables: Vec<TableRef>,
    default_table: Option<String>,
    fields: Vec<Field>,
    wheres: Vec<Field>,
    group_by: Vec<String>,
    having: Vec<String>,
    order_by: Vec<String>,
    order: Option<Order>,
    limit: Option<u64>,
    offset: Option<u64>,
    returning: Option<String>,
    target: ConnectionTarget,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    // --- connection selection ---

    /// Run against the named connection instead of the registry default.
    pub fn on(mut self, name: impl Into<String>) -> Self {
        self.target = self.target.on(name);
        self
    }

    /// Resolve connections from `registry` instead of the global resolver.
    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.target = self.target.with_registry(registry);
        self
    }

    pub fn target(mut self, target: ConnectionTarget) -> Self {
        self.target = target;
        self
    }

    // --- statement selectors ---

    pub fn select(mut self, columns: impl IntoColumns) -> Self {
        self.query_type = Some(QueryType::Select);
        self.field(columns)
    }

    /// `SELECT *`, unless fields are added later.
    pub fn select_all(mut self) -> Self {
        self.query_type = Some(QueryType::Select);
        self
    }

    /// Select `expression AS alias`.
    pub fn select_as(mut self, expression: impl Into<String>, alias: impl Into<String>) -> Self {
        self.query_type = Some(QueryType::Select);
        upsert(&mut self.fields, Field::literal(alias, expression));
        self
    }

    pub fn count(self, column: &str) -> Self {
        self.aggregate("COUNT", column)
    }

    pub fn min(self, column: &str) -> Self {
        self.aggregate("MIN", column)
    }

    pub fn max(self, column: &str) -> Self {
        self.aggregate("MAX", column)
    }

    fn aggregate(self, function: &str, column: &str) -> Self {
        self.select_as(format!("{}({})", function, column), column)
    }

    pub fn update(mut self, tables: impl IntoColumns) -> Self {
        self.query_type = Some(QueryType::Update);
        self.table(tables)
    }

    pub fn delete(mut self, tables: impl IntoColumns) -> Self {
        self.query_type = Some(QueryType::Delete);
        self.table(tables)
    }

    pub fn insert(mut self, tables: impl IntoColumns) -> Self {
        self.query_type = Some(QueryType::Insert);
        self.table(tables)
    }

    pub fn into(self, tables: impl IntoColumns) -> Self {
        self.table(tables)
    }

    pub fn from(self, tables: impl IntoColumns) -> Self {
        self.table(tables)
    }

    pub fn values(self, columns: impl IntoColumns) -> Self {
        self.field(columns)
    }

    pub fn values_raw(self, column: impl Into<String>, literal: impl Into<String>) -> Self {
        self.field_raw(column, literal)
    }

    pub fn set(self, columns: impl IntoColumns) -> Self {
        self.field(columns)
    }

    pub fn set_raw(self, column: impl Into<String>, literal: impl Into<String>) -> Self {
        self.field_raw(column, literal)
    }

    // --- tables ---

    pub fn table(mut self, tables: impl IntoColumns) -> Self {
        for name in tables.into_columns() {
            self.push_table(TableRef { name, alias: None });
        }
        self
    }

    pub fn table_as(mut self, name: impl Into<String>, alias: impl Into<String>) -> Self {
        self.push_table(TableRef {
            name: name.into(),
            alias: Some(alias.into()),
        });
        self
    }

    /// Table used when no table was named explicitly.
    pub fn default_table(mut self, name: impl Into<String>) -> Self {
        self.default_table = Some(name.into());
        self
    }

    pub fn remove_table(mut self, name: &str) -> Self {
        self.tables.retain(|t| t.name != name);
        self
    }

    fn push_table(&mut self, table: TableRef) {
        match self.tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => *existing = table,
            None => self.tables.push(table),
        }
    }

    // --- fields ---

    pub fn field(mut self, columns: impl IntoColumns) -> Self {
        for column in columns.into_columns() {
            upsert(&mut self.fields, Field::placeholder(column));
        }
        self
    }

    pub fn field_raw(mut self, column: impl Into<String>, literal: impl Into<String>) -> Self {
        upsert(&mut self.fields, Field::literal(column, literal));
        self
    }

    pub fn remove_field(mut self, column: &str) -> Self {
        self.fields.retain(|f| f.name != column);
        self
    }

    // --- filtering and shaping ---

    /// Add `column = :column` conditions, AND-combined.
    pub fn where_(mut self, columns: impl IntoColumns) -> Self {
        for column in columns.into_columns() {
            upsert(&mut self.wheres, Field::placeholder(column));
        }
        self
    }

    /// Add a `column = literal` condition.
    pub fn where_raw(mut self, column: impl Into<String>, literal: impl Into<String>) -> Self {
        upsert(&mut self.wheres, Field::literal(column, literal));
        self
    }

    pub fn remove_where(mut self, column: &str) -> Self {
        self.wheres.retain(|w| w.name != column);
        self
    }

    pub fn group_by(mut self, columns: impl IntoColumns) -> Self {
        for column in columns.into_columns() {
            if !self.group_by.contains(&column) {
                self.group_by.push(column);
            }
        }
        self
    }

    /// Raw HAVING expressions, AND-combined.
    pub fn having(mut self, expressions: impl IntoColumns) -> Self {
        self.having.extend(expressions.into_columns());
        self
    }

    pub fn order_by(mut self, columns: impl IntoColumns) -> Self {
        for column in columns.into_columns() {
            if !self.order_by.contains(&column) {
                self.order_by.push(column);
            }
        }
        self
    }

    pub fn order_by_asc(mut self, columns: impl IntoColumns) -> Self {
        self.order = Some(Order::Asc);
        self.order_by(columns)
    }

    pub fn order_by_desc(mut self, columns: impl IntoColumns) -> Self {
        self.order = Some(Order::Desc);
        self.order_by(columns)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// PostgreSQL only: return `column` from an INSERT.
    pub fn returning(mut self, column: impl Into<String>) -> Self {
        self.returning = Some(column.into());
        self
    }

    // --- inspection ---

    pub fn query_type(&self) -> Option<QueryType> {
        self.query_type
    }

    pub fn tables(&self) -> &[TableRef] {
        &self.tables
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn wheres(&self) -> &[Field] {
        &self.wheres
    }

    pub fn connection_target(&self) -> &ConnectionTarget {
        &self.target
    }

    // --- rendering ---

    /// Render generic SQL with `@` prefix tokens left in place.
    pub fn to_sql(&self) -> DbResult<String> {
        self.render(DatabaseType::MySql)
    }

    /// Render SQL in the dialect of `backend`, `@` tokens left in place.
    pub fn to_sql_for(&self, backend: DatabaseType) -> DbResult<String> {
        self.render(backend)
    }

    /// Final SQL for the resolved connection, table prefix applied.
    pub async fn query_string(&self) -> DbResult<String> {
        let conn = self.target.connection().await?;
        let sql = self.render(conn.database_type())?;
        Ok(conn.replace_prefix(&sql))
    }

    fn render(&self, backend: DatabaseType) -> DbResult<String> {
        let query_type = self
            .query_type
            .ok_or_else(|| DbError::query("Unknown query type"))?;
        let tables = match (&self.default_table, self.tables.is_empty()) {
            (_, false) => join(self.tables.iter().map(|t| t.to_string()), ", "),
            (Some(table), true) => table.clone(),
            (None, true) => return Err(DbError::query("No tables were found.")),
        };

        let mut sql = match query_type {
            QueryType::Select => {
                let fields = if self.fields.is_empty() {
                    "*".to_string()
                } else {
                    join(self.fields.iter().map(Field::selection), ", ")
                };
                format!("SELECT {} FROM {}", fields, tables)
            }
            QueryType::Update => {
                self.require_fields()?;
                format!(
                    "UPDATE {} SET {}",
                    tables,
                    join(self.fields.iter().map(Field::assignment), ", ")
                )
            }
            QueryType::Delete => format!("DELETE FROM {}", tables),
            QueryType::Insert => {
                self.require_fields()?;
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    tables,
                    join(self.fields.iter().map(|f| f.name.clone()), ", "),
                    join(self.fields.iter().map(Field::insert_value), ", ")
                )
            }
        };

        if query_type != QueryType::Insert && !self.wheres.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&join(self.wheres.iter().map(Field::assignment), " AND "));
        }

        if query_type == QueryType::Select {
            if !self.group_by.is_empty() {
                sql.push_str(" GROUP BY ");
                sql.push_str(&self.group_by.join(", "));
            }
            if !self.having.is_empty() {
                sql.push_str(" HAVING ");
                sql.push_str(&self.having.join(" AND "));
            }
            if !self.order_by.is_empty() {
                sql.push_str(" ORDER BY ");
                sql.push_str(&self.order_by.join(", "));
                if let Some(order) = self.order {
                    sql.push(' ');
                    sql.push_str(order.as_str());
                }
            }
            if let Some(limit) = self.limit {
                match (self.offset.filter(|o| *o > 0), backend) {
                    (Some(offset), DatabaseType::Postgres) => {
                        sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, offset))
                    }
                    (Some(offset), _) => sql.push_str(&format!(" LIMIT {}, {}", offset, limit)),
                    (None, _) => sql.push_str(&format!(" LIMIT {}", limit)),
                }
            }
        }

        if query_type == QueryType::Insert && backend == DatabaseType::Postgres {
            if let Some(column) = &self.returning {
                sql.push_str(" RETURNING ");
                sql.push_str(column);
            }
        }

        Ok(sql)
    }

    fn require_fields(&self) -> DbResult<()> {
        if self.fields.is_empty() {
            return Err(DbError::query("No fields were found."));
        }
        Ok(())
    }

    // --- execution ---

    /// Render for the resolved connection and run, shaping the output by statement kind.
    pub async fn execute(&self, bindings: &Bindings) -> DbResult<QueryOutput> {
        let conn = self.target.connection().await?;
        let sql = self.render(conn.database_type())?;

        match self.query_type {
            Some(QueryType::Select) => Ok(QueryOutput::Rows(conn.all(&sql, bindings).await?)),
            Some(QueryType::Update) => Ok(QueryOutput::Updated(conn.execute(&sql, bindings).await?)),
            Some(QueryType::Delete) => Ok(QueryOutput::Deleted(conn.execute(&sql, bindings).await?)),
            Some(QueryType::Insert) => self.run_insert(&conn, &sql, bindings).await,
            None => Err(DbError::query("Unknown query type")),
        }
    }

    async fn run_insert(
        &self,
        conn: &Connection,
        sql: &str,
        bindings: &Bindings,
    ) -> DbResult<QueryOutput> {
        if conn.database_type() == DatabaseType::Postgres {
            // Without RETURNING there is no id to report; lastval() would fail
            // for tables without a sequence and abort an open transaction.
            if self.returning.is_none() {
                conn.execute(sql, bindings).await?;
                return Ok(QueryOutput::Inserted(None));
            }
            let id = conn.single(sql, bindings).await?;
            return Ok(QueryOutput::Inserted(id.as_ref().and_then(Value::as_i64)));
        }

        conn.execute(sql, bindings).await?;
        Ok(QueryOutput::Inserted(conn.last_insert_id().await?))
    }

    /// First row of a SELECT, or `None` when nothing matched.
    pub async fn single(&self, bindings: &Bindings) -> DbResult<Option<Record>> {
        let conn = self.select_connection().await?;
        let sql = self.render(conn.database_type())?;
        conn.row(&sql, bindings).await
    }

    /// First column of the first row of a SELECT.
    pub async fn scalar(&self, bindings: &Bindings) -> DbResult<Option<Value>> {
        let conn = self.select_connection().await?;
        let sql = self.render(conn.database_type())?;
        conn.single(&sql, bindings).await
    }

    async fn select_connection(&self) -> DbResult<Arc<Connection>> {
        match self.query_type {
            Some(QueryType::Select) => self.target.connection().await,
            Some(other) => Err(DbError::query(format!(
                "single() requires a SELECT statement, got {}",
                other
            ))),
            None => Err(DbError::query("Unknown query type")),
        }
    }
}

fn join(parts: impl Iterator<Item = String>, separator: &str) -> String {
    parts.collect::<Vec<_>>().join(separator)
}
