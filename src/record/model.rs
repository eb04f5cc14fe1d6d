//! Active-record model.
//!
//! A [`Model`] holds one row's attributes plus a snapshot of the state last
//! synced with storage. `save()` inserts new rows and, for persisted rows,
//! updates only the columns whose value differs from the snapshot. When
//! nothing changed it touches no storage at all.

use super::entity::{Column, Entity};
use crate::db::ConnectionRegistry;
use crate::error::{DbError, DbResult};
use crate::models::{Bindings, Record, Value};
use crate::query::{IntoColumns, QueryBuilder};
use crate::resolver::ConnectionTarget;
use serde::{Serialize, Serializer};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::debug;

/// Outcome of [`Model::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Saved {
    /// A new row was written; carries the backend-assigned id, if any.
    Inserted(Option<i64>),
    Updated,
    /// Nothing changed since the last sync, no statement was run.
    Unchanged,
}

pub struct Model<E: Entity> {
    attributes: Record,
    original: Record,
    exists: bool,
    table: Option<String>,
    target: ConnectionTarget,
    entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Model<E> {
    pub fn new() -> Self {
        Self {
            attributes: Record::new(),
            original: Record::new(),
            exists: false,
            table: None,
            target: ConnectionTarget::new(),
            entity: PhantomData,
        }
    }

    /// Build a new, unsaved model from `attributes`.
    pub fn from_attributes(attributes: Record) -> DbResult<Self> {
        let mut model = Self::new();
        model.fill(attributes)?;
        Ok(model)
    }

    /// Insert a new row built from `attributes` through the global resolver.
    pub async fn create(attributes: Record) -> DbResult<Self> {
        Self::create_with(ConnectionTarget::new(), attributes).await
    }

    /// Insert a new row built from `attributes` through `target`.
    pub async fn create_with(target: ConnectionTarget, attributes: Record) -> DbResult<Self> {
        let mut model = Self::from_attributes(attributes)?.target(target);
        model.save().await?;
        Ok(model)
    }

    // --- connection selection ---

    pub fn on(mut self, name: impl Into<String>) -> Self {
        self.target = self.target.on(name);
        self
    }

    pub fn set_connection(&mut self, name: impl Into<String>) {
        self.target.set_name(Some(name.into()));
    }

    pub fn with_registry(mut self, registry: Arc<ConnectionRegistry>) -> Self {
        self.target = self.target.with_registry(registry);
        self
    }

    pub fn target(mut self, target: ConnectionTarget) -> Self {
        self.target = target;
        self
    }

    pub fn connection_target(&self) -> &ConnectionTarget {
        &self.target
    }

    // --- table and key ---

    pub fn table(&self) -> String {
        self.table.clone().unwrap_or_else(E::table_name)
    }

    pub fn set_table(&mut self, table: impl Into<String>) {
        self.table = Some(table.into());
    }

    pub fn key_name(&self) -> &'static str {
        E::PRIMARY_KEY
    }

    /// Current primary-key value; `None` when unset or NULL.
    pub fn key(&self) -> Option<&Value> {
        self.attributes.get(E::PRIMARY_KEY).filter(|v| !v.is_null())
    }

    pub fn set_key(&mut self, value: impl Into<Value>) -> DbResult<()> {
        self.set(E::PRIMARY_KEY, value)
    }

    /// The declared primary-key column; saving requires one.
    fn key_column(&self) -> DbResult<&'static Column> {
        E::column(E::PRIMARY_KEY).ok_or_else(|| {
            DbError::schema(
                format!("Primary key '{}' is not a declared column", E::PRIMARY_KEY),
                format!("{}.{}", self.table(), E::PRIMARY_KEY),
            )
        })
    }

    // --- attributes ---

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.attributes.get(column)
    }

    /// Set a declared column, converting the value to the column's kind.
    pub fn set(&mut self, column: &str, value: impl Into<Value>) -> DbResult<()> {
        let declared = E::column(column).ok_or_else(|| {
            DbError::schema(
                format!("Unknown column '{}'", column),
                format!("{}.{}", self.table(), column),
            )
        })?;
        let value = value.into();
        if value.is_null() && !declared.nullable {
            return Err(DbError::schema(
                format!("Column '{}' is not nullable", column),
                format!("{}.{}", self.table(), column),
            ));
        }
        self.attributes.insert(column, value.coerce(declared.kind)?);
        Ok(())
    }

    pub fn fill(&mut self, attributes: impl IntoIterator<Item = (String, Value)>) -> DbResult<()> {
        for (column, value) in attributes {
            self.set(&column, value)?;
        }
        Ok(())
    }

    pub fn unset(&mut self, column: &str) -> Option<Value> {
        self.attributes.remove(column)
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn attributes(&self) -> &Record {
        &self.attributes
    }

    pub fn original(&self) -> &Record {
        &self.original
    }

    /// Mark the current attributes as the synced state.
    pub fn sync(&mut self) {
        self.original = self.attributes.clone();
    }

    /// Discard unsaved changes.
    pub fn revert(&mut self) {
        self.attributes = self.original.clone();
    }

    /// Attributes that are new or changed since the last sync.
    pub fn diff(&self) -> Record {
        self.attributes.difference(&self.original)
    }

    pub fn is_dirty(&self) -> bool {
        !self.diff().is_empty()
    }

    // --- persistence ---

    /// A builder bound to this model's connection, defaulting to its table.
    pub fn query(&self) -> QueryBuilder {
        QueryBuilder::new()
            .target(self.target.clone())
            .default_table(self.table())
    }

    /// A builder scoped to this row's persisted key, with the key bindings.
    pub fn where_key(&self) -> DbResult<(QueryBuilder, Bindings)> {
        let key = self.persisted_key()?;
        Ok((
            self.query().where_(E::PRIMARY_KEY),
            Bindings::new().with(E::PRIMARY_KEY, key),
        ))
    }

    pub async fn save(&mut self) -> DbResult<Saved> {
        let saved = if self.exists {
            self.perform_update().await?
        } else {
            self.perform_insert().await?
        };
        self.sync();
        Ok(saved)
    }

    async fn perform_insert(&mut self) -> DbResult<Saved> {
        let key_column = self.key_column()?;
        // A NULL key is left for the backend to assign.
        let bindings: Bindings = self
            .attributes
            .iter()
            .filter(|(column, value)| !(*column == E::PRIMARY_KEY && value.is_null()))
            .map(|(column, value)| (column.to_string(), value.clone()))
            .collect();
        let columns: Vec<String> = bindings.keys().map(String::from).collect();

        let output = self
            .query()
            .insert(self.table())
            .values(columns)
            .returning(E::PRIMARY_KEY)
            .execute(&bindings)
            .await?;
        let id = output.insert_id();

        // The row is written; storing the id must not fail.
        if self.key().is_none() {
            match id {
                Some(id) => {
                    let key = Value::Int(id)
                        .coerce(key_column.kind)
                        .unwrap_or(Value::Int(id));
                    self.attributes.insert(E::PRIMARY_KEY, key);
                }
                None => {
                    self.attributes.remove(E::PRIMARY_KEY);
                }
            }
        }
        self.exists = true;
        debug!(table = %self.table(), id = ?id, "Inserted row");
        Ok(Saved::Inserted(id))
    }

    async fn perform_update(&mut self) -> DbResult<Saved> {
        let diff = self.diff();
        if diff.is_empty() {
            return Ok(Saved::Unchanged);
        }
        if diff.contains(E::PRIMARY_KEY) {
            return Err(DbError::invalid_input(format!(
                "Primary key '{}' of a persisted row cannot be changed",
                E::PRIMARY_KEY
            )));
        }
        let (scoped, key) = self.where_key()?;

        let columns: Vec<String> = diff.keys().map(String::from).collect();
        let bindings: Bindings = diff.into_iter().chain(key).collect();
        scoped
            .update(self.table())
            .set(columns)
            .execute(&bindings)
            .await?;
        Ok(Saved::Updated)
    }

    /// Delete the row, returning the affected count.
    pub async fn delete(&mut self) -> DbResult<u64> {
        if !self.exists {
            return Err(DbError::not_persisted(self.table()));
        }
        let (scoped, key) = self.where_key()?;

        let output = scoped.delete(self.table()).execute(&key).await?;
        match output.affected() {
            Some(0) | None => Err(DbError::row_not_found(self.table())),
            Some(affected) => {
                self.exists = false;
                Ok(affected)
            }
        }
    }

    fn persisted_key(&self) -> DbResult<Value> {
        self.original
            .get(E::PRIMARY_KEY)
            .filter(|v| !v.is_null())
            .cloned()
            .ok_or_else(|| {
                DbError::invalid_input(format!(
                    "Row in '{}' has no value for primary key '{}'",
                    self.table(),
                    E::PRIMARY_KEY
                ))
            })
    }

    // --- finders ---

    /// First row matching every `wheres` pair.
    pub async fn find(&self, wheres: &Bindings, columns: impl IntoColumns) -> DbResult<Option<Self>> {
        let row = self
            .select(columns, wheres)
            .limit(1)
            .single(wheres)
            .await?;
        row.map(|row| self.hydrate_one(row)).transpose()
    }

    pub async fn find_by(&self, column: &str, value: impl Into<Value>) -> DbResult<Option<Self>> {
        let wheres = Bindings::new().with(column, value);
        self.find(&wheres, Vec::<String>::new()).await
    }

    pub async fn find_by_id(&self, id: impl Into<Value>) -> DbResult<Option<Self>> {
        self.find_by(E::PRIMARY_KEY, id).await
    }

    pub async fn find_all(
        &self,
        columns: impl IntoColumns,
        wheres: &Bindings,
        limit: Option<u64>,
        offset: Option<u64>,
    ) -> DbResult<Vec<Self>> {
        let mut builder = self.select(columns, wheres);
        if let Some(limit) = limit {
            builder = builder.limit(limit);
        }
        if let Some(offset) = offset {
            builder = builder.offset(offset);
        }
        let rows = builder.execute(wheres).await?.into_rows();
        self.hydrate(rows)
    }

    /// One page of rows; pages start at 1 and page 0 is treated as 1.
    pub async fn find_all_for_page(
        &self,
        page: u64,
        per_page: u64,
        columns: impl IntoColumns,
        wheres: &Bindings,
    ) -> DbResult<Vec<Self>> {
        let offset = page.max(1).saturating_sub(1).saturating_mul(per_page);
        self.find_all(columns, wheres, Some(per_page), Some(offset))
            .await
    }

    fn select(&self, columns: impl IntoColumns, wheres: &Bindings) -> QueryBuilder {
        let conditions: Vec<String> = wheres.keys().map(String::from).collect();
        self.query()
            .select(columns)
            .from(self.table())
            .where_(conditions)
    }

    /// Turn rows into persisted models, converting values to declared kinds.
    ///
    /// Columns the entity does not declare are kept as decoded.
    pub fn hydrate(&self, rows: Vec<Record>) -> DbResult<Vec<Self>> {
        rows.into_iter().map(|row| self.hydrate_one(row)).collect()
    }

    /// Run a raw SELECT on this model's connection and hydrate the rows.
    pub async fn hydrate_query(&self, sql: &str, bindings: &Bindings) -> DbResult<Vec<Self>> {
        let conn = self.target.connection().await?;
        let rows = conn.all(sql, bindings).await?;
        self.hydrate(rows)
    }

    /// Turn rows into persisted models without converting any value.
    pub fn hydrate_raw(&self, rows: Vec<Record>) -> Vec<Self> {
        rows.into_iter()
            .map(|row| {
                let mut model = self.sibling();
                model.attributes = row;
                model.mark_persisted();
                model
            })
            .collect()
    }

    fn hydrate_one(&self, row: Record) -> DbResult<Self> {
        let mut model = self.sibling();
        model.fill_from_results(row)?;
        Ok(model)
    }

    /// Replace the attributes with a row loaded from storage.
    pub fn fill_from_results(&mut self, row: Record) -> DbResult<()> {
        let mut attributes = Record::new();
        for (column, value) in row {
            let value = match E::column(&column) {
                Some(declared) => value.coerce(declared.kind)?,
                None => value,
            };
            attributes.insert(column, value);
        }
        self.attributes = attributes;
        self.mark_persisted();
        Ok(())
    }

    fn mark_persisted(&mut self) {
        self.exists = true;
        self.sync();
    }

    /// An empty model sharing this one's table and connection.
    fn sibling(&self) -> Self {
        Self {
            table: self.table.clone(),
            target: self.target.clone(),
            ..Self::new()
        }
    }

    pub fn to_json(&self) -> DbResult<String> {
        self.attributes.to_json()
    }
}

impl<E: Entity> Default for Model<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity> Clone for Model<E> {
    fn clone(&self) -> Self {
        Self {
            attributes: self.attributes.clone(),
            original: self.original.clone(),
            exists: self.exists,
            table: self.table.clone(),
            target: self.target.clone(),
            entity: PhantomData,
        }
    }
}

impl<E: Entity> fmt::Debug for Model<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("table", &self.table())
            .field("attributes", &self.attributes)
            .field("exists", &self.exists)
            .finish()
    }
}

impl<E: Entity> fmt::Display for Model<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.attributes, f)
    }
}

impl<E: Entity> Serialize for Model<E> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.attributes.serialize(serializer)
    }
}
