//! Data-store seam. A [`DataStore`] hands out one [`StoreTx`] per transaction; all writes go
//! through that scope and become visible to other readers only after `commit`.
//!
//! Rows are JSON objects. Every row carries an integer `id` and a `version` that increases on
//! each update and backs optimistic-concurrency checks.

use crate::error::TxError;
use async_trait::async_trait;
use serde_json::Value;

mod memory;
mod postgres;

pub use memory::{MemoryStore, MemoryTx};
pub use postgres::{PgStore, PgTx};

/// Field name to value, as written to one row.
pub type Fields = serde_json::Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const VERSION_FIELD: &str = "version";
pub const CREATED_AT_FIELD: &str = "createdAt";

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Acquire a connection and open an atomic scope on it.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, TxError>;
}

/// One open atomic scope. Dropping it without `commit` discards every write made through it.
#[async_trait]
pub trait StoreTx: Send {
    /// Insert a row and return it with `id` and `version` assigned.
    async fn insert(&mut self, entity: &str, fields: &Fields) -> Result<Value, TxError>;

    async fn get(&mut self, entity: &str, id: i64) -> Result<Option<Value>, TxError>;

    /// Update a row only if it is still at `expected_version`; the returned row has the bumped version.
    async fn update(
        &mut self,
        entity: &str,
        id: i64,
        expected_version: i64,
        fields: &Fields,
    ) -> Result<Value, TxError>;

    async fn list(&mut self, entity: &str, query: &ListQuery) -> Result<Vec<Value>, TxError>;

    async fn commit(&mut self) -> Result<(), TxError>;

    async fn rollback(&mut self) -> Result<(), TxError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Projection, ordering and pagination for [`StoreTx::list`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ListQuery {
    /// Columns to return. `None` returns whole rows.
    pub select: Option<Vec<String>>,
    pub order_by: Option<(String, SortOrder)>,
    pub offset: u32,
    pub limit: Option<u32>,
}

impl ListQuery {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 1000;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.select = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((column.into(), order));
        self
    }

    pub fn skip(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    pub fn take(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Limit actually applied: default 10, at most 1000.
    pub fn effective_limit(&self) -> u32 {
        self.limit.unwrap_or(Self::DEFAULT_LIMIT).min(Self::MAX_LIMIT)
    }

    pub(crate) fn validate(&self) -> Result<(), TxError> {
        let columns = self.select.iter().flatten().chain(self.order_by.as_ref().map(|(c, _)| c));
        for col in columns {
            ensure_identifier(col)?;
        }
        Ok(())
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, at most 63 bytes (PostgreSQL's identifier limit).
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(crate) fn ensure_identifier(name: &str) -> Result<(), TxError> {
    if is_valid_identifier(name) {
        Ok(())
    } else {
        Err(TxError::Validation(format!("invalid identifier: {}", name)))
    }
}

/// Entity name and field names must be identifiers; `id`, `version` and `createdAt` are store-managed.
pub(crate) fn ensure_writable(entity: &str, fields: &Fields) -> Result<(), TxError> {
    ensure_identifier(entity)?;
    for name in fields.keys() {
        ensure_identifier(name)?;
        if name == ID_FIELD || name == VERSION_FIELD || name == CREATED_AT_FIELD {
            return Err(TxError::Validation(format!("field '{}' is managed by the store", name)));
        }
    }
    Ok(())
}

/// Read committed rows in a scope of their own that is rolled back afterwards.
pub async fn list_committed(
    store: &dyn DataStore,
    entity: &str,
    query: &ListQuery,
) -> Result<Vec<Value>, TxError> {
    let mut tx = store.begin().await?;
    let rows = tx.list(entity, query).await;
    if let Err(e) = tx.rollback().await {
        tracing::debug!(error = %e, "read-only scope rollback failed");
    }
    rows
}

pub(crate) fn row_id(row: &Value) -> Option<i64> {
    row.get(ID_FIELD).and_then(Value::as_i64)
}

pub(crate) fn row_version(row: &Value) -> Option<i64> {
    row.get(VERSION_FIELD).and_then(Value::as_i64)
}
