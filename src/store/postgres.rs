//! PostgreSQL store over an injected `PgPool`. Identifiers are validated and quoted, values
//! travel as one JSONB parameter expanded with `jsonb_populate_record`, so PostgreSQL applies
//! each column's own type.
//!
//! Tables are expected to exist with `"id" BIGSERIAL PRIMARY KEY`, `"version" BIGINT NOT NULL
//! DEFAULT 1` and `"createdAt" TIMESTAMPTZ NOT NULL DEFAULT NOW()`.

use super::{
    ensure_identifier, ensure_writable, DataStore, Fields, ListQuery, SortOrder, StoreTx, ID_FIELD,
    VERSION_FIELD,
};
use crate::error::TxError;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};

/// Quote identifier for PostgreSQL (callers validate it first).
fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn qualified_table(schema: &str, table: &str) -> String {
    format!("{}.{}", quoted(schema), quoted(table))
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Param {
    Json(Value),
    Int(i64),
}

#[derive(Debug)]
pub(crate) struct QueryBuf {
    pub sql: String,
    pub params: Vec<Param>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, p: Param) -> usize {
        self.params.push(p);
        self.params.len()
    }
}

/// `INSERT ... RETURNING to_jsonb(t)`; empty `fields` inserts defaults only.
pub(crate) fn insert_sql(schema: &str, entity: &str, fields: &Fields) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, entity);
    if fields.is_empty() {
        q.sql = format!("INSERT INTO {} AS t DEFAULT VALUES RETURNING to_jsonb(t)", table);
        return q;
    }
    let cols = fields.keys().map(|k| quoted(k)).collect::<Vec<_>>().join(", ");
    let n = q.push_param(Param::Json(Value::Object(fields.clone())));
    q.sql = format!(
        "INSERT INTO {table} AS t ({cols}) SELECT {cols} FROM jsonb_populate_record(NULL::{table}, ${n}) RETURNING to_jsonb(t)"
    );
    q
}

pub(crate) fn select_by_id_sql(schema: &str, entity: &str, id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Param::Int(id));
    q.sql = format!(
        "SELECT to_jsonb(t) FROM {} AS t WHERE t.{} = ${}",
        qualified_table(schema, entity),
        quoted(ID_FIELD),
        n
    );
    q
}

/// Versioned update: matches zero rows when the row moved past `expected_version`.
pub(crate) fn update_sql(schema: &str, entity: &str, id: i64, expected_version: i64, fields: &Fields) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(schema, entity);
    let version = quoted(VERSION_FIELD);
    let mut sets: Vec<String> = fields.keys().map(|k| format!("{} = r.{}", quoted(k), quoted(k))).collect();
    sets.push(format!("{version} = t.{version} + 1"));
    let data = q.push_param(Param::Json(Value::Object(fields.clone())));
    let id_param = q.push_param(Param::Int(id));
    let version_param = q.push_param(Param::Int(expected_version));
    q.sql = format!(
        "UPDATE {table} AS t SET {} FROM jsonb_populate_record(NULL::{table}, ${data}) AS r WHERE t.{} = ${id_param} AND t.{version} = ${version_param} RETURNING to_jsonb(t)",
        sets.join(", "),
        quoted(ID_FIELD),
    );
    q
}

pub(crate) fn list_sql(schema: &str, entity: &str, query: &ListQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let projection = match &query.select {
        Some(cols) => format!(
            "jsonb_build_object({})",
            cols.iter()
                .map(|c| format!("'{}', t.{}", c, quoted(c)))
                .collect::<Vec<_>>()
                .join(", ")
        ),
        None => "to_jsonb(t)".to_string(),
    };
    let mut sql = format!("SELECT {} FROM {} AS t", projection, qualified_table(schema, entity));
    if let Some((col, order)) = &query.order_by {
        let dir = match order {
            SortOrder::Asc => "ASC NULLS FIRST",
            SortOrder::Desc => "DESC NULLS LAST",
        };
        sql.push_str(&format!(" ORDER BY t.{} {}, t.{} {}", quoted(col), dir, quoted(ID_FIELD), dir));
    }
    let limit = q.push_param(Param::Int(i64::from(query.effective_limit())));
    let offset = q.push_param(Param::Int(i64::from(query.offset)));
    sql.push_str(&format!(" LIMIT ${} OFFSET ${}", limit, offset));
    q.sql = sql;
    q
}

async fn fetch_optional(conn: &mut PgConnection, q: &QueryBuf) -> Result<Option<Value>, TxError> {
    tracing::debug!(sql = %q.sql, "query (tx)");
    let mut query = sqlx::query_scalar::<Postgres, Value>(&q.sql);
    for p in &q.params {
        query = match p {
            Param::Json(v) => query.bind(v.clone()),
            Param::Int(n) => query.bind(*n),
        };
    }
    Ok(query.fetch_optional(conn).await?)
}

async fn fetch_all(conn: &mut PgConnection, q: &QueryBuf) -> Result<Vec<Value>, TxError> {
    tracing::debug!(sql = %q.sql, "query (tx)");
    let mut query = sqlx::query_scalar::<Postgres, Value>(&q.sql);
    for p in &q.params {
        query = match p {
            Param::Json(v) => query.bind(v.clone()),
            Param::Int(n) => query.bind(*n),
        };
    }
    Ok(query.fetch_all(conn).await?)
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    schema: String,
}

impl PgStore {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Result<Self, TxError> {
        let schema = schema.into();
        ensure_identifier(&schema)?;
        Ok(PgStore { pool, schema })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl DataStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, TxError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| TxError::StoreUnavailable(e.to_string()))?;
        Ok(Box::new(PgTx {
            tx: Some(tx),
            schema: self.schema.clone(),
        }))
    }
}

/// Open PostgreSQL transaction. sqlx rolls it back if dropped while still open.
pub struct PgTx {
    tx: Option<Transaction<'static, Postgres>>,
    schema: String,
}

impl PgTx {
    fn conn(&mut self) -> Result<&mut PgConnection, TxError> {
        self.tx
            .as_deref_mut()
            .ok_or_else(|| TxError::Internal("transaction already finished".into()))
    }

    fn take(&mut self) -> Result<Transaction<'static, Postgres>, TxError> {
        self.tx
            .take()
            .ok_or_else(|| TxError::Internal("transaction already finished".into()))
    }
}

#[async_trait]
impl StoreTx for PgTx {
    async fn insert(&mut self, entity: &str, fields: &Fields) -> Result<Value, TxError> {
        ensure_writable(entity, fields)?;
        let q = insert_sql(&self.schema, entity, fields);
        fetch_optional(self.conn()?, &q)
            .await?
            .ok_or_else(|| TxError::Internal(format!("insert into {} returned no row", entity)))
    }

    async fn get(&mut self, entity: &str, id: i64) -> Result<Option<Value>, TxError> {
        ensure_identifier(entity)?;
        let q = select_by_id_sql(&self.schema, entity, id);
        fetch_optional(self.conn()?, &q).await
    }

    async fn update(
        &mut self,
        entity: &str,
        id: i64,
        expected_version: i64,
        fields: &Fields,
    ) -> Result<Value, TxError> {
        ensure_writable(entity, fields)?;
        let q = update_sql(&self.schema, entity, id, expected_version, fields);
        if let Some(row) = fetch_optional(self.conn()?, &q).await? {
            return Ok(row);
        }
        match self.get(entity, id).await? {
            Some(_) => Err(TxError::Conflict(format!(
                "{} {} is no longer at version {}",
                entity, id, expected_version
            ))),
            None => Err(TxError::Validation(format!("{} {} not found", entity, id))),
        }
    }

    async fn list(&mut self, entity: &str, query: &ListQuery) -> Result<Vec<Value>, TxError> {
        ensure_identifier(entity)?;
        query.validate()?;
        let q = list_sql(&self.schema, entity, query);
        fetch_all(self.conn()?, &q).await
    }

    async fn commit(&mut self) -> Result<(), TxError> {
        self.take()?.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TxError> {
        self.take()?.rollback().await?;
        Ok(())
    }
}
