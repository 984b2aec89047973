//! In-process store. Each transaction stages its writes privately and validates, at commit,
//! that every committed row it read is still at the version it saw.

use super::{
    ensure_identifier, ensure_writable, row_id, row_version, DataStore, Fields, ListQuery, SortOrder,
    StoreTx, CREATED_AT_FIELD, ID_FIELD, VERSION_FIELD,
};
use crate::error::TxError;
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

type RowKey = (String, i64);

#[derive(Default)]
struct Shared {
    tables: HashMap<String, BTreeMap<i64, Value>>,
    next_id: i64,
}

fn lock(shared: &Mutex<Shared>) -> Result<MutexGuard<'_, Shared>, TxError> {
    shared
        .lock()
        .map_err(|_| TxError::Internal("memory store lock poisoned".into()))
}

#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Mutex<Shared>>,
    available: Arc<AtomicBool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            shared: Arc::new(Mutex::new(Shared::default())),
            available: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Simulate the store going offline (`false`) or coming back. Offline stores refuse
    /// `begin` and `commit`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, AtomicOrdering::SeqCst);
    }

    /// Committed rows of `entity`, ordered by id.
    pub fn committed(&self, entity: &str) -> Vec<Value> {
        lock(&self.shared)
            .map(|s| s.tables.get(entity).map(|t| t.values().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DataStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, TxError> {
        if !self.available.load(AtomicOrdering::SeqCst) {
            return Err(TxError::StoreUnavailable("memory store is offline".into()));
        }
        Ok(Box::new(MemoryTx {
            shared: Arc::clone(&self.shared),
            available: Arc::clone(&self.available),
            staged: BTreeMap::new(),
            observed: HashMap::new(),
            finished: false,
        }))
    }
}

pub struct MemoryTx {
    shared: Arc<Mutex<Shared>>,
    available: Arc<AtomicBool>,
    /// Rows written in this scope, invisible to everyone else until commit.
    staged: BTreeMap<RowKey, Value>,
    /// Committed version of each row at the time this scope first read it.
    observed: HashMap<RowKey, i64>,
    finished: bool,
}

impl MemoryTx {
    fn ensure_open(&self) -> Result<(), TxError> {
        if self.finished {
            return Err(TxError::Internal("transaction already finished".into()));
        }
        Ok(())
    }

    fn read(&mut self, entity: &str, id: i64) -> Result<Option<Value>, TxError> {
        let key = (entity.to_string(), id);
        if let Some(row) = self.staged.get(&key) {
            return Ok(Some(row.clone()));
        }
        let committed = lock(&self.shared)?
            .tables
            .get(entity)
            .and_then(|t| t.get(&id))
            .cloned();
        if let Some(row) = &committed {
            self.observed.entry(key).or_insert(row_version(row).unwrap_or(0));
        }
        Ok(committed)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn insert(&mut self, entity: &str, fields: &Fields) -> Result<Value, TxError> {
        self.ensure_open()?;
        ensure_writable(entity, fields)?;
        let id = {
            let mut shared = lock(&self.shared)?;
            shared.next_id += 1;
            shared.next_id
        };
        let mut row = fields.clone();
        row.insert(ID_FIELD.into(), Value::from(id));
        row.insert(VERSION_FIELD.into(), Value::from(1));
        row.insert(
            CREATED_AT_FIELD.into(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)),
        );
        let row = Value::Object(row);
        tracing::debug!(entity, id, "staged insert");
        self.staged.insert((entity.to_string(), id), row.clone());
        Ok(row)
    }

    async fn get(&mut self, entity: &str, id: i64) -> Result<Option<Value>, TxError> {
        self.ensure_open()?;
        ensure_identifier(entity)?;
        self.read(entity, id)
    }

    async fn update(
        &mut self,
        entity: &str,
        id: i64,
        expected_version: i64,
        fields: &Fields,
    ) -> Result<Value, TxError> {
        self.ensure_open()?;
        ensure_writable(entity, fields)?;
        let current = self
            .read(entity, id)?
            .ok_or_else(|| TxError::Validation(format!("{} {} not found", entity, id)))?;
        let version = row_version(&current).unwrap_or(0);
        if version != expected_version {
            return Err(TxError::Conflict(format!(
                "{} {} is at version {}, expected {}",
                entity, id, version, expected_version
            )));
        }
        let mut row = current.as_object().cloned().unwrap_or_default();
        for (k, v) in fields {
            row.insert(k.clone(), v.clone());
        }
        row.insert(VERSION_FIELD.into(), Value::from(version + 1));
        let row = Value::Object(row);
        tracing::debug!(entity, id, version = version + 1, "staged update");
        self.staged.insert((entity.to_string(), id), row.clone());
        Ok(row)
    }

    async fn list(&mut self, entity: &str, query: &ListQuery) -> Result<Vec<Value>, TxError> {
        self.ensure_open()?;
        ensure_identifier(entity)?;
        query.validate()?;
        let mut by_id = lock(&self.shared)?.tables.get(entity).cloned().unwrap_or_default();
        for ((e, id), row) in &self.staged {
            if e == entity {
                by_id.insert(*id, row.clone());
            }
        }
        let mut rows: Vec<Value> = by_id.into_values().collect();
        if let Some((column, order)) = &query.order_by {
            rows.sort_by(|a, b| {
                let ord = compare(a.get(column), b.get(column)).then_with(|| row_id(a).cmp(&row_id(b)));
                match order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
        }
        Ok(rows
            .into_iter()
            .skip(query.offset as usize)
            .take(query.effective_limit() as usize)
            .map(|row| project(row, query.select.as_deref()))
            .collect())
    }

    async fn commit(&mut self) -> Result<(), TxError> {
        self.ensure_open()?;
        self.finished = true;
        if !self.available.load(AtomicOrdering::SeqCst) {
            return Err(TxError::StoreUnavailable("memory store is offline".into()));
        }
        let shared = Arc::clone(&self.shared);
        let mut shared = lock(&shared)?;
        for ((entity, id), seen) in &self.observed {
            let current = shared.tables.get(entity).and_then(|t| t.get(id)).and_then(row_version);
            if current != Some(*seen) {
                return Err(TxError::Conflict(format!("{} {} changed since it was read", entity, id)));
            }
        }
        for ((entity, id), row) in std::mem::take(&mut self.staged) {
            shared.tables.entry(entity).or_default().insert(id, row);
        }
        self.observed.clear();
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), TxError> {
        self.ensure_open()?;
        self.finished = true;
        self.staged.clear();
        self.observed.clear();
        Ok(())
    }
}

/// Nulls and missing values sort first; mixed types compare equal.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None | Some(Value::Null), None | Some(Value::Null)) => Ordering::Equal,
        (None | Some(Value::Null), _) => Ordering::Less,
        (_, None | Some(Value::Null)) => Ordering::Greater,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        _ => Ordering::Equal,
    }
}

fn project(row: Value, columns: Option<&[String]>) -> Value {
    let Some(columns) = columns else {
        return row;
    };
    let Value::Object(mut map) = row else {
        return row;
    };
    let projected: Fields = columns
        .iter()
        .filter_map(|c| map.remove(c).map(|v| (c.clone(), v)))
        .collect();
    Value::Object(projected)
}
