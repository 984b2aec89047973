//! Shared handles for callers of the crate: one injected store and a runner over it.

use crate::config::StoreConfig;
use crate::error::AppError;
use crate::store::{DataStore, MemoryStore, PgStore};
use crate::transaction::TransactionRunner;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DataStore>,
    pub runner: TransactionRunner,
}

impl AppState {
    pub fn new(store: Arc<dyn DataStore>, config: &StoreConfig) -> Self {
        let runner = TransactionRunner::new(Arc::clone(&store)).with_timeout(config.transaction_timeout);
        AppState { store, runner }
    }

    /// Connect a PostgreSQL pool per `config` and wrap it.
    pub async fn connect(config: &StoreConfig) -> Result<Self, AppError> {
        let pool = config.connect().await?;
        let store = PgStore::new(pool, config.schema.clone())?;
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn in_memory(store: MemoryStore) -> Self {
        Self::new(Arc::new(store), &StoreConfig::default())
    }
}
