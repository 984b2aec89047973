//! Store settings from environment variables. Env files are not read here; the embedding
//! process decides how its environment is populated.

use crate::error::{ConfigError, TxError};
use crate::store::is_valid_identifier;
use sqlx::PgPool;
use std::time::Duration;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const SCHEMA: &str = "TASKBOARD_SCHEMA";
pub const MAX_CONNECTIONS: &str = "TASKBOARD_MAX_CONNECTIONS";
pub const TX_TIMEOUT_MS: &str = "TASKBOARD_TX_TIMEOUT_MS";

const DEFAULT_DATABASE_URL: &str = "postgres://localhost/taskboard";
const DEFAULT_SCHEMA: &str = "taskboard";
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreConfig {
    pub database_url: String,
    /// Schema holding the entity tables. Must be a valid PostgreSQL identifier.
    pub schema: String,
    pub max_connections: u32,
    /// Upper bound for one whole transaction. `None` waits indefinitely.
    pub transaction_timeout: Option<Duration>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            database_url: DEFAULT_DATABASE_URL.into(),
            schema: DEFAULT_SCHEMA.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            transaction_timeout: None,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = StoreConfig::default();

        let schema = get(SCHEMA).unwrap_or(defaults.schema);
        if !is_valid_identifier(&schema) {
            return Err(ConfigError::Invalid {
                key: SCHEMA,
                reason: format!("'{}' is not a valid identifier", schema),
            });
        }

        let max_connections = match get(MAX_CONNECTIONS) {
            Some(raw) => match raw.parse::<u32>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: MAX_CONNECTIONS,
                        reason: format!("expected a positive integer, got '{}'", raw),
                    })
                }
            },
            None => defaults.max_connections,
        };

        let transaction_timeout = get(TX_TIMEOUT_MS)
            .map(|raw| {
                raw.parse::<u64>().map(Duration::from_millis).map_err(|_| ConfigError::Invalid {
                    key: TX_TIMEOUT_MS,
                    reason: format!("expected milliseconds, got '{}'", raw),
                })
            })
            .transpose()?;

        Ok(StoreConfig {
            database_url: get(DATABASE_URL).unwrap_or(defaults.database_url),
            schema,
            max_connections,
            transaction_timeout,
        })
    }

    /// Open the connection pool. Connections are acquired per transaction, never held globally.
    pub async fn connect(&self) -> Result<PgPool, TxError> {
        sqlx::postgres::PgPoolOptions::new()
            .max_connections(self.max_connections)
            .connect(&self.database_url)
            .await
            .map_err(|e| TxError::StoreUnavailable(e.to_string()))
    }
}
