//! Taskboard core: uniform response envelopes and atomic multi-step writes.
//!
//! Callers build [`WriteStep`]s (or their own [`TransactionStep`]s), hand them to a
//! [`TransactionRunner`] over an injected [`DataStore`], and get back an [`Envelope`] that the
//! transport layer serializes as-is.

pub mod config;
pub mod error;
pub mod response;
pub mod service;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod transaction;

pub use config::StoreConfig;
pub use error::{AppError, ConfigError, ErrorKind, TxError};
pub use response::{build_error, build_success, Body, Envelope};
pub use service::{ProjectService, TaskService, UserService};
pub use state::AppState;
pub use store::{DataStore, ListQuery, MemoryStore, PgStore, SortOrder, StoreTx};
pub use telemetry::{init_tracing, try_init_tracing};
pub use transaction::{
    FieldValue, StepFailure, StepScope, TransactionOutcome, TransactionRunner, TransactionStep, TxState, WriteStep,
};
