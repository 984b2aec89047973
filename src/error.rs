//! Typed errors, failure taxonomy and HTTP mapping.

use crate::response::{build_error, Envelope, DEFAULT_ERROR_MESSAGE};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Category of a failed operation. Drives the error code and status hint of the envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Caller input violates a contract. Not retryable without fixing input.
    Validation,
    /// Store unreachable, scope could not be opened, or the caller gave up waiting.
    StoreUnavailable,
    /// Optimistic-concurrency collision. Retryable after re-reading.
    Conflict,
    Internal,
}

impl ErrorKind {
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorKind::Conflict => "CONFLICT_ERROR",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }

    pub fn status(self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::BAD_REQUEST,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::StoreUnavailable | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::StoreUnavailable | ErrorKind::Conflict)
    }

    /// User-facing message for a transaction that ended in this kind of failure.
    pub fn rollback_message(self) -> &'static str {
        match self {
            ErrorKind::Validation => "Transaction rolled back: validation failed",
            ErrorKind::StoreUnavailable => "Transaction rolled back: data store unavailable",
            ErrorKind::Conflict => "Transaction rolled back: concurrent update conflict",
            ErrorKind::Internal => "Transaction rolled back: internal error",
        }
    }
}

/// Failure of a store operation or transaction step.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TxError {
    #[error("validation: {0}")]
    Validation(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("internal: {0}")]
    Internal(String),
}

impl TxError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TxError::Validation(_) => ErrorKind::Validation,
            TxError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
            TxError::Conflict(_) => ErrorKind::Conflict,
            TxError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Diagnostic text without the kind prefix.
    pub fn reason(&self) -> &str {
        match self {
            TxError::Validation(r)
            | TxError::StoreUnavailable(r)
            | TxError::Conflict(r)
            | TxError::Internal(r) => r,
        }
    }
}

impl From<sqlx::Error> for TxError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => TxError::StoreUnavailable(e.to_string()),
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // not_null_violation, foreign_key_violation, check_violation, string_data_right_truncation
                Some("23502" | "23503" | "23514" | "22001") => TxError::Validation(db.message().to_string()),
                // serialization_failure, deadlock_detected, unique_violation
                Some("40001" | "40P01" | "23505") => TxError::Conflict(db.message().to_string()),
                _ => TxError::Internal(e.to_string()),
            },
            _ => TxError::Internal(e.to_string()),
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Store(#[from] TxError),
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Config(_) => ErrorKind::Internal,
            AppError::Store(e) => e.kind(),
        }
    }

    /// Error envelope with a stable message; the error text goes to `details.reason`.
    pub fn to_envelope(&self) -> Envelope {
        let kind = self.kind();
        build_error(
            DEFAULT_ERROR_MESSAGE,
            kind.code(),
            kind.status(),
            Some(serde_json::json!({ "reason": self.to_string() })),
        )
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Store(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        self.to_envelope().into_response()
    }
}
