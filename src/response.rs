//! Standard response envelope.
//!
//! Every operation result, success or failure, is rendered through [`Envelope`] so the
//! boundary layer always serializes the same top-level shape:
//!
//! ```text
//! { "success": true,  "message": ..., "data": ...,                        "timestamp": ... }
//! { "success": false, "message": ..., "error": { "code": ..., "details": ... }, "timestamp": ... }
//! ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

pub const DEFAULT_SUCCESS_MESSAGE: &str = "Success";
pub const DEFAULT_ERROR_MESSAGE: &str = "Something went wrong";
pub const DEFAULT_ERROR_CODE: &str = "INTERNAL_ERROR";

/// Outcome-specific part of an envelope. Exactly one of payload or error code exists.
#[derive(Clone, Debug, PartialEq)]
pub enum Body {
    Data(Value),
    Error {
        code: String,
        details: Option<Value>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    message: String,
    body: Body,
    /// Forwarded to the transport; not interpreted here.
    status: StatusCode,
    timestamp: DateTime<Utc>,
}

/// Success envelope wrapping `data`.
pub fn build_success(data: Value, message: &str, status: StatusCode) -> Envelope {
    Envelope {
        message: message.to_string(),
        body: Body::Data(data),
        status,
        timestamp: Utc::now(),
    }
}

/// Error envelope. An empty `code` falls back to [`DEFAULT_ERROR_CODE`].
pub fn build_error(message: &str, code: &str, status: StatusCode, details: Option<Value>) -> Envelope {
    let code = if code.is_empty() { DEFAULT_ERROR_CODE } else { code };
    Envelope {
        message: message.to_string(),
        body: Body::Error {
            code: code.to_string(),
            details,
        },
        status,
        timestamp: Utc::now(),
    }
}

impl Envelope {
    /// `build_success(data, "Success", 200)`.
    pub fn ok(data: Value) -> Self {
        build_success(data, DEFAULT_SUCCESS_MESSAGE, StatusCode::OK)
    }

    /// `build_error("Something went wrong", "INTERNAL_ERROR", 500, None)`.
    pub fn internal_error() -> Self {
        build_error(
            DEFAULT_ERROR_MESSAGE,
            DEFAULT_ERROR_CODE,
            StatusCode::INTERNAL_SERVER_ERROR,
            None,
        )
    }

    pub fn succeeded(&self) -> bool {
        matches!(self.body, Body::Data(_))
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn body(&self) -> &Body {
        &self.body
    }

    pub fn payload(&self) -> Option<&Value> {
        match &self.body {
            Body::Data(v) => Some(v),
            Body::Error { .. } => None,
        }
    }

    pub fn error_code(&self) -> Option<&str> {
        match &self.body {
            Body::Error { code, .. } => Some(code),
            Body::Data(_) => None,
        }
    }

    pub fn error_details(&self) -> Option<&Value> {
        match &self.body {
            Body::Error { details, .. } => details.as_ref(),
            Body::Data(_) => None,
        }
    }

    pub fn status_hint(&self) -> StatusCode {
        self.status
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Field-wise equality ignoring the generation time.
    pub fn same_content(&self, other: &Envelope) -> bool {
        self.message == other.message && self.body == other.body && self.status == other.status
    }

    pub fn into_payload(self) -> Option<Value> {
        match self.body {
            Body::Data(v) => Some(v),
            Body::Error { .. } => None,
        }
    }
}

#[derive(Serialize)]
struct SuccessWire<'a> {
    success: bool,
    message: &'a str,
    data: &'a Value,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorWire<'a> {
    success: bool,
    message: &'a str,
    error: ErrorDetail<'a>,
    timestamp: String,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<&'a Value>,
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let timestamp = self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true);
        match &self.body {
            Body::Data(data) => SuccessWire {
                success: true,
                message: &self.message,
                data,
                timestamp,
            }
            .serialize(serializer),
            Body::Error { code, details } => ErrorWire {
                success: false,
                message: &self.message,
                error: ErrorDetail {
                    code,
                    details: details.as_ref(),
                },
                timestamp,
            }
            .serialize(serializer),
        }
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}
