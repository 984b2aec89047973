//! Task operations.

use super::model::{create_task, TASK};
use crate::response::{build_error, build_success, Envelope};
use crate::store::{list_committed, DataStore, ListQuery, SortOrder, CREATED_AT_FIELD};
use crate::transaction::{FieldValue, TransactionRunner, TransactionStep};
use axum::http::StatusCode;
use serde_json::{json, Value};

pub const TASK_CREATED: &str = "Task created successfully";
pub const TASKS_FETCHED: &str = "Tasks fetched successfully";

pub struct TaskService;

impl TaskService {
    /// Check an incoming task body before anything is written. A body without a usable
    /// `title` gets a 400 `VALIDATION_ERROR`; scalars and arrays have no fields, so they
    /// land there too. A `null` body cannot be inspected at all and is a 500 `TASK_ERROR`.
    /// Valid bodies are echoed back with 201.
    pub fn validate_body(body: &Value) -> Envelope {
        if body.is_null() {
            return build_error("Task creation failed", "TASK_ERROR", StatusCode::INTERNAL_SERVER_ERROR, None);
        }
        let has_title = match body.as_object().and_then(|obj| obj.get("title")) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => false,
            Some(Value::String(s)) => !s.is_empty(),
            Some(Value::Number(n)) => n.as_f64() != Some(0.0),
            Some(_) => true,
        };
        if !has_title {
            return build_error(
                "Missing required field: title",
                "VALIDATION_ERROR",
                StatusCode::BAD_REQUEST,
                None,
            );
        }
        build_success(body.clone(), TASK_CREATED, StatusCode::CREATED)
    }

    /// Create one task under an existing project.
    pub async fn create(runner: &TransactionRunner, title: Option<&str>, project_id: i64) -> Envelope {
        let steps: Vec<Box<dyn TransactionStep>> =
            vec![Box::new(create_task(title, FieldValue::literal(project_id)))];
        runner
            .execute(&steps)
            .await
            .into_envelope_with(TASK_CREATED, StatusCode::CREATED)
    }

    /// Newest tasks first, `per_page` (default 10, max 1000) per zero-based `page`.
    pub async fn recent(store: &dyn DataStore, page: u32, per_page: Option<u32>) -> Envelope {
        let mut query = ListQuery::new().order_by(CREATED_AT_FIELD, SortOrder::Desc);
        if let Some(n) = per_page {
            query = query.take(n);
        }
        let offset = page.saturating_mul(query.effective_limit());
        let query = query.skip(offset);
        match list_committed(store, TASK, &query).await {
            Ok(rows) => build_success(Value::Array(rows), TASKS_FETCHED, StatusCode::OK),
            Err(e) => {
                tracing::warn!(code = e.kind().code(), "task listing failed");
                build_error(
                    "Failed to fetch tasks",
                    "TASK_FETCH_ERROR",
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(json!({ "reason": e.reason() })),
                )
            }
        }
    }
}
