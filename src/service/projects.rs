//! Project operations. Creating a project together with its first task is a single
//! transaction: if the task is rejected, the project is not created either.

use super::model::{create_project, create_task, rename_project};
use crate::response::Envelope;
use crate::transaction::{FieldValue, TransactionRunner, TransactionStep};
use axum::http::StatusCode;

pub const PROJECT_CREATED: &str = "Project created successfully";
pub const PROJECT_WITH_TASK_CREATED: &str = "Project and task created successfully";
pub const PROJECT_UPDATED: &str = "Project updated successfully";

pub struct ProjectService;

impl ProjectService {
    pub async fn create(runner: &TransactionRunner, name: &str, user_id: i64) -> Envelope {
        let steps: Vec<Box<dyn TransactionStep>> = vec![Box::new(create_project(name, user_id))];
        runner
            .execute(&steps)
            .await
            .into_envelope_with(PROJECT_CREATED, StatusCode::CREATED)
    }

    /// Payload `result` is the task; `steps[0]` is the project.
    pub async fn create_with_task(
        runner: &TransactionRunner,
        name: &str,
        user_id: i64,
        title: Option<&str>,
    ) -> Envelope {
        let steps: Vec<Box<dyn TransactionStep>> = vec![
            Box::new(create_project(name, user_id)),
            Box::new(create_task(title, FieldValue::id_of(0))),
        ];
        runner
            .execute(&steps)
            .await
            .into_envelope_with(PROJECT_WITH_TASK_CREATED, StatusCode::CREATED)
    }

    /// Rename only if nobody changed the project since `expected_version` was read.
    pub async fn rename(runner: &TransactionRunner, id: i64, expected_version: i64, name: &str) -> Envelope {
        let steps: Vec<Box<dyn TransactionStep>> = vec![Box::new(rename_project(id, expected_version, name))];
        runner
            .execute(&steps)
            .await
            .into_envelope_with(PROJECT_UPDATED, StatusCode::OK)
    }
}
