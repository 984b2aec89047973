//! User operations.

use super::model::{create_user, USER};
use crate::response::{build_error, build_success, Envelope};
use crate::store::{list_committed, DataStore, ListQuery, SortOrder, ID_FIELD};
use crate::transaction::{TransactionRunner, TransactionStep};
use axum::http::StatusCode;
use serde_json::{json, Value};

pub const USERS_FETCHED: &str = "Users fetched successfully";
pub const USER_CREATED: &str = "User created successfully";

pub struct UserService;

impl UserService {
    pub async fn create(runner: &TransactionRunner, email: &str, name: &str) -> Envelope {
        let steps: Vec<Box<dyn TransactionStep>> = vec![Box::new(create_user(email, name))];
        runner
            .execute(&steps)
            .await
            .into_envelope_with(USER_CREATED, StatusCode::CREATED)
    }

    /// Whole user rows, oldest first.
    pub async fn list(store: &dyn DataStore, query: ListQuery) -> Envelope {
        Self::fetch(store, query.order_by(ID_FIELD, SortOrder::Asc)).await
    }

    /// Only `id` and `email`, for listings that do not need the full row.
    pub async fn summaries(store: &dyn DataStore, offset: u32, limit: u32) -> Envelope {
        let query = ListQuery::new()
            .select([ID_FIELD, "email"])
            .order_by(ID_FIELD, SortOrder::Asc)
            .skip(offset)
            .take(limit);
        Self::fetch(store, query).await
    }

    async fn fetch(store: &dyn DataStore, query: ListQuery) -> Envelope {
        match list_committed(store, USER, &query).await {
            Ok(rows) => build_success(Value::Array(rows), USERS_FETCHED, StatusCode::OK),
            Err(e) => {
                tracing::warn!(code = e.kind().code(), "user listing failed");
                build_error(
                    "Failed to fetch users",
                    "USER_FETCH_ERROR",
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Some(json!({ "reason": e.reason() })),
                )
            }
        }
    }
}
