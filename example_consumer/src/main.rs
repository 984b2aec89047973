//! Example consumer: creates a project and its first task in one transaction, then creates
//! another with a null task title to show the rollback, printing both envelopes.
//!
//! Run from repo root: `cargo run -p example-consumer`
//! Tables `project` and `task` must already exist in `TASKBOARD_SCHEMA`.

use taskboard::{init_tracing, AppState, ProjectService, StoreConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(taskboard::telemetry::DEFAULT_DIRECTIVE);

    let config = StoreConfig::from_env()?;
    let state = AppState::connect(&config).await?;
    tracing::info!(schema = %config.schema, "connected");

    let committed = ProjectService::create_with_task(&state.runner, "Demo", 1, Some("Write spec")).await;
    println!("{}", serde_json::to_string_pretty(&committed)?);

    let rolled_back = ProjectService::create_with_task(&state.runner, "Transaction Demo Project", 1, None).await;
    if !rolled_back.succeeded() {
        tracing::warn!(code = rolled_back.error_code().unwrap_or("-"), "transaction failed, rolled back");
    }
    println!("{}", serde_json::to_string_pretty(&rolled_back)?);
    Ok(())
}
