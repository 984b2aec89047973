//! Integration tests for atomic step execution against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::StatusCode;
use serde_json::{json, Value};
use taskboard::service::model::{create_project, create_task, create_user, rename_project, PROJECT, TASK, USER};
use taskboard::{
    DataStore, FieldValue, MemoryStore, StepScope, StoreTx, TransactionRunner, TransactionStep, TxError, TxState,
    WriteStep,
};
use tokio::sync::Barrier;

fn runner(store: &MemoryStore) -> TransactionRunner {
    taskboard::try_init_tracing("taskboard=debug");
    TransactionRunner::new(Arc::new(store.clone()))
}

type BoxedSteps = Vec<Box<dyn TransactionStep>>;

/// Reads back the row produced by the previous step through the transaction's own scope.
struct ReadBack {
    entity: &'static str,
}

#[async_trait]
impl TransactionStep for ReadBack {
    fn name(&self) -> &str {
        "read back"
    }

    async fn run(&self, scope: &mut StepScope<'_>) -> Result<Value, TxError> {
        let id = scope
            .last_output()
            .and_then(|o| o.get("id"))
            .and_then(Value::as_i64)
            .ok_or_else(|| TxError::Internal("previous step produced no id".into()))?;
        scope
            .store()
            .get(self.entity, id)
            .await?
            .ok_or_else(|| TxError::Validation("previous write not visible".into()))
    }
}

struct Stall;

#[async_trait]
impl TransactionStep for Stall {
    fn name(&self) -> &str {
        "stall"
    }

    async fn run(&self, _scope: &mut StepScope<'_>) -> Result<Value, TxError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(Value::Null)
    }
}

struct Fail(TxError);

#[async_trait]
impl TransactionStep for Fail {
    fn name(&self) -> &str {
        "fail"
    }

    async fn run(&self, _scope: &mut StepScope<'_>) -> Result<Value, TxError> {
        Err(self.0.clone())
    }
}

/// Reads a project so its version is observed, then waits until the other transaction has too.
struct ReadAndWait {
    id: i64,
    barrier: Arc<Barrier>,
}

#[async_trait]
impl TransactionStep for ReadAndWait {
    fn name(&self) -> &str {
        "read and wait"
    }

    async fn run(&self, scope: &mut StepScope<'_>) -> Result<Value, TxError> {
        let row = scope.store().get(PROJECT, self.id).await?.unwrap_or(Value::Null);
        self.barrier.wait().await;
        Ok(row)
    }
}

#[tokio::test]
async fn null_title_rolls_back_project_and_task() {
    let store = MemoryStore::new();
    let steps: BoxedSteps = vec![
        Box::new(create_project("Demo", 1)),
        Box::new(create_task(None, FieldValue::id_of(0))),
    ];

    let env = runner(&store).run_transaction(&steps).await;

    assert!(!env.succeeded());
    assert_eq!(env.error_code(), Some("VALIDATION_ERROR"));
    assert_eq!(env.status_hint(), StatusCode::BAD_REQUEST);
    assert_eq!(env.payload(), None);
    assert_eq!(env.error_details().unwrap()["step"], json!(1));
    assert!(store.committed(PROJECT).is_empty());
    assert!(store.committed(TASK).is_empty());
}

#[tokio::test]
async fn project_and_task_commit_together() {
    let store = MemoryStore::new();
    let steps: BoxedSteps = vec![
        Box::new(create_project("Demo", 1)),
        Box::new(create_task(Some("Write spec"), FieldValue::id_of(0))),
    ];

    let env = runner(&store).run_transaction(&steps).await;

    assert!(env.succeeded());
    let projects = store.committed(PROJECT);
    let tasks = store.committed(TASK);
    assert_eq!(projects.len(), 1);
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["projectId"], projects[0]["id"]);
    assert_eq!(tasks[0]["title"], json!("Write spec"));

    let payload = env.payload().unwrap();
    assert_eq!(payload["result"], tasks[0]);
    assert_eq!(payload["steps"][0], projects[0]);
}

#[tokio::test]
async fn failure_in_middle_step_leaves_no_trace() {
    let store = MemoryStore::new();
    let steps: BoxedSteps = vec![
        Box::new(create_project("Demo", 1)),
        Box::new(create_task(None, FieldValue::id_of(0))),
        Box::new(create_user("ada@example.com", "Ada")),
    ];

    let outcome = runner(&store).execute(&steps).await;

    assert_eq!(outcome.state(), TxState::RolledBack);
    assert_eq!(outcome.outputs().len(), 1);
    let failure = outcome.failure().unwrap();
    assert_eq!(failure.step, Some(1));
    assert_eq!(failure.step_name.as_deref(), Some("create task"));
    for entity in [PROJECT, TASK, USER] {
        assert!(store.committed(entity).is_empty(), "{} should be empty", entity);
    }
}

#[tokio::test]
async fn later_steps_read_earlier_writes() {
    let store = MemoryStore::new();
    let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1)), Box::new(ReadBack { entity: PROJECT })];

    let outcome = runner(&store).execute(&steps).await;

    assert!(outcome.is_committed());
    assert_eq!(outcome.outputs()[0], outcome.outputs()[1]);
}

#[tokio::test]
async fn uncommitted_writes_are_invisible_to_other_readers() {
    let store = MemoryStore::new();
    let barrier = Arc::new(Barrier::new(2));
    let steps: BoxedSteps = vec![
        Box::new(create_project("Demo", 1)),
        Box::new(ReadAndWait {
            id: 0,
            barrier: Arc::clone(&barrier),
        }),
    ];
    let runner = runner(&store);

    let observer = async {
        barrier.wait().await;
        store.committed(PROJECT).len()
    };
    let (outcome, seen_mid_transaction) = tokio::join!(runner.execute(&steps), observer);

    assert!(outcome.is_committed());
    assert_eq!(seen_mid_transaction, 0);
    assert_eq!(store.committed(PROJECT).len(), 1);
}

#[tokio::test]
async fn empty_transaction_is_a_validation_error() {
    let store = MemoryStore::new();
    let env = runner(&store).run_transaction(&[]).await;
    assert_eq!(env.error_code(), Some("VALIDATION_ERROR"));
    assert_eq!(env.error_details().unwrap().get("step"), None);
}

#[tokio::test]
async fn unreachable_store_is_reported_without_running_steps() {
    let store = MemoryStore::new();
    store.set_available(false);
    let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1))];

    let outcome = runner(&store).execute(&steps).await;

    assert_eq!(outcome.state(), TxState::RolledBack);
    assert!(outcome.outputs().is_empty());
    let env = outcome.into_envelope();
    assert_eq!(env.error_code(), Some("STORE_UNAVAILABLE"));
    assert_eq!(env.message(), "Transaction rolled back: data store unavailable");
}

#[tokio::test]
async fn store_going_away_before_commit_rolls_back() {
    let store = MemoryStore::new();
    struct TakeStoreDown(MemoryStore);

    #[async_trait]
    impl TransactionStep for TakeStoreDown {
        fn name(&self) -> &str {
            "take store down"
        }

        async fn run(&self, _scope: &mut StepScope<'_>) -> Result<Value, TxError> {
            self.0.set_available(false);
            Ok(Value::Null)
        }
    }

    let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1)), Box::new(TakeStoreDown(store.clone()))];
    let env = runner(&store).run_transaction(&steps).await;

    assert_eq!(env.error_code(), Some("STORE_UNAVAILABLE"));
    assert!(store.committed(PROJECT).is_empty());
}

#[tokio::test]
async fn timeout_rolls_back_as_store_unavailable() {
    let store = MemoryStore::new();
    let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1)), Box::new(Stall)];

    let runner = runner(&store).with_timeout(Some(Duration::from_millis(50)));
    let env = runner.run_transaction(&steps).await;

    assert_eq!(env.error_code(), Some("STORE_UNAVAILABLE"));
    let details = env.error_details().unwrap();
    assert_eq!(details["step"], json!(1));
    assert_eq!(details["reason"], json!("transaction timed out"));
    assert!(store.committed(PROJECT).is_empty());
}

#[tokio::test]
async fn caller_cancellation_rolls_back() {
    let store = MemoryStore::new();
    let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1)), Box::new(Stall)];

    let env = runner(&store)
        .run_until(&steps, tokio::time::sleep(Duration::from_millis(20)))
        .await;

    assert_eq!(env.error_code(), Some("STORE_UNAVAILABLE"));
    assert_eq!(env.error_details().unwrap()["reason"], json!("transaction cancelled"));
    assert!(store.committed(PROJECT).is_empty());
}

/// A store whose scope never opens, like a pool with no free connections.
struct PoolExhausted;

#[async_trait]
impl DataStore for PoolExhausted {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, TxError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(TxError::StoreUnavailable("pool timed out".into()))
    }
}

#[tokio::test]
async fn timeout_covers_opening_the_scope() {
    let runner = TransactionRunner::new(Arc::new(PoolExhausted)).with_timeout(Some(Duration::from_millis(50)));
    let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1))];

    let outcome = tokio::time::timeout(Duration::from_secs(2), runner.execute(&steps))
        .await
        .expect("runner should give up at its own deadline");

    assert_eq!(outcome.state(), TxState::RolledBack);
    assert!(outcome.outputs().is_empty());
    let env = outcome.into_envelope();
    assert_eq!(env.error_code(), Some("STORE_UNAVAILABLE"));
    assert_eq!(env.error_details(), Some(&json!({ "reason": "transaction timed out" })));
}

#[tokio::test]
async fn cancellation_covers_opening_the_scope() {
    let runner = TransactionRunner::new(Arc::new(PoolExhausted));
    let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1))];

    let env = tokio::time::timeout(
        Duration::from_secs(2),
        runner.run_until(&steps, tokio::time::sleep(Duration::from_millis(20))),
    )
    .await
    .expect("runner should stop when the caller cancels");

    assert_eq!(env.error_code(), Some("STORE_UNAVAILABLE"));
    assert_eq!(env.error_details(), Some(&json!({ "reason": "transaction cancelled" })));
}

#[tokio::test]
async fn step_error_kinds_map_to_codes() {
    let cases = [
        (TxError::Validation("bad".into()), "VALIDATION_ERROR"),
        (TxError::StoreUnavailable("down".into()), "STORE_UNAVAILABLE"),
        (TxError::Conflict("raced".into()), "CONFLICT_ERROR"),
        (TxError::Internal("bug".into()), "INTERNAL_ERROR"),
    ];
    for (error, code) in cases {
        let store = MemoryStore::new();
        let steps: BoxedSteps = vec![Box::new(create_project("Demo", 1)), Box::new(Fail(error.clone()))];
        let env = runner(&store).run_transaction(&steps).await;
        assert_eq!(env.error_code(), Some(code));
        assert_eq!(env.error_details().unwrap()["reason"], json!(error.reason()));
        assert!(!env.message().contains(error.reason()));
        assert!(store.committed(PROJECT).is_empty());
    }
}

#[tokio::test]
async fn reference_to_a_later_step_is_rejected() {
    let store = MemoryStore::new();
    let steps: BoxedSteps = vec![
        Box::new(create_task(Some("t"), FieldValue::id_of(1))),
        Box::new(create_project("Demo", 1)),
    ];
    let env = runner(&store).run_transaction(&steps).await;
    assert_eq!(env.error_code(), Some("VALIDATION_ERROR"));
    assert_eq!(env.error_details().unwrap()["step"], json!(0));
}

async fn seed_project(store: &MemoryStore) -> i64 {
    let mut tx = store.begin().await.unwrap();
    let fields = json!({ "name": "Demo", "userId": 1 }).as_object().cloned().unwrap();
    let row = tx.insert(PROJECT, &fields).await.unwrap();
    tx.commit().await.unwrap();
    row["id"].as_i64().unwrap()
}

#[tokio::test]
async fn sequential_updates_from_same_version_conflict() {
    let store = MemoryStore::new();
    let id = seed_project(&store).await;
    let runner = runner(&store);

    let first: BoxedSteps = vec![Box::new(rename_project(id, 1, "First"))];
    let second: BoxedSteps = vec![Box::new(rename_project(id, 1, "Second"))];

    assert!(runner.run_transaction(&first).await.succeeded());
    let env = runner.run_transaction(&second).await;
    assert_eq!(env.error_code(), Some("CONFLICT_ERROR"));
    assert_eq!(env.status_hint(), StatusCode::CONFLICT);
    assert_eq!(store.committed(PROJECT)[0]["name"], json!("First"));
}

#[tokio::test]
async fn interleaved_updates_commit_exactly_once() {
    let store = MemoryStore::new();
    let id = seed_project(&store).await;
    let runner = runner(&store);
    let barrier = Arc::new(Barrier::new(2));

    let steps_for = |name: &str| -> BoxedSteps {
        vec![
            Box::new(ReadAndWait {
                id,
                barrier: Arc::clone(&barrier),
            }),
            Box::new(
                WriteStep::update(PROJECT, FieldValue::literal(id), 1)
                    .field("name", name.to_string()),
            ),
        ]
    };
    let a = steps_for("A");
    let b = steps_for("B");

    let (ra, rb) = tokio::join!(runner.execute(&a), runner.execute(&b));

    let committed = [&ra, &rb].iter().filter(|o| o.is_committed()).count();
    assert_eq!(committed, 1);
    let loser = if ra.is_committed() { &rb } else { &ra };
    assert_eq!(loser.failure().unwrap().error.kind().code(), "CONFLICT_ERROR");

    let rows = store.committed(PROJECT);
    assert_eq!(rows[0]["version"], json!(2));
}

#[tokio::test]
async fn concurrent_runs_on_spawned_tasks() {
    let store = MemoryStore::new();
    let id = seed_project(&store).await;
    let runner = runner(&store);

    let handles: Vec<_> = ["A", "B"]
        .into_iter()
        .map(|name| {
            let runner = runner.clone();
            tokio::spawn(async move {
                let steps: BoxedSteps = vec![Box::new(rename_project(id, 1, name))];
                runner.run_transaction(&steps).await
            })
        })
        .collect();

    let mut codes = Vec::new();
    for h in handles {
        let env = h.await.unwrap();
        codes.push(env.error_code().map(str::to_string));
    }
    assert_eq!(codes.iter().filter(|c| c.is_none()).count(), 1);
    assert!(codes.contains(&Some("CONFLICT_ERROR".to_string())));
}
