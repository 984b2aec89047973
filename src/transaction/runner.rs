use super::outcome::{StepFailure, TransactionOutcome, TxState};
use super::step::{StepScope, TransactionStep};
use crate::error::TxError;
use crate::response::Envelope;
use crate::store::{DataStore, StoreTx};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub type Steps = [Box<dyn TransactionStep>];

/// Upper bound on the explicit rollback issued after a failure or interruption.
const ROLLBACK_GRACE: Duration = Duration::from_secs(5);

/// Runs ordered steps against one store scope: all commit together or none take effect.
///
/// The store is injected; each run acquires its own scope and releases it on commit,
/// rollback, or drop. Different runs may proceed concurrently; isolation between them is
/// whatever the store provides, and collisions surface as `CONFLICT_ERROR`.
#[derive(Clone)]
pub struct TransactionRunner {
    store: Arc<dyn DataStore>,
    timeout: Option<Duration>,
}

enum Interrupt {
    Failed(StepFailure),
    Cancelled,
    TimedOut,
}

impl TransactionRunner {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        TransactionRunner { store, timeout: None }
    }

    /// Bound every run. The deadline covers opening the scope and running the steps; a run
    /// still in either phase after `timeout` is rolled back as `STORE_UNAVAILABLE`.
    /// The final store commit is not interrupted, since abandoning it midway would leave
    /// its result unknown.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<dyn DataStore> {
        &self.store
    }

    pub async fn run_transaction(&self, steps: &Steps) -> Envelope {
        self.execute(steps).await.into_envelope()
    }

    /// Like [`run_transaction`](Self::run_transaction), rolling back if `cancel` resolves first.
    pub async fn run_until<F>(&self, steps: &Steps, cancel: F) -> Envelope
    where
        F: Future<Output = ()> + Send,
    {
        self.execute_until(steps, cancel).await.into_envelope()
    }

    pub async fn execute(&self, steps: &Steps) -> TransactionOutcome {
        self.execute_until(steps, std::future::pending()).await
    }

    /// Run `steps` and return the finalized outcome (always `Committed` or `RolledBack`).
    pub async fn execute_until<F>(&self, steps: &Steps, cancel: F) -> TransactionOutcome
    where
        F: Future<Output = ()> + Send,
    {
        let mut outcome = TransactionOutcome::open(steps.len());
        if steps.is_empty() {
            finish_rolled_back(
                &mut outcome,
                StepFailure::outside_steps(TxError::Validation("transaction has no steps".into())),
            );
            return outcome;
        }

        let timer = sleep_until(self.timeout.map(|d| Instant::now() + d));
        tokio::pin!(timer);
        tokio::pin!(cancel);

        let begun = tokio::select! {
            res = self.store.begin() => Ok(res),
            _ = &mut cancel => Err("cancelled"),
            _ = &mut timer => Err("timed out"),
        };
        let mut tx = match begun {
            Ok(Ok(tx)) => tx,
            Ok(Err(e)) => {
                finish_rolled_back(&mut outcome, StepFailure::outside_steps(as_unavailable(e)));
                return outcome;
            }
            Err(reason) => {
                let error = TxError::StoreUnavailable(format!("transaction {}", reason));
                finish_rolled_back(&mut outcome, StepFailure::outside_steps(error));
                return outcome;
            }
        };

        let interrupt = {
            let work = drive(&mut *tx, steps, &mut outcome);
            tokio::select! {
                res = work => res.err(),
                _ = &mut cancel => Some(Interrupt::Cancelled),
                _ = &mut timer => Some(Interrupt::TimedOut),
            }
        };

        // A refused commit has already consumed the scope; dropping `tx` covers the rest.
        let (failure, scope_open) = match interrupt {
            None => match commit(&mut *tx, &mut outcome).await {
                Ok(()) => {
                    tracing::info!(steps = steps.len(), "transaction committed");
                    return outcome;
                }
                Err(failure) => (failure, false),
            },
            Some(Interrupt::Failed(failure)) => (failure, true),
            Some(Interrupt::Cancelled) => (interrupted_failure(&outcome, steps, "cancelled"), true),
            Some(Interrupt::TimedOut) => (interrupted_failure(&outcome, steps, "timed out"), true),
        };

        if scope_open {
            match tokio::time::timeout(ROLLBACK_GRACE, tx.rollback()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(code = e.kind().code(), "explicit rollback failed, discarding scope")
                }
                Err(_) => tracing::warn!("explicit rollback timed out, discarding scope"),
            }
        }
        drop(tx);
        finish_rolled_back(&mut outcome, failure);
        outcome
    }
}

async fn drive(tx: &mut dyn StoreTx, steps: &Steps, outcome: &mut TransactionOutcome) -> Result<(), Interrupt> {
    for (index, step) in steps.iter().enumerate() {
        let fail = |e: TxError| Interrupt::Failed(StepFailure::at(index, step.name(), e));
        outcome.transition(TxState::Executing(index)).map_err(fail)?;
        let result = {
            let mut scope = StepScope::new(&mut *tx, outcome.outputs());
            step.run(&mut scope).await
        };
        let output = result.map_err(fail)?;
        outcome.record_output(output).map_err(fail)?;
    }
    Ok(())
}

async fn commit(tx: &mut dyn StoreTx, outcome: &mut TransactionOutcome) -> Result<(), StepFailure> {
    if !outcome.ready_to_commit() {
        return Err(StepFailure::outside_steps(TxError::Internal(format!(
            "commit requested in state {:?}",
            outcome.state()
        ))));
    }
    tx.commit().await.map_err(StepFailure::outside_steps)?;
    outcome.transition(TxState::Committed).map_err(StepFailure::outside_steps)
}

/// The step that was running when the caller gave up, reported as store-unavailable.
fn interrupted_failure(outcome: &TransactionOutcome, steps: &Steps, reason: &str) -> StepFailure {
    let error = TxError::StoreUnavailable(format!("transaction {}", reason));
    match outcome.state() {
        TxState::Executing(i) => StepFailure::at(i, steps[i].name(), error),
        _ => StepFailure::outside_steps(error),
    }
}

fn finish_rolled_back(outcome: &mut TransactionOutcome, failure: StepFailure) {
    tracing::warn!(
        step = ?failure.step,
        step_name = failure.step_name.as_deref().unwrap_or("-"),
        code = failure.kind().code(),
        "transaction failed, rolled back"
    );
    if let Err(e) = outcome.roll_back(failure) {
        tracing::error!(error = %e, "transaction outcome already finalized");
    }
}

/// Failing to open the scope is always reported as the store being unavailable.
fn as_unavailable(e: TxError) -> TxError {
    match e {
        TxError::StoreUnavailable(_) => e,
        other => TxError::StoreUnavailable(other.reason().to_string()),
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}
