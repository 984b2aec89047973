//! Lifecycle of one transaction: `Open -> Executing(i) -> {Committed | RolledBack}`.

use crate::error::{ErrorKind, TxError};
use crate::response::{build_error, build_success, Envelope};
use axum::http::StatusCode;
use serde_json::{json, Value};

pub const COMMITTED_MESSAGE: &str = "Transaction committed";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    Open,
    /// Step `i` (zero-based) is running or has just produced its output.
    Executing(usize),
    Committed,
    RolledBack,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, TxState::Committed | TxState::RolledBack)
    }

    /// Whether `self -> next` is a legal move for a transaction of `step_count` steps.
    /// Reaching `Committed` additionally requires the last step's output to be recorded.
    pub fn can_transition_to(self, next: TxState, step_count: usize) -> bool {
        match (self, next) {
            (TxState::Open, TxState::Executing(0)) => step_count > 0,
            (TxState::Executing(i), TxState::Executing(j)) => j == i + 1 && j < step_count,
            (TxState::Executing(i), TxState::Committed) => i + 1 == step_count,
            (TxState::Open | TxState::Executing(_), TxState::RolledBack) => true,
            _ => false,
        }
    }
}

/// Where and why a transaction failed. `step` is `None` when no step was running
/// (empty step list, scope could not be opened, commit refused).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StepFailure {
    pub step: Option<usize>,
    pub step_name: Option<String>,
    pub error: TxError,
}

impl StepFailure {
    pub fn at(step: usize, step_name: &str, error: TxError) -> Self {
        StepFailure {
            step: Some(step),
            step_name: Some(step_name.to_string()),
            error,
        }
    }

    pub fn outside_steps(error: TxError) -> Self {
        StepFailure {
            step: None,
            step_name: None,
            error,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    fn details(&self) -> Value {
        let mut details = serde_json::Map::new();
        if let Some(step) = self.step {
            details.insert("step".into(), json!(step));
        }
        if let Some(name) = &self.step_name {
            details.insert("stepName".into(), json!(name));
        }
        details.insert("reason".into(), json!(self.error.reason()));
        Value::Object(details)
    }
}

/// Mutated only by the runner; immutable once terminal.
#[derive(Debug)]
pub struct TransactionOutcome {
    state: TxState,
    step_count: usize,
    outputs: Vec<Value>,
    failure: Option<StepFailure>,
}

impl TransactionOutcome {
    pub(crate) fn open(step_count: usize) -> Self {
        TransactionOutcome {
            state: TxState::Open,
            step_count,
            outputs: Vec::with_capacity(step_count),
            failure: None,
        }
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Outputs of the steps that completed, in order.
    pub fn outputs(&self) -> &[Value] {
        &self.outputs
    }

    pub fn failure(&self) -> Option<&StepFailure> {
        self.failure.as_ref()
    }

    pub fn is_committed(&self) -> bool {
        self.state == TxState::Committed
    }

    pub(crate) fn transition(&mut self, next: TxState) -> Result<(), TxError> {
        if !self.state.can_transition_to(next, self.step_count) {
            return Err(TxError::Internal(format!(
                "illegal transaction transition {:?} -> {:?}",
                self.state, next
            )));
        }
        if next == TxState::Committed && self.outputs.len() != self.step_count {
            return Err(TxError::Internal(format!(
                "cannot commit after {} of {} steps",
                self.outputs.len(),
                self.step_count
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Record the output of the step currently executing.
    pub(crate) fn record_output(&mut self, output: Value) -> Result<(), TxError> {
        match self.state {
            TxState::Executing(i) if self.outputs.len() == i => {
                self.outputs.push(output);
                Ok(())
            }
            state => Err(TxError::Internal(format!("no step awaiting output in state {:?}", state))),
        }
    }

    /// True once the last step's output is recorded and nothing has failed.
    pub(crate) fn ready_to_commit(&self) -> bool {
        self.state.can_transition_to(TxState::Committed, self.step_count)
            && self.outputs.len() == self.step_count
    }

    pub(crate) fn roll_back(&mut self, failure: StepFailure) -> Result<(), TxError> {
        self.transition(TxState::RolledBack)?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Success wraps `{ "result": <last output>, "steps": [<every output>] }`.
    pub fn into_envelope(self) -> Envelope {
        self.into_envelope_with(COMMITTED_MESSAGE, StatusCode::OK)
    }

    /// Like [`into_envelope`](Self::into_envelope) with a caller-chosen success message and status.
    pub fn into_envelope_with(self, message: &str, status: StatusCode) -> Envelope {
        match (self.state, self.failure) {
            (TxState::Committed, _) => {
                let result = self.outputs.last().cloned().unwrap_or(Value::Null);
                build_success(json!({ "result": result, "steps": self.outputs }), message, status)
            }
            (TxState::RolledBack, Some(failure)) => {
                let kind = failure.kind();
                build_error(kind.rollback_message(), kind.code(), kind.status(), Some(failure.details()))
            }
            (state, _) => {
                let kind = ErrorKind::Internal;
                build_error(
                    kind.rollback_message(),
                    kind.code(),
                    kind.status(),
                    Some(json!({ "reason": format!("transaction not finalized: {:?}", state) })),
                )
            }
        }
    }
}
