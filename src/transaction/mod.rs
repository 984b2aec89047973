//! Atomic execution of ordered write steps.

mod outcome;
mod runner;
mod step;
mod write;

pub use outcome::{StepFailure, TransactionOutcome, TxState, COMMITTED_MESSAGE};
pub use runner::{Steps, TransactionRunner};
pub use step::{StepScope, TransactionStep};
pub use write::{FieldValue, WriteStep};
