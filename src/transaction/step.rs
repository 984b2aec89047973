use crate::error::TxError;
use crate::store::StoreTx;
use async_trait::async_trait;
use serde_json::Value;

/// One unit of work inside a transaction.
///
/// Steps run strictly in order on the same store scope. A step reports failure by
/// returning `Err`; the runner then rolls back everything written so far.
#[async_trait]
pub trait TransactionStep: Send + Sync {
    /// Short label used in logs and in failure details.
    fn name(&self) -> &str;

    async fn run(&self, scope: &mut StepScope<'_>) -> Result<Value, TxError>;
}

/// What a running step can see: the open store scope and the outputs of earlier steps.
pub struct StepScope<'a> {
    tx: &'a mut dyn StoreTx,
    outputs: &'a [Value],
}

impl<'a> StepScope<'a> {
    pub(crate) fn new(tx: &'a mut dyn StoreTx, outputs: &'a [Value]) -> Self {
        StepScope { tx, outputs }
    }

    /// Store handle scoped to the current transaction. Reads see earlier steps' writes.
    pub fn store(&mut self) -> &mut dyn StoreTx {
        &mut *self.tx
    }

    /// Zero-based index of the running step.
    pub fn index(&self) -> usize {
        self.outputs.len()
    }

    pub fn output(&self, step: usize) -> Option<&Value> {
        self.outputs.get(step)
    }

    pub fn last_output(&self) -> Option<&Value> {
        self.outputs.last()
    }
}
