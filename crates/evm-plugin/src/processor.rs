//! A reference transaction pipeline wired to the controller hooks.
//!
//! The execution engine itself sits behind [`TxExecutor`]. It reports the nested calls it runs
//! through [`CallHooks`], which keeps the call context and the extensions in step with the engine.

use alloy_primitives::{Bytes, B256};
use auto_impl::auto_impl;

use crate::{
    BlockHeader, CallExit, CallFrame, CallRequest, ConsistencyError, PluginController, PluginError,
    StateStore, TransactionInfo, TxOutcome, TxSummary,
};

/// Executes a single transaction against a state store.
#[auto_impl(&mut, Box)]
pub trait TxExecutor<S: StateStore> {
    /// Execution failure.
    type Error: core::error::Error + 'static;

    /// Runs `tx`, reporting every nested call through `hooks`.
    fn execute(
        &mut self,
        tx: &TransactionInfo,
        hooks: &mut CallHooks<'_, S>,
    ) -> Result<TxOutcome, Self::Error>;
}

/// The view of the pipeline handed to a [`TxExecutor`].
#[derive(Debug)]
pub struct CallHooks<'a, S> {
    controller: &'a mut PluginController,
    store: &'a mut S,
}

impl<'a, S: StateStore> CallHooks<'a, S> {
    /// Wraps the controller and store of the transaction being applied.
    pub fn new(controller: &'a mut PluginController, store: &'a mut S) -> Self {
        Self { controller, store }
    }

    /// Reports that the engine enters a nested call.
    pub fn enter(&mut self, request: &CallRequest) -> Result<CallFrame, PluginError> {
        self.controller.on_call_start(request, self.store)
    }

    /// Reports that the innermost nested call ended.
    ///
    /// When an extension vetoed the call, its state changes are already reverted on return.
    pub fn exit(&mut self, success: bool, output: Bytes) -> Result<CallExit, PluginError> {
        self.controller.on_call_end(success, output, self.store)
    }

    /// The state store.
    pub fn store(&mut self) -> &mut S {
        self.store
    }

    /// The controller.
    pub fn controller(&self) -> &PluginController {
        &*self.controller
    }

    /// Depth of the innermost active call.
    pub fn depth(&self) -> usize {
        self.controller.context().call_layer()
    }
}

/// Failures of the reference pipeline.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError<E> {
    /// The engine failed to execute the transaction.
    #[error("failed to execute transaction {tx_hash}: {source}")]
    Execution {
        /// Transaction hash.
        tx_hash: B256,
        /// Engine error.
        #[source]
        source: E,
    },
    /// The call stack reported by the engine is inconsistent.
    #[error("call stack inconsistency in transaction {tx_hash}: {source}")]
    Consistency {
        /// Transaction hash.
        tx_hash: B256,
        /// Consistency error.
        #[source]
        source: ConsistencyError,
    },
    /// The controller failed.
    #[error("plugin controller failed in transaction {tx_hash}: {source}")]
    Plugin {
        /// Transaction hash.
        tx_hash: B256,
        /// Controller error.
        #[source]
        source: PluginError,
    },
}

impl<E> ProcessError<E> {
    fn from_plugin(tx_hash: B256, err: PluginError) -> Self {
        match err {
            PluginError::Consistency(source) => Self::Consistency { tx_hash, source },
            source => Self::Plugin { tx_hash, source },
        }
    }

    /// Hash of the transaction that failed.
    pub const fn tx_hash(&self) -> B256 {
        match self {
            Self::Execution { tx_hash, .. } |
            Self::Consistency { tx_hash, .. } |
            Self::Plugin { tx_hash, .. } => *tx_hash,
        }
    }
}

/// A transaction applied through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedTransaction {
    /// What the engine reported.
    pub outcome: TxOutcome,
    /// What the extensions were told at `TXEND`.
    pub summary: TxSummary,
}

/// Applies one transaction, driving the controller hooks around the engine.
///
/// When the engine fails the transaction is still closed: the top-level end event goes out with
/// `is_success == false`, `TXEND` is dispatched and the controller is stopped.
pub fn apply_transaction<S, X>(
    controller: &mut PluginController,
    block: &BlockHeader,
    tx: &TransactionInfo,
    executor: &mut X,
    store: &mut S,
) -> Result<AppliedTransaction, ProcessError<X::Error>>
where
    S: StateStore,
    X: TxExecutor<S>,
{
    controller.begin_transaction(block, tx, store);
    let result = executor.execute(tx, &mut CallHooks::new(controller, store));

    match result {
        Ok(outcome) => {
            let summary = controller
                .end_transaction(tx, &outcome, store)
                .map_err(|err| ProcessError::from_plugin(tx.hash, err))?;
            Ok(AppliedTransaction { outcome, summary })
        }
        Err(source) => {
            if let Err(err) = controller.end_transaction(tx, &TxOutcome::failure(0), store) {
                tracing::warn!(target: "evm_plugin::processor", tx_hash = %tx.hash, %err, "failed to close transaction after execution error");
            }
            Err(ProcessError::Execution { tx_hash: tx.hash, source })
        }
    }
}

/// Applies every transaction of a block, in order. Block info is dispatched first.
///
/// Stops at the first failing transaction.
pub fn process_block<S, X>(
    controller: &mut PluginController,
    block: &BlockHeader,
    transactions: &[TransactionInfo],
    executor: &mut X,
    store: &mut S,
) -> Result<Vec<AppliedTransaction>, ProcessError<X::Error>>
where
    S: StateStore,
    X: TxExecutor<S>,
{
    controller.on_block(block);
    let mut applied = Vec::with_capacity(transactions.len());
    for tx in transactions {
        applied.push(apply_transaction(controller, block, tx, executor, store)?);
    }
    tracing::debug!(target: "evm_plugin::processor", number = block.number, transactions = applied.len(), "block processed");
    Ok(applied)
}
