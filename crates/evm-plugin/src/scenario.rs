//! Replay of scripted blocks.
//!
//! A [`Scenario`] describes a block, the initial balances and, per transaction, the call tree the
//! engine should pretend to execute. [`ScriptedExecutor`] replays it through the pipeline hooks, so
//! extensions can be exercised without a full EVM.

use std::{collections::HashMap, fmt::Display};

use alloy_primitives::{Address, Bytes, B256, U256};
use revm::database::DatabaseRef;
use serde::{Deserialize, Serialize};

use crate::{
    BlockHeader, CacheDbStore, CallHooks, CallRequest, PluginError, SnapshotId, StateStore,
    StoreError, TransactionInfo, TxExecutor, TxOutcome,
};

/// A store that can move value between accounts.
pub trait ValueTransfer: StateStore {
    /// Moves `value` from `from` to `to`. Returns `false` when `from` cannot cover it.
    fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<bool, StoreError>;
}

impl<DB: DatabaseRef> ValueTransfer for CacheDbStore<DB>
where
    DB::Error: Display,
{
    fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<bool, StoreError> {
        Self::transfer(self, from, to, value)
    }
}

/// A nested call and the calls it makes in turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptedCall {
    /// The call.
    #[serde(flatten)]
    pub request: CallRequest,
    /// Whether the call reverts on its own.
    pub reverts: bool,
    /// Return data.
    pub output: Bytes,
    /// Calls made from inside this one.
    pub calls: Vec<ScriptedCall>,
}

impl ScriptedCall {
    /// A successful call.
    pub fn new(request: CallRequest) -> Self {
        Self { request, ..Default::default() }
    }

    /// Adds a call made from inside this one.
    pub fn with_call(mut self, call: Self) -> Self {
        self.calls.push(call);
        self
    }

    /// Makes the call revert.
    pub fn reverting(mut self) -> Self {
        self.reverts = true;
        self
    }
}

/// A transaction and the execution the engine should pretend to perform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScriptedTx {
    /// The transaction.
    #[serde(flatten)]
    pub tx: TransactionInfo,
    /// Whether the top-level message reverts on its own.
    pub reverts: bool,
    /// Gas the engine reports.
    pub gas_used: u64,
    /// Return data of the top-level message.
    pub output: Bytes,
    /// Address reported as created, for creations.
    pub created_address: Option<Address>,
    /// Nested calls of the top-level message.
    pub calls: Vec<ScriptedCall>,
    /// Fail execution with this message instead of producing an outcome.
    pub error: Option<String>,
}

/// A block to replay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Scenario {
    /// Header of the block.
    pub block: BlockHeader,
    /// Initial balances.
    pub accounts: HashMap<Address, U256>,
    /// Transactions, in order.
    pub transactions: Vec<ScriptedTx>,
}

impl Scenario {
    /// The transactions to hand to the pipeline.
    pub fn transaction_infos(&self) -> Vec<TransactionInfo> {
        self.transactions.iter().map(|scripted| scripted.tx.clone()).collect()
    }
}

/// Errors of the [`ScriptedExecutor`].
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// A call hook failed.
    #[error(transparent)]
    Plugin(#[from] PluginError),
    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The script asked for a failure.
    #[error("scripted failure: {0}")]
    Scripted(String),
}

/// A [`TxExecutor`] replaying scripted call trees.
///
/// Value moves along with every call. A call whose caller cannot cover its value fails without
/// running its nested calls, and a failing call drops every change made inside it. Unknown
/// transactions succeed with no nested call.
#[derive(Debug, Clone, Default)]
pub struct ScriptedExecutor {
    scripts: HashMap<B256, ScriptedTx>,
}

impl ScriptedExecutor {
    /// Creates an executor for `scripts`, keyed by transaction hash.
    pub fn new(scripts: impl IntoIterator<Item = ScriptedTx>) -> Self {
        Self { scripts: scripts.into_iter().map(|script| (script.tx.hash, script)).collect() }
    }

    fn run_call<S: ValueTransfer>(
        call: &ScriptedCall,
        hooks: &mut CallHooks<'_, S>,
    ) -> Result<bool, ScriptError> {
        hooks.enter(&call.request)?;
        let request = &call.request;
        let checkpoint = hooks.store().snapshot();
        let funded = request.value.is_zero() ||
            hooks.store().transfer(request.caller, request.target, request.value)?;
        if funded {
            for nested in &call.calls {
                Self::run_call(nested, hooks)?;
            }
        }
        let mut success = funded && !call.reverts;
        settle(hooks.store(), checkpoint, success)?;
        let output = if success { call.output.clone() } else { Bytes::new() };
        let exit = hooks.exit(success, output)?;
        success &= !exit.reverted;
        Ok(success)
    }
}

impl<S: ValueTransfer> TxExecutor<S> for ScriptedExecutor {
    type Error = ScriptError;

    fn execute(
        &mut self,
        tx: &TransactionInfo,
        hooks: &mut CallHooks<'_, S>,
    ) -> Result<TxOutcome, Self::Error> {
        let Some(script) = self.scripts.get(&tx.hash) else {
            return Ok(TxOutcome::success(21_000));
        };
        if let Some(message) = &script.error {
            return Err(ScriptError::Scripted(message.clone()));
        }

        let checkpoint = hooks.store().snapshot();
        let funded = match tx.to.or(script.created_address) {
            Some(to) if !tx.value.is_zero() => hooks.store().transfer(tx.from, to, tx.value)?,
            _ => true,
        };
        if funded {
            for call in &script.calls {
                Self::run_call(call, hooks)?;
            }
        }
        let success = funded && !script.reverts;
        settle(hooks.store(), checkpoint, success)?;
        Ok(TxOutcome {
            success,
            gas_used: script.gas_used,
            output: if success { script.output.clone() } else { Bytes::new() },
            created_address: script.created_address.filter(|_| success),
        })
    }
}

/// Keeps the changes made since `checkpoint` when `success`, drops them otherwise.
fn settle<S: StateStore>(store: &mut S, checkpoint: SnapshotId, success: bool) -> Result<(), StoreError> {
    if success {
        store.discard_snapshot(checkpoint);
        Ok(())
    } else {
        store.revert_to_snapshot(checkpoint)
    }
}
