//! Per-transaction call bookkeeping.
//!
//! The tracker mirrors the engine's call stack: every external call the engine enters pushes a
//! [`CallFrame`] carrying the snapshot taken on entry, and every call end pops it. Rollbacks
//! requested by extensions are executed against the state store when the targeted frame ends.

use std::collections::BTreeMap;

use alloy_primitives::{Address, B256};
use serde::{Deserialize, Serialize};

use crate::{SnapshotId, StateStore, StoreError};

/// One active external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallFrame {
    /// Callee address.
    pub address: Address,
    /// Nesting depth, starting at 1 for the top-level message.
    pub depth: usize,
    /// Snapshot taken when the frame was entered.
    pub snapshot: SnapshotId,
}

/// Whether a transaction is being tracked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContextPhase {
    /// Between transactions.
    #[default]
    Idle,
    /// A transaction is being applied.
    Active,
}

/// A frame popped by [`CallContext::exit_call`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallExit {
    /// The frame that ended.
    pub frame: CallFrame,
    /// Whether its state changes were reverted on behalf of an extension.
    pub reverted: bool,
}

/// Call-stack and rollback consistency failures.
///
/// These indicate a bug in the pipeline driving the tracker, never a misbehaving extension.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsistencyError {
    /// A call ended with no call on the stack.
    #[error("call end without a matching call start")]
    Unbalanced,
    /// A call started outside of a transaction.
    #[error("call start outside of a transaction")]
    NotActive,
    /// A rollback was requested with no active call.
    #[error("rollback requested with no active call")]
    NoActiveFrame,
    /// A rollback targeted a snapshot no live frame owns.
    #[error("snapshot {0} does not belong to an active call")]
    UnknownSnapshot(SnapshotId),
    /// The transaction ended with calls still on the stack.
    #[error("transaction ended with {0} open call(s)")]
    OpenFrames(usize),
    /// The state store refused the revert.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Call context of the transaction currently being applied.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    phase: ContextPhase,
    tx_hash: Option<B256>,
    call_stack: Vec<CallFrame>,
    contracts_touched: Vec<Address>,
    rollback: Option<SnapshotId>,
    valid_calls: BTreeMap<usize, bool>,
    rollbacks: usize,
}

impl CallContext {
    /// Creates an idle context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the context for a new transaction and enters the top-level frame, if the
    /// transaction has a direct target.
    pub fn begin<S: StateStore>(
        &mut self,
        tx_hash: B256,
        direct_target: Option<Address>,
        store: &mut S,
    ) -> Option<CallFrame> {
        *self = Self { phase: ContextPhase::Active, tx_hash: Some(tx_hash), ..Self::default() };
        let target = direct_target?;
        Some(self.push(target, store))
    }

    /// Enters a nested call to `target`.
    pub fn enter_call<S: StateStore>(
        &mut self,
        target: Address,
        store: &mut S,
    ) -> Result<CallFrame, ConsistencyError> {
        if self.phase != ContextPhase::Active {
            return Err(ConsistencyError::NotActive);
        }
        Ok(self.push(target, store))
    }

    fn push<S: StateStore>(&mut self, address: Address, store: &mut S) -> CallFrame {
        let frame = CallFrame { address, depth: self.call_stack.len() + 1, snapshot: store.snapshot() };
        self.call_stack.push(frame);
        self.contracts_touched.push(address);
        tracing::trace!(target: "evm_plugin::context", %address, depth = frame.depth, snapshot = %frame.snapshot, "call entered");
        frame
    }

    /// Ends the innermost call.
    ///
    /// If the pending rollback targets this frame the store is reverted to its snapshot and the
    /// request is cleared. Otherwise the frame's snapshot is discarded.
    pub fn exit_call<S: StateStore>(
        &mut self,
        success: bool,
        store: &mut S,
    ) -> Result<CallExit, ConsistencyError> {
        let frame = self.call_stack.pop().ok_or(ConsistencyError::Unbalanced)?;
        self.valid_calls.insert(frame.depth, success);

        if self.rollback == Some(frame.snapshot) {
            self.rollback = None;
            store.revert_to_snapshot(frame.snapshot)?;
            self.rollbacks += 1;
            tracing::debug!(target: "evm_plugin::context", address = %frame.address, depth = frame.depth, snapshot = %frame.snapshot, "call rolled back");
            return Ok(CallExit { frame, reverted: true });
        }

        store.discard_snapshot(frame.snapshot);
        Ok(CallExit { frame, reverted: false })
    }

    /// Requests a rollback of the innermost active call.
    pub fn request_rollback(&mut self) -> Result<SnapshotId, ConsistencyError> {
        let frame = self.current_frame().ok_or(ConsistencyError::NoActiveFrame)?;
        self.request_rollback_to(frame.snapshot)?;
        Ok(frame.snapshot)
    }

    /// Requests a rollback of the active call that owns `snapshot`.
    ///
    /// When a rollback is already pending the outermost of the two targets wins, since reverting
    /// it also discards everything the inner call did.
    pub fn request_rollback_to(&mut self, snapshot: SnapshotId) -> Result<(), ConsistencyError> {
        if self.call_stack.is_empty() {
            return Err(ConsistencyError::NoActiveFrame);
        }
        let depth = self.depth_of(snapshot).ok_or(ConsistencyError::UnknownSnapshot(snapshot))?;
        match self.rollback.and_then(|pending| self.depth_of(pending)) {
            Some(pending_depth) if pending_depth <= depth => {
                tracing::debug!(target: "evm_plugin::context", %snapshot, "rollback already pending for an enclosing call");
            }
            _ => self.rollback = Some(snapshot),
        }
        Ok(())
    }

    fn depth_of(&self, snapshot: SnapshotId) -> Option<usize> {
        self.call_stack.iter().find(|frame| frame.snapshot == snapshot).map(|frame| frame.depth)
    }

    /// Leaves the transaction. Returns the frames that were still open, outermost first.
    pub fn finish(&mut self) -> Vec<CallFrame> {
        self.phase = ContextPhase::Idle;
        self.rollback = None;
        std::mem::take(&mut self.call_stack)
    }

    /// Current phase.
    pub const fn phase(&self) -> ContextPhase {
        self.phase
    }

    /// Whether a transaction is being tracked.
    pub fn is_active(&self) -> bool {
        self.phase == ContextPhase::Active
    }

    /// Hash of the tracked transaction.
    pub const fn tx_hash(&self) -> Option<B256> {
        self.tx_hash
    }

    /// Depth of the innermost active call, `0` when none is active.
    pub fn call_layer(&self) -> usize {
        self.call_stack.len()
    }

    /// Active calls, outermost first.
    pub fn call_stack(&self) -> &[CallFrame] {
        &self.call_stack
    }

    /// The innermost active call.
    pub fn current_frame(&self) -> Option<CallFrame> {
        self.call_stack.last().copied()
    }

    /// Every contract entered so far, in call order.
    pub fn contracts_touched(&self) -> &[Address] {
        &self.contracts_touched
    }

    /// Whether a rollback is pending.
    pub const fn rollback_requested(&self) -> bool {
        self.rollback.is_some()
    }

    /// Snapshot targeted by the pending rollback.
    pub const fn rollback_snapshot(&self) -> Option<SnapshotId> {
        self.rollback
    }

    /// Outcome of every ended call, keyed by depth. A later call at the same depth overwrites an
    /// earlier one.
    pub const fn valid_calls(&self) -> &BTreeMap<usize, bool> {
        &self.valid_calls
    }

    /// Number of rollbacks executed in this transaction.
    pub const fn rollbacks(&self) -> usize {
        self.rollbacks
    }
}

#[cfg(test)]
mod tests {
    use alloy_primitives::address;

    use super::*;
    use crate::test_utils::{RecordingStore, StoreCall};

    const A: Address = address!("0x000000000000000000000000000000000000000a");
    const B: Address = address!("0x000000000000000000000000000000000000000b");
    const C: Address = address!("0x000000000000000000000000000000000000000c");

    #[test]
    fn test_exit_without_frame_is_unbalanced() {
        let mut store = RecordingStore::default();
        let mut ctx = CallContext::new();
        ctx.begin(B256::ZERO, None, &mut store);
        assert_eq!(ctx.exit_call(true, &mut store), Err(ConsistencyError::Unbalanced));
    }

    #[test]
    fn test_enter_requires_transaction() {
        let mut store = RecordingStore::default();
        let mut ctx = CallContext::new();
        assert_eq!(ctx.enter_call(A, &mut store), Err(ConsistencyError::NotActive));
    }

    #[test]
    fn test_outer_rollback_wins() {
        let mut store = RecordingStore::default();
        let mut ctx = CallContext::new();
        let outer = ctx.begin(B256::ZERO, Some(A), &mut store).unwrap();
        ctx.enter_call(B, &mut store).unwrap();
        ctx.request_rollback_to(outer.snapshot).unwrap();
        ctx.request_rollback().unwrap();
        assert_eq!(ctx.rollback_snapshot(), Some(outer.snapshot));

        let inner = ctx.exit_call(true, &mut store).unwrap();
        assert!(!inner.reverted);
        let top = ctx.exit_call(true, &mut store).unwrap();
        assert!(top.reverted);
        assert_eq!(store.reverts(), vec![outer.snapshot]);
    }

    #[test]
    fn test_rollback_is_deferred_to_the_targeted_frame() {
        let mut store = RecordingStore::default();
        let mut ctx = CallContext::new();
        ctx.begin(B256::ZERO, Some(A), &mut store);
        let flagged = ctx.enter_call(B, &mut store).unwrap();
        ctx.request_rollback().unwrap();
        let nested = ctx.enter_call(C, &mut store).unwrap();

        ctx.exit_call(true, &mut store).unwrap();
        assert!(ctx.rollback_requested());
        assert!(store.calls().contains(&StoreCall::Discard(nested.snapshot)));

        let exit = ctx.exit_call(false, &mut store).unwrap();
        assert!(exit.reverted);
        assert!(!ctx.rollback_requested());
        assert_eq!(store.reverts(), vec![flagged.snapshot]);
        assert_eq!(ctx.valid_calls().get(&2), Some(&false));
    }

    #[test]
    fn test_unknown_snapshot_is_rejected() {
        let mut store = RecordingStore::default();
        let mut ctx = CallContext::new();
        assert_eq!(ctx.request_rollback(), Err(ConsistencyError::NoActiveFrame));
        ctx.begin(B256::ZERO, Some(A), &mut store);
        assert_eq!(
            ctx.request_rollback_to(SnapshotId(99)),
            Err(ConsistencyError::UnknownSnapshot(SnapshotId(99)))
        );
    }

    #[test]
    fn test_finish_reports_open_frames() {
        let mut store = RecordingStore::default();
        let mut ctx = CallContext::new();
        ctx.begin(B256::ZERO, Some(A), &mut store);
        ctx.enter_call(B, &mut store).unwrap();
        ctx.request_rollback().unwrap();
        let open = ctx.finish();
        assert_eq!(open.iter().map(|f| f.address).collect::<Vec<_>>(), vec![A, B]);
        assert_eq!(ctx.phase(), ContextPhase::Idle);
        assert!(!ctx.rollback_requested());
        assert_eq!(ctx.call_layer(), 0);
    }
}
