use std::collections::HashMap;

use alloy_primitives::{Address, Bytes, U256};

use crate::{SnapshotId, StateStore, StoreError, ValueTransfer};

/// A call made on a [`RecordingStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCall {
    /// `snapshot` returned the id.
    Snapshot(SnapshotId),
    /// `revert_to_snapshot` with the id.
    Revert(SnapshotId),
    /// `discard_snapshot` with the id.
    Discard(SnapshotId),
}

/// A [`StateStore`] holding no state that records every call made on it.
#[derive(Debug, Default)]
pub struct RecordingStore {
    next: u64,
    live: Vec<SnapshotId>,
    calls: Vec<StoreCall>,
    code: HashMap<Address, Bytes>,
}

impl RecordingStore {
    /// Reports `code` as deployed at `address`.
    pub fn with_code(mut self, address: Address, code: Bytes) -> Self {
        self.code.insert(address, code);
        self
    }

    /// Every call, in order.
    pub fn calls(&self) -> &[StoreCall] {
        &self.calls
    }

    /// Snapshots reverted to, in order.
    pub fn reverts(&self) -> Vec<SnapshotId> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                StoreCall::Revert(id) => Some(*id),
                _ => None,
            })
            .collect()
    }

    /// Number of snapshots taken.
    pub fn snapshots_taken(&self) -> usize {
        self.calls.iter().filter(|call| matches!(call, StoreCall::Snapshot(_))).count()
    }

    /// Snapshots that can still be reverted to.
    pub fn live(&self) -> &[SnapshotId] {
        &self.live
    }
}

impl StateStore for RecordingStore {
    fn snapshot(&mut self) -> SnapshotId {
        let id = SnapshotId(self.next);
        self.next += 1;
        self.live.push(id);
        self.calls.push(StoreCall::Snapshot(id));
        id
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) -> Result<(), StoreError> {
        self.calls.push(StoreCall::Revert(id));
        let pos = self.live.iter().position(|live| *live == id).ok_or(StoreError::UnknownSnapshot(id))?;
        self.live.truncate(pos);
        Ok(())
    }

    fn discard_snapshot(&mut self, id: SnapshotId) {
        self.calls.push(StoreCall::Discard(id));
        self.live.retain(|live| *live != id);
    }

    fn code(&self, address: Address) -> Option<Bytes> {
        self.code.get(&address).cloned()
    }
}

impl ValueTransfer for RecordingStore {
    fn transfer(&mut self, _from: Address, _to: Address, _value: U256) -> Result<bool, StoreError> {
        Ok(true)
    }
}
