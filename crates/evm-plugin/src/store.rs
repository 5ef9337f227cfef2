//! The state store seen by the call context tracker.
//!
//! The tracker only needs the snapshot/revert half of a state database. Everything else (balances,
//! storage, tries) stays behind the execution engine.

use core::fmt::Display;

use alloy_primitives::{Address, Bytes, U256};
use auto_impl::auto_impl;
use revm::database::{Cache, CacheDB, DatabaseRef};
use serde::{Deserialize, Serialize};

/// Identifier of a state snapshot.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    derive_more::Display,
    derive_more::From,
    derive_more::Into,
)]
#[display("#{_0}")]
pub struct SnapshotId(pub u64);

/// Errors raised by a [`StateStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The snapshot was never taken, or was invalidated by an earlier revert.
    #[error("unknown snapshot {0}")]
    UnknownSnapshot(SnapshotId),
    /// The backing database failed.
    #[error("state backend error: {0}")]
    Backend(String),
}

/// Snapshot and revert access to the state the engine mutates.
///
/// Snapshots nest: reverting to a snapshot invalidates every snapshot taken after it.
#[auto_impl(&mut, Box)]
pub trait StateStore {
    /// Takes a snapshot of the current state.
    fn snapshot(&mut self) -> SnapshotId;

    /// Restores the state captured by `id`.
    fn revert_to_snapshot(&mut self, id: SnapshotId) -> Result<(), StoreError>;

    /// Releases a snapshot that will never be reverted to.
    fn discard_snapshot(&mut self, _id: SnapshotId) {}

    /// Code deployed at `address`, if any.
    fn code(&self, _address: Address) -> Option<Bytes> {
        None
    }
}

/// A [`StateStore`] over revm's [`CacheDB`].
///
/// A snapshot is a copy of the cache layer. The backing database is read only, so the cache is
/// the whole mutable state.
#[derive(Debug, Clone, derive_more::Deref, derive_more::DerefMut)]
pub struct CacheDbStore<DB> {
    #[deref]
    #[deref_mut]
    db: CacheDB<DB>,
    snapshots: Vec<(SnapshotId, Cache)>,
    next_id: u64,
}

impl<DB: Default> Default for CacheDbStore<DB> {
    fn default() -> Self {
        Self::new(CacheDB::new(DB::default()))
    }
}

impl<DB> CacheDbStore<DB> {
    /// Wraps `db`.
    pub const fn new(db: CacheDB<DB>) -> Self {
        Self { db, snapshots: Vec::new(), next_id: 0 }
    }

    /// Number of snapshots that can still be reverted to.
    pub fn live_snapshots(&self) -> usize {
        self.snapshots.len()
    }

    /// Unwraps the database.
    pub fn into_inner(self) -> CacheDB<DB> {
        self.db
    }

    fn position(&self, id: SnapshotId) -> Option<usize> {
        self.snapshots.iter().position(|(snapshot, _)| *snapshot == id)
    }
}

impl<DB: DatabaseRef> CacheDbStore<DB>
where
    DB::Error: Display,
{
    /// Balance of `address`.
    pub fn balance(&mut self, address: Address) -> Result<U256, StoreError> {
        Ok(self.db.load_account(address).map_err(backend)?.info.balance)
    }

    /// Sets the balance of `address`.
    pub fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), StoreError> {
        self.db.load_account(address).map_err(backend)?.info.balance = balance;
        Ok(())
    }

    /// Moves `value` from `from` to `to`. Fails without touching either account when `from` cannot
    /// cover it.
    pub fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<bool, StoreError> {
        let available = self.balance(from)?;
        let Some(remaining) = available.checked_sub(value) else {
            return Ok(false);
        };
        self.set_balance(from, remaining)?;
        let credited = self.balance(to)?.saturating_add(value);
        self.set_balance(to, credited)?;
        Ok(true)
    }
}

impl<DB> StateStore for CacheDbStore<DB> {
    fn snapshot(&mut self) -> SnapshotId {
        let id = SnapshotId(self.next_id);
        self.next_id += 1;
        self.snapshots.push((id, self.db.cache.clone()));
        id
    }

    fn revert_to_snapshot(&mut self, id: SnapshotId) -> Result<(), StoreError> {
        let pos = self.position(id).ok_or(StoreError::UnknownSnapshot(id))?;
        let (_, cache) = self.snapshots.swap_remove(pos);
        self.snapshots.truncate(pos);
        self.db.cache = cache;
        Ok(())
    }

    fn discard_snapshot(&mut self, id: SnapshotId) {
        if let Some(pos) = self.position(id) {
            self.snapshots.remove(pos);
        }
    }

    fn code(&self, address: Address) -> Option<Bytes> {
        let account = self.db.cache.accounts.get(&address)?;
        let code = match &account.info.code {
            Some(code) => code.original_bytes(),
            None => self.db.cache.contracts.get(&account.info.code_hash)?.original_bytes(),
        };
        (!code.is_empty()).then_some(code)
    }
}

fn backend(err: impl Display) -> StoreError {
    StoreError::Backend(err.to_string())
}
