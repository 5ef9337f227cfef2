//! Host-side views of the data the execution pipeline hands to the hooks.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// The block header fields exposed to extensions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BlockHeader {
    /// Hash of the parent block.
    pub parent_hash: B256,
    /// Hash of the ommers list.
    pub uncle_hash: B256,
    /// Fee recipient.
    pub coinbase: Address,
    /// State root after the block.
    pub state_root: B256,
    /// Root of the transaction trie.
    pub transactions_root: B256,
    /// Root of the receipt trie.
    pub receipts_root: B256,
    /// Proof-of-work difficulty.
    pub difficulty: U256,
    /// Block number.
    pub number: u64,
    /// Gas limit of the block.
    pub gas_limit: u64,
    /// Gas used by the block.
    pub gas_used: u64,
    /// Block timestamp in seconds.
    pub timestamp: u64,
    /// Extra data.
    pub extra_data: Bytes,
    /// Mix digest.
    pub mix_hash: B256,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

/// A transaction as seen at the start of its application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransactionInfo {
    /// Transaction hash.
    pub hash: B256,
    /// Recovered sender.
    pub from: Address,
    /// Direct call target, `None` for a contract creation.
    pub to: Option<Address>,
    /// Transferred value.
    pub value: U256,
    /// Gas price.
    pub gas_price: U256,
    /// Gas limit.
    pub gas_limit: u64,
    /// Sender nonce.
    pub nonce: u64,
    /// Call data, or init code for a creation.
    pub input: Bytes,
}

impl TransactionInfo {
    /// Whether the transaction deploys a contract.
    pub const fn is_create(&self) -> bool {
        self.to.is_none()
    }

    /// The kind of the top-level message.
    pub const fn kind(&self) -> CallKind {
        if self.is_create() {
            CallKind::Create
        } else {
            CallKind::Call
        }
    }
}

/// The scheme of an external call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallKind {
    /// A regular message call.
    #[default]
    Call,
    /// `CALLCODE`.
    CallCode,
    /// `DELEGATECALL`.
    DelegateCall,
    /// `STATICCALL`.
    StaticCall,
    /// `CREATE`.
    Create,
    /// `CREATE2`.
    Create2,
}

impl CallKind {
    /// Whether this call deploys a contract.
    pub const fn is_create(self) -> bool {
        matches!(self, Self::Create | Self::Create2)
    }

    /// The opcode-style name of the scheme.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Call => "CALL",
            Self::CallCode => "CALLCODE",
            Self::DelegateCall => "DELEGATECALL",
            Self::StaticCall => "STATICCALL",
            Self::Create => "CREATE",
            Self::Create2 => "CREATE2",
        }
    }
}

/// A nested call the execution engine is about to run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CallRequest {
    /// Call scheme.
    pub kind: CallKind,
    /// Caller of the frame.
    pub caller: Address,
    /// Callee, or the address being created.
    pub target: Address,
    /// Transferred value.
    pub value: U256,
    /// Call data or init code.
    pub input: Bytes,
    /// Gas forwarded to the frame.
    pub gas_limit: u64,
}

impl CallRequest {
    /// A plain `CALL` from `caller` to `target`.
    pub fn call(caller: Address, target: Address) -> Self {
        Self { kind: CallKind::Call, caller, target, ..Default::default() }
    }

    /// Sets the call data.
    pub fn with_input(mut self, input: Bytes) -> Self {
        self.input = input;
        self
    }

    /// Sets the transferred value.
    pub fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }
}

/// How a transaction's top-level message ended.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TxOutcome {
    /// Whether the message succeeded.
    pub success: bool,
    /// Gas used by the transaction.
    pub gas_used: u64,
    /// Return data, or the revert reason.
    pub output: Bytes,
    /// Address of the deployed contract, for creations.
    pub created_address: Option<Address>,
}

impl TxOutcome {
    /// A successful outcome using `gas_used`.
    pub fn success(gas_used: u64) -> Self {
        Self { success: true, gas_used, ..Default::default() }
    }

    /// A failed outcome using `gas_used`.
    pub fn failure(gas_used: u64) -> Self {
        Self { success: false, gas_used, ..Default::default() }
    }
}
