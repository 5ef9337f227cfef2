//! Event records handed to extension handlers.
//!
//! A record only lives for the duration of one handler invocation. Quantities that may exceed
//! 64 bits (or that extensions historically received as text) are rendered as decimal strings, so
//! the block number of block 100 is `"100"`.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};

use crate::{
    constants::events, BlockHeader, CallFrame, CallKind, CallRequest, TransactionInfo, TxOutcome,
};

/// One dispatched event together with a view of the call context at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Event name the handler is bound to.
    pub event: String,
    /// Hash of the transaction being applied, if any.
    pub tx_hash: Option<B256>,
    /// Depth of the innermost active call.
    pub call_layer: usize,
    /// Active call frames, outermost first.
    pub call_stack: Vec<CallFrame>,
    /// Event specific data.
    pub body: EventBody,
}

impl EventRecord {
    /// Encodes the record into the opaque bytes handed to dynamically loaded handlers.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decodes a record produced by [`EventRecord::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Event specific part of an [`EventRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum EventBody {
    /// Block metadata.
    Block(BlockInfo),
    /// A bare lifecycle marker.
    Flag(FlagInfo),
    /// An external call is starting.
    ExternalStart(ExternalStart),
    /// An external call has ended.
    ExternalEnd(ExternalEnd),
    /// The transaction has been applied.
    TxEnd(TxSummary),
}

impl EventBody {
    /// The block data, if this is a block event.
    pub const fn as_block(&self) -> Option<&BlockInfo> {
        match self {
            Self::Block(info) => Some(info),
            _ => None,
        }
    }

    /// The call start data, if this is a call start event.
    pub const fn as_external_start(&self) -> Option<&ExternalStart> {
        match self {
            Self::ExternalStart(info) => Some(info),
            _ => None,
        }
    }

    /// The call end data, if this is a call end event.
    pub const fn as_external_end(&self) -> Option<&ExternalEnd> {
        match self {
            Self::ExternalEnd(info) => Some(info),
            _ => None,
        }
    }

    /// The transaction summary, if this is a transaction end event.
    pub const fn as_tx_end(&self) -> Option<&TxSummary> {
        match self {
            Self::TxEnd(info) => Some(info),
            _ => None,
        }
    }
}

/// Block header fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockInfo {
    /// `Block<number>`.
    pub op: String,
    /// Parent block hash.
    pub parent_hash: B256,
    /// Ommers hash.
    pub uncle_hash: B256,
    /// Fee recipient.
    pub coinbase: Address,
    /// State root.
    pub state_root: B256,
    /// Transaction trie root.
    pub tx_hash_root: B256,
    /// Receipt trie root.
    pub receipt_hash: B256,
    /// Decimal difficulty.
    pub difficulty: String,
    /// Decimal block number.
    pub number: String,
    /// Block gas limit.
    pub gas_limit: u64,
    /// Gas used by the block.
    pub gas_used: u64,
    /// Block timestamp.
    pub time: u64,
    /// Extra data.
    pub extra: Bytes,
    /// Mix digest.
    pub mix_digest: B256,
    /// Proof-of-work nonce.
    pub nonce: u64,
}

impl From<&BlockHeader> for BlockInfo {
    fn from(header: &BlockHeader) -> Self {
        Self {
            op: format!("Block{}", header.number),
            parent_hash: header.parent_hash,
            uncle_hash: header.uncle_hash,
            coinbase: header.coinbase,
            state_root: header.state_root,
            tx_hash_root: header.transactions_root,
            receipt_hash: header.receipts_root,
            difficulty: header.difficulty.to_string(),
            number: header.number.to_string(),
            gas_limit: header.gas_limit,
            gas_used: header.gas_used,
            time: header.timestamp,
            extra: header.extra_data.clone(),
            mix_digest: header.mix_hash,
            nonce: header.nonce,
        }
    }
}

/// A lifecycle marker carrying only its event name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagInfo {
    /// The event name.
    pub op: String,
}

impl FlagInfo {
    /// Creates the marker for `event`.
    pub fn new(event: &str) -> Self {
        Self { op: event.to_string() }
    }
}

/// Code and input of a called contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallData {
    /// Code at the callee, empty when the callee has none.
    pub contract_code: Bytes,
    /// Call data.
    pub input_data: Bytes,
}

/// Deployment data of a created contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateData {
    /// Address of the new contract.
    pub contract_addr: Address,
    /// Init code.
    pub contract_deploy_code: Bytes,
    /// Runtime code stored at the new address, if it exists.
    pub contract_runtime_code: Option<Bytes>,
}

/// Data dispatched with `EXTERNALINFOSTART`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalStart {
    /// Always `EXTERNALINFOSTART`.
    pub op: String,
    /// Enclosing transaction.
    pub tx_hash: B256,
    /// Decimal block number.
    pub block_number: String,
    /// Decimal block timestamp.
    pub block_time: String,
    /// Caller.
    pub from: Address,
    /// Callee. `None` for the top-level message of a creation.
    pub to: Option<Address>,
    /// Decimal value.
    pub value: String,
    /// Decimal gas price of the enclosing transaction.
    pub gas_price: String,
    /// Gas available to the call.
    pub gas_limit: u64,
    /// Sender nonce. Only present on the top-level message.
    pub nonce: Option<u64>,
    /// Depth of the call, `1` for the top-level message.
    pub call_layer: usize,
    /// `None` for the top-level message of a creation.
    pub call_type: Option<CallKind>,
    /// Callee code and input. `None` for the top-level message of a creation.
    pub call_info: Option<CallData>,
}

impl ExternalStart {
    /// Start data of a transaction's top-level message.
    pub fn top_level(
        block: &BlockHeader,
        tx: &TransactionInfo,
        contract_code: Option<Bytes>,
    ) -> Self {
        let call_info = tx.to.map(|_| CallData {
            contract_code: contract_code.unwrap_or_default(),
            input_data: tx.input.clone(),
        });
        Self {
            op: events::EXTERNAL_INFO_START.to_string(),
            tx_hash: tx.hash,
            block_number: block.number.to_string(),
            block_time: block.timestamp.to_string(),
            from: tx.from,
            to: tx.to,
            value: tx.value.to_string(),
            gas_price: tx.gas_price.to_string(),
            gas_limit: tx.gas_limit,
            nonce: Some(tx.nonce),
            call_layer: 1,
            call_type: tx.to.map(|_| CallKind::Call),
            call_info,
        }
    }

    /// Start data of a nested call at `call_layer`.
    pub fn nested(
        block: &BlockHeader,
        tx: &TransactionInfo,
        request: &CallRequest,
        call_layer: usize,
        contract_code: Option<Bytes>,
    ) -> Self {
        Self {
            op: events::EXTERNAL_INFO_START.to_string(),
            tx_hash: tx.hash,
            block_number: block.number.to_string(),
            block_time: block.timestamp.to_string(),
            from: request.caller,
            to: Some(request.target),
            value: request.value.to_string(),
            gas_price: tx.gas_price.to_string(),
            gas_limit: request.gas_limit,
            nonce: None,
            call_layer,
            call_type: Some(request.kind),
            call_info: Some(CallData {
                contract_code: contract_code.unwrap_or_default(),
                input_data: request.input.clone(),
            }),
        }
    }
}

/// Data dispatched with `EXTERNALINFOEND`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalEnd {
    /// Always `EXTERNALINFOEND`.
    pub op: String,
    /// Enclosing transaction.
    pub tx_hash: B256,
    /// Depth of the call that ended.
    pub call_layer: usize,
    /// Call scheme.
    pub call_type: Option<CallKind>,
    /// Callee, or the created contract.
    pub to: Option<Address>,
    /// Whether the call succeeded.
    pub is_success: bool,
    /// Gas used. Only known for the top-level message.
    pub gas_used: Option<u64>,
    /// Return data.
    pub output: Bytes,
    /// Deployment data, for a successful creation.
    pub create_info: Option<CreateData>,
}

impl ExternalEnd {
    /// End data of a transaction's top-level message.
    pub fn top_level(
        tx: &TransactionInfo,
        outcome: &TxOutcome,
        runtime_code: Option<Bytes>,
    ) -> Self {
        let create_info = if tx.is_create() {
            outcome.created_address.map(|contract_addr| CreateData {
                contract_addr,
                contract_deploy_code: tx.input.clone(),
                contract_runtime_code: runtime_code,
            })
        } else {
            None
        };
        Self {
            op: events::EXTERNAL_INFO_END.to_string(),
            tx_hash: tx.hash,
            call_layer: 1,
            call_type: Some(tx.kind()),
            to: tx.to.or(outcome.created_address),
            is_success: outcome.success,
            gas_used: Some(outcome.gas_used),
            output: outcome.output.clone(),
            create_info,
        }
    }

    /// End data of a nested call that ran at `call_layer`.
    pub fn nested(
        tx: &TransactionInfo,
        frame: &CallFrame,
        kind: CallKind,
        success: bool,
        output: Bytes,
    ) -> Self {
        Self {
            op: events::EXTERNAL_INFO_END.to_string(),
            tx_hash: tx.hash,
            call_layer: frame.depth,
            call_type: Some(kind),
            to: Some(frame.address),
            is_success: success,
            gas_used: None,
            output,
            create_info: None,
        }
    }
}

/// Data dispatched with `TXEND`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSummary {
    /// Always `TXEND`.
    pub op: String,
    /// The transaction.
    pub tx_hash: B256,
    /// Whether the top-level message succeeded.
    pub is_success: bool,
    /// Every contract entered during the transaction, in call order.
    pub contracts_touched: Vec<Address>,
    /// Number of rollbacks executed on behalf of extensions.
    pub rollbacks: usize,
}

#[cfg(test)]
mod tests {
    use alloy_primitives::{address, b256, U256};

    use super::*;

    #[test]
    fn test_block_info_renders_decimal_quantities() {
        let header = BlockHeader {
            number: 100,
            difficulty: U256::from(131_072u64),
            timestamp: 1_700_000_000,
            ..Default::default()
        };
        let info = BlockInfo::from(&header);
        assert_eq!(info.op, "Block100");
        assert_eq!(info.number, "100");
        assert_eq!(info.difficulty, "131072");
        assert_eq!(info.time, 1_700_000_000);
    }

    #[test]
    fn test_top_level_creation_carries_create_info() {
        let tx = TransactionInfo {
            hash: b256!("0x1111111111111111111111111111111111111111111111111111111111111111"),
            input: Bytes::from_static(&[0x60, 0x00]),
            ..Default::default()
        };
        let created = address!("0x00000000000000000000000000000000000000c0");
        let outcome =
            TxOutcome { success: true, created_address: Some(created), ..Default::default() };
        let end = ExternalEnd::top_level(&tx, &outcome, Some(Bytes::from_static(&[0x00])));
        assert_eq!(end.call_type, Some(CallKind::Create));
        assert_eq!(end.to, Some(created));
        let create = end.create_info.unwrap();
        assert_eq!(create.contract_addr, created);
        assert_eq!(create.contract_deploy_code, tx.input);

        let start = ExternalStart::top_level(&BlockHeader::default(), &tx, None);
        assert_eq!(start.to, None);
        assert_eq!(start.call_type, None);
        assert!(start.call_info.is_none());
    }

    #[test]
    fn test_record_wire_form_is_tagged() {
        let record = EventRecord {
            event: events::TX_START.to_string(),
            tx_hash: None,
            call_layer: 0,
            call_stack: Vec::new(),
            body: EventBody::Flag(FlagInfo::new(events::TX_START)),
        };
        let json: serde_json::Value = serde_json::from_slice(&record.encode().unwrap()).unwrap();
        assert_eq!(json["body"]["kind"], "flag");
        assert_eq!(json["body"]["data"]["op"], "TXSTART");
        assert_eq!(EventRecord::decode(&record.encode().unwrap()).unwrap(), record);
    }
}
