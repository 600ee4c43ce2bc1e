//! Types for the TonAPI transaction feed and their ledger-native counterparts

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Position of a transaction in an account's stream (TON logical time).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LedgerPosition(pub u64);

impl LedgerPosition {
    /// Position before every transaction of the account.
    pub const GENESIS: LedgerPosition = LedgerPosition(0);
}

impl std::fmt::Display for LedgerPosition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lt {}", self.0)
    }
}

/// How an outbound message leaves the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// Log-style message to nowhere (`ext_out_msg`); events are emitted this way
    ExternalOut,
    /// Message to another contract (`int_msg`)
    Internal,
    /// Inbound external message (`ext_in_msg`)
    ExternalIn,
    /// Any message type this listener does not know
    Other,
}

impl MessageKind {
    fn from_wire(msg_type: &str) -> Self {
        match msg_type {
            "ext_out_msg" => MessageKind::ExternalOut,
            "int_msg" => MessageKind::Internal,
            "ext_in_msg" => MessageKind::ExternalIn,
            _ => MessageKind::Other,
        }
    }
}

/// A message produced by a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// The 32-bit operation code, when the body carries one
    pub op_code: Option<u32>,
    /// The serialized bag of cells holding the body
    pub raw_body: Option<Vec<u8>>,
    /// Delivery kind of the message
    pub kind: MessageKind,
}

/// A transaction on the watched account, reduced to what the listener needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransaction {
    /// Transaction hash, the natural idempotency key for its effects
    pub hash: String,
    /// Whether the compute phase succeeded
    pub compute_success: bool,
    /// Whether the action phase succeeded
    pub action_success: bool,
    /// Whether the transaction was aborted
    pub aborted: bool,
    /// Body of the inbound message that triggered the transaction
    pub in_msg_body: Option<Vec<u8>>,
    /// Outbound messages in emission order
    pub out_msgs: Vec<OutboundMessage>,
    /// Position of the transaction in the account's stream
    pub position: LedgerPosition,
}

/// Result order requested from the indexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending logical time
    OldestFirst,
    /// Descending logical time
    NewestFirst,
}

impl SortOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::OldestFirst => "asc",
            SortOrder::NewestFirst => "desc",
        }
    }
}

/// Parameters of a single transaction page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionQuery {
    /// Only return transactions strictly after this position
    pub after: Option<LedgerPosition>,
    /// Maximum number of transactions to return
    pub limit: u32,
    /// Requested ordering of the page
    pub order: SortOrder,
}

/// Response envelope of `GET /v2/blockchain/accounts/{id}/transactions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonApiTransactions {
    pub transactions: Vec<TonApiTransaction>,
}

/// Transaction as returned by TonAPI. Only the fields the listener reads are mapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonApiTransaction {
    /// The transaction hash.
    pub hash: String,
    /// Logical time of the transaction.
    pub lt: u64,
    /// Overall success flag reported by the indexer.
    #[serde(default)]
    pub success: bool,
    /// Unix time of the block containing the transaction.
    #[serde(default)]
    pub utime: Option<i64>,
    /// Compute phase summary; absent when the phase was not reached.
    #[serde(default)]
    pub compute_phase: Option<TonApiComputePhase>,
    /// Action phase summary; absent when the phase was not reached.
    #[serde(default)]
    pub action_phase: Option<TonApiActionPhase>,
    /// Whether the transaction was aborted.
    #[serde(default)]
    pub aborted: bool,
    /// The inbound message.
    #[serde(default)]
    pub in_msg: Option<TonApiMessage>,
    /// Outbound messages.
    #[serde(default)]
    pub out_msgs: Vec<TonApiMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonApiComputePhase {
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonApiActionPhase {
    pub success: bool,
    #[serde(default)]
    pub result_code: Option<i32>,
}

/// Message as returned by TonAPI.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TonApiMessage {
    /// One of `int_msg`, `ext_in_msg`, `ext_out_msg`.
    pub msg_type: String,
    /// Operation code as a `0x`-prefixed hex string.
    #[serde(default)]
    pub op_code: Option<String>,
    /// Body as a hex-encoded bag of cells.
    #[serde(default)]
    pub raw_body: Option<String>,
    /// Name of the operation when the indexer recognises it.
    #[serde(default)]
    pub decoded_op_name: Option<String>,
}

/// Parse a TonAPI op code (`0x5fcc3d14` or bare hex).
pub fn parse_op_code(raw: &str) -> Option<u32> {
    let digits = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u32::from_str_radix(digits, 16).ok()
}

fn decode_body(hash: &str, raw: Option<&String>) -> Option<Vec<u8>> {
    let raw = raw?;
    match hex::decode(raw) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            debug!("Transaction {} carries a non-hex message body: {}", hash, e);
            None
        }
    }
}

impl From<TonApiTransaction> for RawTransaction {
    fn from(tx: TonApiTransaction) -> Self {
        let compute_success = tx
            .compute_phase
            .as_ref()
            .map(|phase| !phase.skipped && phase.success.unwrap_or(false))
            .unwrap_or(false);
        let action_success = tx
            .action_phase
            .as_ref()
            .map(|phase| phase.success)
            .unwrap_or(false);
        let in_msg_body = tx
            .in_msg
            .as_ref()
            .and_then(|msg| decode_body(&tx.hash, msg.raw_body.as_ref()));

        let out_msgs = tx
            .out_msgs
            .iter()
            .map(|msg| {
                let kind = MessageKind::from_wire(&msg.msg_type);
                if kind == MessageKind::Other {
                    debug!(
                        "Transaction {} has an out message of unknown type {}",
                        tx.hash, msg.msg_type
                    );
                }
                OutboundMessage {
                    op_code: msg.op_code.as_deref().and_then(parse_op_code),
                    raw_body: decode_body(&tx.hash, msg.raw_body.as_ref()),
                    kind,
                }
            })
            .collect();

        RawTransaction {
            hash: tx.hash,
            compute_success,
            action_success,
            aborted: tx.aborted,
            in_msg_body,
            out_msgs,
            position: LedgerPosition(tx.lt),
        }
    }
}

/// Error types for ledger queries
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Indexer returned status {status}: {body}")]
    StatusError { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid endpoint: {0}")]
    EndpointError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_op_code() {
        assert_eq!(parse_op_code("0x5fcc3d14"), Some(0x5fcc3d14));
        assert_eq!(parse_op_code("7362d09c"), Some(0x7362d09c));
        assert_eq!(parse_op_code("0xnothex"), None);
        assert_eq!(parse_op_code("0x1122334455"), None);
    }

    #[test]
    fn test_transaction_from_wire() {
        let wire: TonApiTransaction = serde_json::from_value(json!({
            "hash": "abc",
            "lt": 47000001,
            "success": true,
            "compute_phase": { "skipped": false, "success": true, "exit_code": 0 },
            "action_phase": { "success": true, "result_code": 0 },
            "aborted": false,
            "in_msg": { "msg_type": "int_msg", "op_code": "0x01", "raw_body": "b5ee" },
            "out_msgs": [
                { "msg_type": "ext_out_msg", "op_code": "0x0000002a", "raw_body": "0102" },
                { "msg_type": "int_msg" },
                { "msg_type": "something_else" }
            ]
        }))
        .expect("valid wire transaction");

        let tx = RawTransaction::from(wire);
        assert_eq!(tx.hash, "abc");
        assert_eq!(tx.position, LedgerPosition(47000001));
        assert!(tx.compute_success && tx.action_success && !tx.aborted);
        assert_eq!(tx.in_msg_body, Some(vec![0xb5, 0xee]));
        assert_eq!(tx.out_msgs.len(), 3);
        assert_eq!(tx.out_msgs[0].kind, MessageKind::ExternalOut);
        assert_eq!(tx.out_msgs[0].op_code, Some(42));
        assert_eq!(tx.out_msgs[0].raw_body, Some(vec![1, 2]));
        assert_eq!(tx.out_msgs[1].kind, MessageKind::Internal);
        assert_eq!(tx.out_msgs[1].raw_body, None);
        assert_eq!(tx.out_msgs[2].kind, MessageKind::Other);
    }

    #[test]
    fn test_missing_phases_count_as_failure() {
        let wire: TonApiTransaction = serde_json::from_value(json!({
            "hash": "def",
            "lt": 5,
            "compute_phase": { "skipped": true }
        }))
        .expect("valid wire transaction");

        let tx = RawTransaction::from(wire);
        assert!(!tx.compute_success);
        assert!(!tx.action_success);
        assert!(tx.out_msgs.is_empty());
        assert!(tx.in_msg_body.is_none());
    }
}
