//! Escrow event decoding.
//!
//! The escrow contract reports every deposit and withdrawal as an external outbound message
//! whose body is a single cell:
//!
//! ```text
//! op:uint32 user:MsgAddressStd amount:Coins timestamp:uint64
//! ```
//!
//! A fixed table maps each known op code to the function decoding its payload into a
//! `DecodedEvent` variant. Unknown op codes are not an error; they are other contract
//! traffic.

use crate::ledger::cell::{BagOfCells, CellError};
use crate::ledger::{AccountAddress, MessageKind, OutboundMessage, RawTransaction};
use crate::store::Direction;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Op code of the escrow contract's `DepositEvent`.
pub const DEPOSIT_EVENT_OPCODE: u32 = 0x2f2b7a15;
/// Op code of the escrow contract's `WithdrawEvent`.
pub const WITHDRAW_EVENT_OPCODE: u32 = 0x4a1c8e63;

/// Identity of an event within the transaction that emitted it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId {
    pub tx_hash: String,
    /// Position among the escrow events decoded from the transaction
    #[serde(default)]
    pub event_index: usize,
    /// Position of the carrying message in the transaction's out messages
    pub message_index: usize,
}

impl EventId {
    /// Key under which the event is recorded in the transaction history.
    ///
    /// The first event of a transaction is keyed by the bare transaction hash; later ones get
    /// an index suffix so they are not mistaken for replays of the first.
    pub fn history_key(&self) -> String {
        if self.event_index == 0 {
            self.tx_hash.clone()
        } else {
            format!("{}:{}", self.tx_hash, self.event_index)
        }
    }
}

/// Payload shared by both escrow events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub id: EventId,
    pub account: AccountAddress,
    /// Amount in nanotons
    pub amount: u128,
    /// Contract-reported unix time
    pub timestamp: u64,
}

/// A typed escrow event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DecodedEvent {
    Deposit(EscrowEvent),
    Withdraw(EscrowEvent),
}

impl DecodedEvent {
    pub fn payload(&self) -> &EscrowEvent {
        match self {
            DecodedEvent::Deposit(event) | DecodedEvent::Withdraw(event) => event,
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            DecodedEvent::Deposit(_) => Direction::Deposit,
            DecodedEvent::Withdraw(_) => Direction::Withdraw,
        }
    }

    pub fn id(&self) -> &EventId {
        &self.payload().id
    }

    pub fn account(&self) -> &AccountAddress {
        &self.payload().account
    }

    fn payload_mut(&mut self) -> &mut EscrowEvent {
        match self {
            DecodedEvent::Deposit(event) | DecodedEvent::Withdraw(event) => event,
        }
    }

    /// Signed balance change the event implies.
    pub fn delta(&self) -> i128 {
        self.direction().delta(self.payload().amount)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("message has a known op code but no body")]
    MissingBody,

    #[error("body op code {found:#010x} does not match message op code {expected:#010x}")]
    OpcodeMismatch { expected: u32, found: u32 },

    #[error("malformed payload: {0}")]
    CellError(#[from] CellError),
}

type DecodeFn = fn(EventId, &[u8], u32) -> Result<DecodedEvent, DecodeError>;

fn decode_payload(id: EventId, body: &[u8], op_code: u32) -> Result<EscrowEvent, DecodeError> {
    let bag = BagOfCells::parse(body)?;
    let mut slice = bag.root().slice();

    let found = slice.load_u32()?;
    if found != op_code {
        return Err(DecodeError::OpcodeMismatch {
            expected: op_code,
            found,
        });
    }

    Ok(EscrowEvent {
        id,
        account: slice.load_address()?,
        amount: slice.load_coins()?,
        timestamp: slice.load_u64()?,
    })
}

fn decode_deposit(id: EventId, body: &[u8], op_code: u32) -> Result<DecodedEvent, DecodeError> {
    decode_payload(id, body, op_code).map(DecodedEvent::Deposit)
}

fn decode_withdraw(id: EventId, body: &[u8], op_code: u32) -> Result<DecodedEvent, DecodeError> {
    decode_payload(id, body, op_code).map(DecodedEvent::Withdraw)
}

/// A message that matched the table but could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeFailure {
    pub tx_hash: String,
    pub message_index: usize,
    pub error: String,
}

/// Events decoded from a batch, plus the messages that failed.
#[derive(Debug, Default)]
pub struct DecodeOutput {
    pub events: Vec<DecodedEvent>,
    pub failures: Vec<DecodeFailure>,
}

/// Op-code table for the two escrow events.
#[derive(Debug, Clone)]
pub struct EventDecoder {
    table: [(u32, DecodeFn); 2],
}

impl Default for EventDecoder {
    fn default() -> Self {
        Self::with_opcodes(DEPOSIT_EVENT_OPCODE, WITHDRAW_EVENT_OPCODE)
    }
}

impl EventDecoder {
    /// Decoder for a contract build whose event op codes differ from the defaults.
    pub fn with_opcodes(deposit: u32, withdraw: u32) -> Self {
        Self {
            table: [(deposit, decode_deposit), (withdraw, decode_withdraw)],
        }
    }

    /// Decode one outbound message as the first event of its transaction.
    ///
    /// Returns `Ok(None)` for messages that are not escrow events.
    pub fn decode_message(
        &self,
        tx_hash: &str,
        message_index: usize,
        message: &OutboundMessage,
    ) -> Result<Option<DecodedEvent>, DecodeError> {
        if message.kind != MessageKind::ExternalOut {
            return Ok(None);
        }
        let Some(op_code) = message.op_code else {
            return Ok(None);
        };
        let Some((_, decode)) = self.table.iter().find(|(code, _)| *code == op_code) else {
            return Ok(None);
        };
        let body = message.raw_body.as_deref().ok_or(DecodeError::MissingBody)?;

        let id = EventId {
            tx_hash: tx_hash.to_string(),
            event_index: 0,
            message_index,
        };
        decode(id, body, op_code).map(Some)
    }

    /// Decode every outbound message of the given transactions, in order.
    ///
    /// Events are numbered by their order among the transaction's decoded events, so other
    /// messages in the transaction never shift an event's history key. A failure is confined to
    /// its own message.
    pub fn decode_transactions<'a, I>(&self, txs: I) -> DecodeOutput
    where
        I: IntoIterator<Item = &'a RawTransaction>,
    {
        let mut output = DecodeOutput::default();
        for tx in txs {
            let mut event_index = 0;
            for (index, message) in tx.out_msgs.iter().enumerate() {
                match self.decode_message(&tx.hash, index, message) {
                    Ok(Some(mut event)) => {
                        event.payload_mut().id.event_index = event_index;
                        event_index += 1;
                        debug!("Decoded {:?} event from {}", event.direction(), tx.hash);
                        output.events.push(event);
                    }
                    Ok(None) => {}
                    Err(e) => output.failures.push(DecodeFailure {
                        tx_hash: tx.hash.clone(),
                        message_index: index,
                        error: e.to_string(),
                    }),
                }
            }
        }
        output
    }
}
