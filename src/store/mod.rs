//! Balance mirror and transaction-history stores.
//!
//! The listener writes to two systems of record: the account-balance mirror (shared with game
//! settlement) and the append-only transaction history. Both are reached through the traits in
//! this module so the reconciler can run against Supabase in production and an in-memory store
//! in tests.

/// In-memory implementation of both stores
mod memory;
/// Supabase (PostgREST) implementation of both stores
mod supabase;

pub use memory::InMemoryStore;
pub use supabase::SupabaseStore;

use crate::ledger::AccountAddress;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An account in the balance mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: AccountAddress,
    /// Balance in nanotons.
    pub balance: u128,
}

/// Direction of a balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Deposit,
    Withdraw,
}

impl Direction {
    /// Signed delta this direction applies for `amount`.
    pub fn delta(&self, amount: u128) -> i128 {
        match self {
            Direction::Deposit => amount as i128,
            Direction::Withdraw => -(amount as i128),
        }
    }
}

/// One line of the append-only transaction history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionHistoryRecord {
    /// Unique key of the reconciled event
    pub tx_hash: String,
    pub wallet_address: AccountAddress,
    pub amount: u128,
    pub direction: Direction,
    pub created_at: DateTime<Utc>,
}

/// Outcome of appending to the history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Inserted,
    /// A record with the same `tx_hash` already exists; nothing was written.
    Duplicate,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Store returned status {status}: {body}")]
    StatusError { status: u16, body: String },

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Account {0} not found")]
    AccountNotFound(AccountAddress),

    #[error("Applying {delta} to {address} would make its balance negative")]
    InsufficientBalance { address: AccountAddress, delta: i128 },

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// The account-balance mirror.
#[async_trait::async_trait]
pub trait BalanceStore: Send + Sync {
    /// Look up an account; `None` when it has not been provisioned.
    async fn get_account(&self, address: &AccountAddress) -> Result<Option<Account>, StoreError>;

    /// Atomically add `delta` to the account's balance and return the new balance.
    ///
    /// Must be safe under concurrent callers and must reject a delta that would take the
    /// balance below zero with `StoreError::InsufficientBalance`.
    async fn apply_delta(&self, address: &AccountAddress, delta: i128) -> Result<u128, StoreError>;
}

/// The append-only transaction history.
#[async_trait::async_trait]
pub trait HistoryStore: Send + Sync {
    /// Append a record. A duplicate `tx_hash` is reported, never stored twice.
    async fn append(&self, record: &TransactionHistoryRecord) -> Result<AppendOutcome, StoreError>;

    /// Whether a record with this `tx_hash` exists.
    async fn contains(&self, tx_hash: &str) -> Result<bool, StoreError>;
}
