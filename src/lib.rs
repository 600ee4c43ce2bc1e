//! Escrow ledger listener.
//!
//! Mirrors deposits to and withdrawals from a TON escrow contract into an off-chain balance
//! store and transaction history.

/// Environment configuration
pub mod config;
/// TonAPI client, ledger types and payload decoding primitives
pub mod ledger;
/// The polling listener
pub mod listener;
/// Balance and history stores
pub mod store;
/// Formatting helpers
pub mod utils;
