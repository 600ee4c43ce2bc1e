//! Ledger integration module for the TON blockchain
//!
//! This module provides the client and types for reading the escrow contract's transaction
//! stream from the TonAPI indexer. The listener only ever reads from the ledger; it never
//! submits transactions.

/// Standard (workchain:hash) account addresses
pub mod address;
/// Bag-of-cells reader used to decode message payloads
pub mod cell;
/// HTTP client for the TonAPI indexer
mod client;
/// Type definitions for ledger data structures
mod types;

pub use address::{AccountAddress, AddressError};
pub use client::{LedgerQuery, TonApiClient};
pub use types::*;
