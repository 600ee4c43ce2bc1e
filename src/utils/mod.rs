//!
//! Utility module for the escrow listener.
//!
//! Re-exports formatting helpers used when reporting amounts.
/// Utility functions for formatting and display
pub mod format;

pub use format::{TON_DECIMALS, format_token_amount};
