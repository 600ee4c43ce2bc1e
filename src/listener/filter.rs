//! On-chain success filter.
//!
//! A transaction whose compute or action phase failed, or which was aborted, rolled back
//! every effect it had on the contract, so its outbound messages must never be decoded.

use crate::ledger::RawTransaction;
use serde::{Deserialize, Serialize};

/// Why a transaction was dropped before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Aborted,
    Failed {
        compute_success: bool,
        action_success: bool,
    },
    /// No inbound body, so the transaction cannot be an escrow call
    NoInboundBody,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::Aborted => f.write_str("aborted"),
            SkipReason::Failed {
                compute_success,
                action_success,
            } => write!(
                f,
                "failed (compute phase ok: {}, action phase ok: {})",
                compute_success, action_success
            ),
            SkipReason::NoInboundBody => f.write_str("no inbound message body"),
        }
    }
}

/// Check whether a transaction may be decoded.
pub fn check(tx: &RawTransaction) -> Result<(), SkipReason> {
    if tx.aborted {
        return Err(SkipReason::Aborted);
    }
    if !tx.compute_success || !tx.action_success {
        return Err(SkipReason::Failed {
            compute_success: tx.compute_success,
            action_success: tx.action_success,
        });
    }
    if tx.in_msg_body.is_none() {
        return Err(SkipReason::NoInboundBody);
    }
    Ok(())
}

/// Transactions split into those that may be decoded and those dropped whole.
#[derive(Debug, Default)]
pub struct FilterOutput<'a> {
    pub accepted: Vec<&'a RawTransaction>,
    pub skipped: Vec<(&'a RawTransaction, SkipReason)>,
}

pub fn filter_successful(txs: &[RawTransaction]) -> FilterOutput<'_> {
    let mut output = FilterOutput::default();
    for tx in txs {
        match check(tx) {
            Ok(()) => output.accepted.push(tx),
            Err(reason) => output.skipped.push((tx, reason)),
        }
    }
    output
}
