//! Forward-only cursor over the watched account's transaction stream.

use crate::ledger::{LedgerPosition, RawTransaction};
use serde::{Deserialize, Serialize};

/// Bound on what has already been fetched.
///
/// `Unset` orders before every established position, so comparisons follow the stream
/// order.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(tag = "kind", content = "position", rename_all = "snake_case")]
pub enum Cursor {
    /// No position established yet (cold start)
    #[default]
    Unset,
    /// Everything at or before this position has been fetched
    At(LedgerPosition),
}

impl Cursor {
    pub fn initial() -> Self {
        Cursor::Unset
    }

    pub fn is_established(&self) -> bool {
        matches!(self, Cursor::At(_))
    }

    pub fn position(&self) -> Option<LedgerPosition> {
        match self {
            Cursor::Unset => None,
            Cursor::At(position) => Some(*position),
        }
    }

    /// Cursor covering `tx`. Never moves backwards.
    pub fn advance(self, tx: &RawTransaction) -> Self {
        self.max(Cursor::At(tx.position))
    }

    /// Cursor covering every transaction in `txs`.
    pub fn advance_past(self, txs: &[RawTransaction]) -> Self {
        txs.iter().fold(self, |cursor, tx| cursor.advance(tx))
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Cursor::Unset => f.write_str("unset"),
            Cursor::At(position) => write!(f, "{}", position),
        }
    }
}
