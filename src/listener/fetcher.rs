//! Transaction page fetching.

use crate::ledger::{LedgerError, LedgerQuery, RawTransaction, SortOrder, TransactionQuery};
use crate::listener::cursor::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Page sizes for the two kinds of request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageSizePolicy {
    /// Page size while no cursor is established; only the newest transaction matters then
    pub priming: u32,
    /// Page size once a cursor exists
    pub polling: u32,
}

impl Default for PageSizePolicy {
    fn default() -> Self {
        Self {
            priming: 1,
            polling: 10,
        }
    }
}

/// Fetches the transactions of the escrow account that come after a cursor.
pub struct TransactionFetcher {
    client: Arc<dyn LedgerQuery>,
    escrow_address: String,
    page_sizes: PageSizePolicy,
}

impl TransactionFetcher {
    pub fn new(
        client: Arc<dyn LedgerQuery>,
        escrow_address: String,
        page_sizes: PageSizePolicy,
    ) -> Self {
        Self {
            client,
            escrow_address,
            page_sizes,
        }
    }

    pub fn escrow_address(&self) -> &str {
        &self.escrow_address
    }

    /// Query to issue for the given cursor.
    ///
    /// Without a cursor only the newest transaction is requested. With one, the page after it is
    /// requested oldest first, so a full page never skips transactions.
    pub fn query_for(&self, cursor: &Cursor) -> TransactionQuery {
        match cursor.position() {
            None => TransactionQuery {
                after: None,
                limit: self.page_sizes.priming,
                order: SortOrder::NewestFirst,
            },
            Some(position) => TransactionQuery {
                after: Some(position),
                limit: self.page_sizes.polling,
                order: SortOrder::OldestFirst,
            },
        }
    }

    /// Fetch one page after `cursor`, in ascending position order.
    ///
    /// Positions at or before the cursor are dropped even if the indexer returns them.
    pub async fn fetch(&self, cursor: &Cursor) -> Result<Vec<RawTransaction>, LedgerError> {
        let query = self.query_for(cursor);
        let mut txs = self
            .client
            .fetch_transactions(&self.escrow_address, query)
            .await?;

        txs.sort_by_key(|tx| tx.position);
        if let Some(position) = cursor.position() {
            txs.retain(|tx| tx.position > position);
        }
        txs.dedup_by(|a, b| a.hash == b.hash);

        debug!(
            "Fetched {} transactions for {} after {}",
            txs.len(),
            self.escrow_address,
            cursor
        );
        Ok(txs)
    }
}
