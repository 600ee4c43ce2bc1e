//! Progress tracking for the ledger listener.
//!
//! `ListenerProgress` counts what every cycle did (fetched transactions, skips, decode failures,
//! applied and dropped events, failed cycles) and logs a summary at a fixed cycle interval so an
//! idle listener stays quiet while a busy one is visible.

use crate::listener::cursor::Cursor;
use crate::listener::reconciler::ReconcileReport;
use tracing::info;

/// Log a progress summary every this many cycles.
const LOG_EVERY_CYCLES: u64 = 150;

#[derive(Debug, Clone, Default)]
pub struct ListenerProgress {
    cycles: u64,
    failed_cycles: u64,
    transactions_fetched: usize,
    transactions_skipped: usize,
    decode_failures: usize,
    events_applied: usize,
    duplicates: usize,
    events_dropped: usize,
    cursor: Cursor,
    last_logged_cycle: u64,
}

impl ListenerProgress {
    pub fn new(cursor: Cursor) -> Self {
        Self {
            cursor,
            ..Self::default()
        }
    }

    /// Record a completed cycle.
    pub fn record_cycle(
        &mut self,
        fetched: usize,
        skipped: usize,
        decode_failures: usize,
        report: &ReconcileReport,
        cursor: Cursor,
    ) {
        self.cycles += 1;
        self.transactions_fetched += fetched;
        self.transactions_skipped += skipped;
        self.decode_failures += decode_failures;
        self.events_applied += report.applied;
        self.duplicates += report.duplicates;
        self.events_dropped += report.missing_accounts + report.rejected;
        self.cursor = cursor;
    }

    pub fn record_failure(&mut self) {
        self.cycles += 1;
        self.failed_cycles += 1;
    }

    /// Log progress every `LOG_EVERY_CYCLES` cycles or when forced
    pub fn log_progress(&mut self, force: bool) {
        let cycles_since_last_log = self.cycles.saturating_sub(self.last_logged_cycle);
        let should_log = force || cycles_since_last_log >= LOG_EVERY_CYCLES;
        if should_log {
            info!("Listener progress: {}", self.get_stats().summary());
            self.last_logged_cycle = self.cycles;
        }
    }

    pub fn get_stats(&self) -> ListenerStats {
        ListenerStats {
            cycles: self.cycles,
            failed_cycles: self.failed_cycles,
            transactions_fetched: self.transactions_fetched,
            transactions_skipped: self.transactions_skipped,
            decode_failures: self.decode_failures,
            events_applied: self.events_applied,
            duplicates: self.duplicates,
            events_dropped: self.events_dropped,
            cursor: self.cursor,
        }
    }
}

/// Snapshot of the listener's counters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub transactions_fetched: usize,
    pub transactions_skipped: usize,
    pub decode_failures: usize,
    pub events_applied: usize,
    pub duplicates: usize,
    pub events_dropped: usize,
    pub cursor: Cursor,
}

impl ListenerStats {
    /// Get a human-readable summary of the listener statistics
    pub fn summary(&self) -> String {
        format!(
            "{} cycles ({} failed), {} transactions fetched ({} skipped), {} events applied, {} duplicates, {} dropped{}, cursor at {}",
            self.cycles,
            self.failed_cycles,
            self.transactions_fetched,
            self.transactions_skipped,
            self.events_applied,
            self.duplicates,
            self.events_dropped,
            if self.decode_failures == 0 {
                String::new()
            } else {
                format!(", {} undecodable messages", self.decode_failures)
            },
            self.cursor
        )
    }
}
