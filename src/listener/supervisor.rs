//! The listener's polling state machine.
//!
//! The `Supervisor` owns the cursor and drives one cycle at a time: fetch the page after the
//! cursor, drop failed transactions, decode escrow events, reconcile them and finally persist
//! the advanced cursor. A failing cycle leaves the cursor where it was and puts the supervisor
//! into `Backoff`; the next cycle simply retries the same page. The very first cycle on a fresh
//! deployment only establishes the cursor, so history that predates the listener is never
//! replayed into the balances.

use crate::ledger::LedgerPosition;
use crate::listener::ListenerError;
use crate::listener::cursor::Cursor;
use crate::listener::decoder::EventDecoder;
use crate::listener::events::{EventDispatcher, ListenerEvent, touched_accounts};
use crate::listener::fetcher::TransactionFetcher;
use crate::listener::filter::filter_successful;
use crate::listener::progress_tracker::{ListenerProgress, ListenerStats};
use crate::listener::reconciler::{ReconcileReport, Reconciler};
use crate::listener::state_persistence::StatePersistenceService;
use backoff::backoff::{Backoff, Constant};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where the supervisor is in its lifecycle. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// No cursor yet; the next successful fetch establishes one
    Priming,
    /// Cursor established; every cycle reconciles what follows it
    Polling,
    /// The last cycle failed; the next one retries from the unchanged cursor
    Backoff,
}

/// Timing of the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Delay after a successful cycle
    pub poll_interval: Duration,
    /// Delay after a failed cycle
    pub backoff_delay: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            backoff_delay: Duration::from_secs(2),
        }
    }
}

/// Result of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cursor was established; nothing was reconciled
    Primed {
        cursor: Cursor,
        skipped_transactions: usize,
    },
    /// A page was processed and the cursor moved past it
    Reconciled {
        fetched: usize,
        skipped: usize,
        decode_failures: usize,
        report: ReconcileReport,
    },
    /// Nothing new on the ledger
    Idle,
}

pub struct Supervisor {
    fetcher: TransactionFetcher,
    decoder: EventDecoder,
    reconciler: Reconciler,
    persistence: Arc<StatePersistenceService>,
    sink: Arc<EventDispatcher>,
    config: SupervisorConfig,
    backoff: Constant,
    cursor: Cursor,
    state: SupervisorState,
    progress: ListenerProgress,
}

impl Supervisor {
    /// Create a supervisor, restoring the last committed cursor.
    ///
    /// With a restored cursor the supervisor starts in `Polling`, otherwise in `Priming`.
    pub async fn new(
        fetcher: TransactionFetcher,
        decoder: EventDecoder,
        reconciler: Reconciler,
        persistence: Arc<StatePersistenceService>,
        sink: Arc<EventDispatcher>,
        config: SupervisorConfig,
    ) -> Result<Self, ListenerError> {
        let cursor = persistence.load_cursor().await?.unwrap_or_default();
        let state = Self::active_state(&cursor);
        info!(
            "Listener for {} starting in {:?} at cursor {}",
            fetcher.escrow_address(),
            state,
            cursor
        );

        Ok(Self {
            fetcher,
            decoder,
            reconciler,
            persistence,
            sink,
            backoff: Constant::new(config.backoff_delay),
            config,
            cursor,
            state,
            progress: ListenerProgress::new(cursor),
        })
    }

    fn active_state(cursor: &Cursor) -> SupervisorState {
        if cursor.is_established() {
            SupervisorState::Polling
        } else {
            SupervisorState::Priming
        }
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn state(&self) -> SupervisorState {
        self.state
    }

    pub fn stats(&self) -> ListenerStats {
        self.progress.get_stats()
    }

    /// Run one cycle from the current cursor.
    ///
    /// On error nothing about the supervisor changes; the cursor stays at its last persisted
    /// value.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, ListenerError> {
        let active = Self::active_state(&self.cursor);
        self.sink
            .dispatch(&ListenerEvent::CycleStarted {
                state: active,
                cursor: self.cursor,
            })
            .await;

        let txs = self.fetcher.fetch(&self.cursor).await?;
        self.sink
            .dispatch(&ListenerEvent::TransactionsFetched {
                count: txs.len(),
                cursor: self.cursor,
            })
            .await;

        if active == SupervisorState::Priming {
            let primed = match self.cursor.advance_past(&txs) {
                Cursor::Unset => Cursor::At(LedgerPosition::GENESIS),
                cursor => cursor,
            };
            self.commit_cursor(primed).await?;
            self.sink
                .dispatch(&ListenerEvent::Primed {
                    skipped_transactions: txs.len(),
                    cursor: primed,
                })
                .await;
            self.progress
                .record_cycle(txs.len(), 0, 0, &ReconcileReport::default(), primed);
            return Ok(CycleOutcome::Primed {
                cursor: primed,
                skipped_transactions: txs.len(),
            });
        }

        if txs.is_empty() {
            self.progress
                .record_cycle(0, 0, 0, &ReconcileReport::default(), self.cursor);
            return Ok(CycleOutcome::Idle);
        }

        let filtered = filter_successful(&txs);
        for (tx, reason) in &filtered.skipped {
            self.sink
                .dispatch(&ListenerEvent::TransactionSkipped {
                    tx_hash: tx.hash.clone(),
                    reason: *reason,
                })
                .await;
        }

        let decoded = self.decoder.decode_transactions(filtered.accepted.iter().copied());
        for failure in &decoded.failures {
            self.sink
                .dispatch(&ListenerEvent::DecodeFailed {
                    tx_hash: failure.tx_hash.clone(),
                    message_index: failure.message_index,
                    error: failure.error.clone(),
                })
                .await;
        }

        let report = self.reconciler.reconcile(&decoded.events).await?;
        if !decoded.events.is_empty() {
            debug!(
                "Reconciled {} events touching {} accounts",
                report.total(),
                touched_accounts(&decoded.events).len()
            );
        }

        let next = self.cursor.advance_past(&txs);
        self.commit_cursor(next).await?;

        self.progress.record_cycle(
            txs.len(),
            filtered.skipped.len(),
            decoded.failures.len(),
            &report,
            next,
        );
        Ok(CycleOutcome::Reconciled {
            fetched: txs.len(),
            skipped: filtered.skipped.len(),
            decode_failures: decoded.failures.len(),
            report,
        })
    }

    /// Persist `next`, then adopt it. The in-memory cursor never runs ahead of the durable one.
    async fn commit_cursor(&mut self, next: Cursor) -> Result<(), ListenerError> {
        if next == self.cursor {
            return Ok(());
        }
        self.persistence.save_cursor(&next).await?;
        let from = self.cursor;
        self.cursor = next;
        self.sink
            .dispatch(&ListenerEvent::CursorAdvanced { from, to: next })
            .await;
        Ok(())
    }

    /// Run one cycle and return how long to wait before the next.
    pub async fn tick(&mut self) -> Duration {
        match self.run_cycle().await {
            Ok(_) => {
                self.backoff.reset();
                self.state = Self::active_state(&self.cursor);
                self.progress.log_progress(false);
                self.config.poll_interval
            }
            Err(e) => {
                let retry_in = self
                    .backoff
                    .next_backoff()
                    .unwrap_or(self.config.backoff_delay);
                self.state = SupervisorState::Backoff;
                self.progress.record_failure();
                self.sink
                    .dispatch(&ListenerEvent::CycleFailed {
                        error: e.to_string(),
                        retry_in,
                    })
                    .await;
                retry_in
            }
        }
    }

    /// Drive cycles for the life of the process.
    pub async fn run_forever(mut self) {
        info!("Listening to escrow {}", self.fetcher.escrow_address());
        loop {
            let delay = self.tick().await;
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AccountAddress, SortOrder};
    use crate::listener::decoder::test_utils::{deposit, transaction};
    use crate::listener::events::test_utils::RecordingHandler;
    use crate::listener::fetcher::PageSizePolicy;
    use crate::listener::fetcher::test_utils::ScriptedLedger;
    use crate::listener::filter::SkipReason;
    use crate::listener::repositories::{
        CursorRepository, FileCursorRepository, FileDeadLetterRepository,
    };
    use crate::store::{
        AppendOutcome, HistoryStore, InMemoryStore, StoreError, TransactionHistoryRecord,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tempfile::TempDir;

    const ESCROW: &str = "0:e5c0";

    fn alice() -> AccountAddress {
        AccountAddress::new(0, [0xa1; 32])
    }

    struct Harness {
        ledger: Arc<ScriptedLedger>,
        store: Arc<InMemoryStore>,
        recorder: RecordingHandler,
        persistence: Arc<StatePersistenceService>,
        _dir: TempDir,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let persistence = Arc::new(StatePersistenceService::new(
                dir.path().to_path_buf(),
                ESCROW,
            ));
            Self::with_persistence(persistence, dir)
        }

        fn with_persistence(persistence: Arc<StatePersistenceService>, dir: TempDir) -> Self {
            let store = Arc::new(InMemoryStore::new());
            store.insert_account(alice(), 100);
            Self {
                ledger: Arc::new(ScriptedLedger::new()),
                store,
                recorder: RecordingHandler::default(),
                persistence,
                _dir: dir,
            }
        }

        async fn supervisor_with_history(&self, history: Arc<dyn HistoryStore>) -> Supervisor {
            let mut dispatcher = EventDispatcher::new();
            dispatcher.register_handler(Box::new(self.recorder.clone()));
            let sink = Arc::new(dispatcher);

            Supervisor::new(
                TransactionFetcher::new(
                    self.ledger.clone(),
                    ESCROW.to_string(),
                    PageSizePolicy::default(),
                ),
                EventDecoder::default(),
                Reconciler::new(self.store.clone(), history, sink.clone()),
                self.persistence.clone(),
                sink,
                SupervisorConfig {
                    poll_interval: Duration::from_millis(2000),
                    backoff_delay: Duration::from_millis(500),
                },
            )
            .await
            .unwrap()
        }

        async fn supervisor(&self) -> Supervisor {
            self.supervisor_with_history(self.store.clone()).await
        }
    }

    #[tokio::test]
    async fn test_priming_reconciles_nothing() {
        let harness = Harness::new();
        harness
            .ledger
            .push_page(vec![transaction("old", 100, vec![deposit(&alice(), 50)])]);
        let mut supervisor = harness.supervisor().await;
        assert_eq!(supervisor.state(), SupervisorState::Priming);

        let delay = supervisor.tick().await;

        assert_eq!(delay, Duration::from_millis(2000));
        assert_eq!(supervisor.state(), SupervisorState::Polling);
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition(100)));
        assert_eq!(harness.store.balance(&alice()), Some(100));
        assert!(harness.store.history().is_empty());

        let queries = harness.ledger.queries();
        assert_eq!(queries[0].after, None);
        assert_eq!(queries[0].limit, 1);
        assert_eq!(queries[0].order, SortOrder::NewestFirst);
    }

    #[tokio::test]
    async fn test_priming_an_empty_account_starts_from_genesis() {
        let harness = Harness::new();
        let mut supervisor = harness.supervisor().await;

        let outcome = supervisor.run_cycle().await.unwrap();
        assert_eq!(
            outcome,
            CycleOutcome::Primed {
                cursor: Cursor::At(LedgerPosition::GENESIS),
                skipped_transactions: 0,
            }
        );

        harness
            .ledger
            .push_page(vec![transaction("first", 1, vec![deposit(&alice(), 5)])]);
        supervisor.run_cycle().await.unwrap();
        assert_eq!(harness.store.balance(&alice()), Some(105));
    }

    #[tokio::test]
    async fn test_aborted_transaction_contributes_nothing() {
        let harness = Harness::new();
        let mut supervisor = harness.supervisor().await;
        supervisor.run_cycle().await.unwrap();

        let mut aborted = transaction("tx2", 11, vec![deposit(&alice(), 1000)]);
        aborted.aborted = true;
        harness.ledger.push_page(vec![
            transaction("tx1", 10, vec![deposit(&alice(), 5)]),
            aborted,
        ]);

        let outcome = supervisor.run_cycle().await.unwrap();
        let CycleOutcome::Reconciled {
            fetched,
            skipped,
            report,
            ..
        } = outcome
        else {
            panic!("expected a reconciled cycle, got {:?}", outcome);
        };
        assert_eq!((fetched, skipped, report.applied), (2, 1, 1));
        assert_eq!(harness.store.balance(&alice()), Some(105));

        let history = harness.store.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].tx_hash, "tx1");
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition(11)));
        assert!(harness.recorder.events().contains(&ListenerEvent::TransactionSkipped {
            tx_hash: "tx2".to_string(),
            reason: SkipReason::Aborted,
        }));
    }

    #[tokio::test]
    async fn test_network_error_backs_off_without_side_effects() {
        let harness = Harness::new();
        harness.ledger.push_page(vec![transaction("seen", 5, vec![])]);
        let mut supervisor = harness.supervisor().await;
        supervisor.tick().await;

        harness.ledger.push_error("connection reset");
        let delay = supervisor.tick().await;

        assert_eq!(delay, Duration::from_millis(500));
        assert_eq!(supervisor.state(), SupervisorState::Backoff);
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition(5)));
        assert_eq!(harness.store.balance(&alice()), Some(100));
        assert!(harness.store.history().is_empty());
        assert!(harness
            .recorder
            .events()
            .iter()
            .any(|event| matches!(event, ListenerEvent::CycleFailed { .. })));

        harness
            .ledger
            .push_page(vec![transaction("tx6", 6, vec![deposit(&alice(), 1)])]);
        let delay = supervisor.tick().await;

        assert_eq!(delay, Duration::from_millis(2000));
        assert_eq!(supervisor.state(), SupervisorState::Polling);
        let queries = harness.ledger.queries();
        assert_eq!(queries[1].after, Some(LedgerPosition(5)));
        assert_eq!(queries[2].after, Some(LedgerPosition(5)));
        assert_eq!(harness.store.balance(&alice()), Some(101));
        assert_eq!(supervisor.stats().failed_cycles, 1);
    }

    #[tokio::test]
    async fn test_restart_resumes_from_persisted_cursor() {
        let dir = tempfile::tempdir().unwrap();
        FileCursorRepository::new(dir.path().to_path_buf(), ESCROW)
            .save(&Cursor::At(LedgerPosition(42)))
            .await
            .unwrap();
        let persistence = Arc::new(StatePersistenceService::new(
            dir.path().to_path_buf(),
            ESCROW,
        ));
        let harness = Harness::with_persistence(persistence, dir);

        let mut supervisor = harness.supervisor().await;
        assert_eq!(supervisor.state(), SupervisorState::Polling);
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition(42)));

        harness
            .ledger
            .push_page(vec![transaction("tx43", 43, vec![deposit(&alice(), 3)])]);
        supervisor.run_cycle().await.unwrap();

        let query = harness.ledger.queries()[0];
        assert_eq!(query.after, Some(LedgerPosition(42)));
        assert_eq!(query.limit, 10);
        assert_eq!(harness.store.balance(&alice()), Some(103));
    }

    #[tokio::test]
    async fn test_history_failure_mid_batch_does_not_double_apply() {
        let harness = Harness::new();
        let history = Arc::new(FailSecondAppend::new(harness.store.clone()));
        let mut supervisor = harness.supervisor_with_history(history).await;
        supervisor.run_cycle().await.unwrap();

        let page = vec![
            transaction("tx1", 10, vec![deposit(&alice(), 5)]),
            transaction("tx2", 11, vec![deposit(&alice(), 7)]),
        ];
        harness.ledger.push_page(page.clone());
        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Backoff);
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition::GENESIS));
        assert_eq!(harness.store.balance(&alice()), Some(105));

        harness.ledger.push_page(page);
        supervisor.tick().await;
        assert_eq!(supervisor.state(), SupervisorState::Polling);
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition(11)));
        assert_eq!(harness.store.balance(&alice()), Some(112));
        assert_eq!(harness.store.history().len(), 2);
    }

    #[tokio::test]
    async fn test_cursor_save_failure_does_not_double_apply() {
        let dir = tempfile::tempdir().unwrap();
        let fail = Arc::new(AtomicBool::new(false));
        let persistence = Arc::new(StatePersistenceService::with_repositories(
            Box::new(SwitchableCursorRepository {
                inner: FileCursorRepository::new(dir.path().to_path_buf(), ESCROW),
                fail: fail.clone(),
            }),
            Box::new(FileDeadLetterRepository::new(dir.path().to_path_buf(), ESCROW)),
        ));
        let harness = Harness::with_persistence(persistence, dir);
        let mut supervisor = harness.supervisor().await;
        supervisor.run_cycle().await.unwrap();

        let page = vec![transaction("tx1", 10, vec![deposit(&alice(), 5)])];
        fail.store(true, Ordering::SeqCst);
        harness.ledger.push_page(page.clone());
        assert!(supervisor.run_cycle().await.is_err());
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition::GENESIS));
        assert_eq!(harness.store.balance(&alice()), Some(105));

        fail.store(false, Ordering::SeqCst);
        harness.ledger.push_page(page);
        let outcome = supervisor.run_cycle().await.unwrap();
        let CycleOutcome::Reconciled { report, .. } = outcome else {
            panic!("expected a reconciled cycle, got {:?}", outcome);
        };
        assert_eq!(report.duplicates, 1);
        assert_eq!(supervisor.cursor(), Cursor::At(LedgerPosition(10)));
        assert_eq!(harness.store.balance(&alice()), Some(105));
        assert_eq!(harness.store.history().len(), 1);
    }

    /// History whose second append fails.
    struct FailSecondAppend {
        inner: Arc<InMemoryStore>,
        calls: AtomicUsize,
    }

    impl FailSecondAppend {
        fn new(inner: Arc<InMemoryStore>) -> Self {
            Self {
                inner,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl HistoryStore for FailSecondAppend {
        async fn append(
            &self,
            record: &TransactionHistoryRecord,
        ) -> Result<AppendOutcome, StoreError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 1 {
                return Err(StoreError::Unavailable("history offline".to_string()));
            }
            self.inner.append(record).await
        }

        async fn contains(&self, tx_hash: &str) -> Result<bool, StoreError> {
            self.inner.contains(tx_hash).await
        }
    }

    struct SwitchableCursorRepository {
        inner: FileCursorRepository,
        fail: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl CursorRepository for SwitchableCursorRepository {
        async fn save(&self, cursor: &Cursor) -> Result<(), ListenerError> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ListenerError::PersistenceError("disk full".to_string()));
            }
            self.inner.save(cursor).await
        }

        async fn load(&self) -> Result<Option<Cursor>, ListenerError> {
            self.inner.load().await
        }
    }
}
