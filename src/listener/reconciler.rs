//! Idempotent application of decoded events to the balance mirror and transaction history.
//!
//! Each event is one reconciliation unit: a balance delta plus a history record keyed by the
//! event's history key. The history key is checked before the delta is applied, and a history
//! write that fails or loses a race is undone with a compensating delta, so the two stores
//! never disagree about whether an event was applied.

use crate::listener::ListenerError;
use crate::listener::decoder::DecodedEvent;
use crate::listener::events::{EventDispatcher, ListenerEvent};
use crate::store::{AppendOutcome, BalanceStore, HistoryStore, StoreError, TransactionHistoryRecord};
use std::sync::Arc;
use tracing::{debug, error};

/// What happened to the events of one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub applied: usize,
    pub duplicates: usize,
    pub missing_accounts: usize,
    pub rejected: usize,
}

impl ReconcileReport {
    pub fn total(&self) -> usize {
        self.applied + self.duplicates + self.missing_accounts + self.rejected
    }
}

enum Outcome {
    Applied,
    Duplicate,
    MissingAccount,
    Rejected,
}

pub struct Reconciler {
    balances: Arc<dyn BalanceStore>,
    history: Arc<dyn HistoryStore>,
    sink: Arc<EventDispatcher>,
}

impl Reconciler {
    pub fn new(
        balances: Arc<dyn BalanceStore>,
        history: Arc<dyn HistoryStore>,
        sink: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            balances,
            history,
            sink,
        }
    }

    /// Apply `events` in order.
    ///
    /// Missing accounts and rejected deltas are reported and dropped. Any other store failure
    /// stops the batch; events before it stay applied and are recognised as duplicates when the
    /// batch is retried.
    pub async fn reconcile(
        &self,
        events: &[DecodedEvent],
    ) -> Result<ReconcileReport, ListenerError> {
        let mut report = ReconcileReport::default();
        for event in events {
            match self.reconcile_one(event).await? {
                Outcome::Applied => report.applied += 1,
                Outcome::Duplicate => report.duplicates += 1,
                Outcome::MissingAccount => report.missing_accounts += 1,
                Outcome::Rejected => report.rejected += 1,
            }
        }
        Ok(report)
    }

    async fn reconcile_one(&self, event: &DecodedEvent) -> Result<Outcome, ListenerError> {
        let key = event.id().history_key();

        if self.balances.get_account(event.account()).await?.is_none() {
            self.sink
                .dispatch(&ListenerEvent::AccountNotFound {
                    event: event.clone(),
                })
                .await;
            return Ok(Outcome::MissingAccount);
        }

        if self.history.contains(&key).await? {
            self.sink
                .dispatch(&ListenerEvent::DuplicateSkipped {
                    event: event.clone(),
                })
                .await;
            return Ok(Outcome::Duplicate);
        }

        let delta = event.delta();
        let new_balance = match self.balances.apply_delta(event.account(), delta).await {
            Ok(balance) => balance,
            Err(StoreError::AccountNotFound(_)) => {
                self.sink
                    .dispatch(&ListenerEvent::AccountNotFound {
                        event: event.clone(),
                    })
                    .await;
                return Ok(Outcome::MissingAccount);
            }
            Err(e @ StoreError::InsufficientBalance { .. }) => {
                self.sink
                    .dispatch(&ListenerEvent::EventRejected {
                        event: event.clone(),
                        reason: e.to_string(),
                    })
                    .await;
                return Ok(Outcome::Rejected);
            }
            Err(e) => return Err(e.into()),
        };

        let record = TransactionHistoryRecord {
            tx_hash: key,
            wallet_address: *event.account(),
            amount: event.payload().amount,
            direction: event.direction(),
            created_at: chrono::Utc::now(),
        };

        match self.history.append(&record).await {
            Ok(AppendOutcome::Inserted) => {
                self.sink
                    .dispatch(&ListenerEvent::EventApplied {
                        event: event.clone(),
                        new_balance,
                    })
                    .await;
                Ok(Outcome::Applied)
            }
            Ok(AppendOutcome::Duplicate) => {
                debug!(
                    "History already holds {} after applying its delta, reverting",
                    record.tx_hash
                );
                self.compensate(event, delta).await?;
                self.sink
                    .dispatch(&ListenerEvent::DuplicateSkipped {
                        event: event.clone(),
                    })
                    .await;
                Ok(Outcome::Duplicate)
            }
            Err(e) => {
                if let Err(revert) = self.compensate(event, delta).await {
                    error!(
                        "Failed to revert delta {} on {} after history write failed: {}",
                        delta,
                        event.account(),
                        revert
                    );
                }
                Err(e.into())
            }
        }
    }

    async fn compensate(&self, event: &DecodedEvent, delta: i128) -> Result<u128, StoreError> {
        self.balances.apply_delta(event.account(), -delta).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::FlakyHistory;
    use super::*;
    use crate::ledger::AccountAddress;
    use crate::ledger::MessageKind;
    use crate::listener::decoder::EventDecoder;
    use crate::listener::decoder::test_utils::{
        deposit, deposit_event, transaction, withdraw, withdraw_event,
    };
    use crate::listener::events::test_utils::recording_dispatcher;
    use crate::store::InMemoryStore;
    use proptest::prelude::*;

    fn alice() -> AccountAddress {
        AccountAddress::new(0, [0xa1; 32])
    }

    fn reconciler(store: &Arc<InMemoryStore>) -> Reconciler {
        let (sink, _) = recording_dispatcher();
        Reconciler::new(store.clone(), store.clone(), sink)
    }

    #[tokio::test]
    async fn test_replayed_event_is_applied_once() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_account(alice(), 10);
        let reconciler = reconciler(&store);
        let event = deposit_event("tx1", &alice(), 5);

        let first = reconciler.reconcile(&[event.clone()]).await.unwrap();
        let second = reconciler.reconcile(&[event]).await.unwrap();

        assert_eq!(first.applied, 1);
        assert_eq!(second.duplicates, 1);
        assert_eq!(store.balance(&alice()), Some(15));
        assert_eq!(store.history().len(), 1);
        assert_eq!(store.history()[0].tx_hash, "tx1");
    }

    #[tokio::test]
    async fn test_missing_account_is_dropped_and_reported() {
        let store = Arc::new(InMemoryStore::new());
        let (sink, recorder) = recording_dispatcher();
        let reconciler = Reconciler::new(store.clone(), store.clone(), sink);
        let event = deposit_event("tx1", &alice(), 5);

        let report = reconciler.reconcile(&[event.clone()]).await.unwrap();

        assert_eq!(report.missing_accounts, 1);
        assert!(store.history().is_empty());
        assert_eq!(
            recorder.events(),
            vec![ListenerEvent::AccountNotFound { event }]
        );
    }

    #[tokio::test]
    async fn test_overdrawing_withdraw_is_rejected_without_wedging_the_batch() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_account(alice(), 3);
        let (sink, recorder) = recording_dispatcher();
        let reconciler = Reconciler::new(store.clone(), store.clone(), sink);

        let report = reconciler
            .reconcile(&[
                withdraw_event("tx1", &alice(), 4),
                deposit_event("tx2", &alice(), 2),
            ])
            .await
            .unwrap();

        assert_eq!(report.rejected, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(store.balance(&alice()), Some(5));
        assert_eq!(store.history().len(), 1);
        assert!(matches!(
            recorder.events()[0],
            ListenerEvent::EventRejected { .. }
        ));
    }

    #[tokio::test]
    async fn test_history_failure_reverts_the_delta() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_account(alice(), 10);
        let history = Arc::new(FlakyHistory::new(store.clone(), 1));
        let (sink, _) = recording_dispatcher();
        let reconciler = Reconciler::new(store.clone(), history, sink);
        let events = [deposit_event("tx1", &alice(), 5)];

        assert!(matches!(
            reconciler.reconcile(&events).await,
            Err(ListenerError::StoreError(StoreError::Unavailable(_)))
        ));
        assert_eq!(store.balance(&alice()), Some(10));
        assert!(store.history().is_empty());

        let report = reconciler.reconcile(&events).await.unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(store.balance(&alice()), Some(15));
    }

    #[tokio::test]
    async fn test_events_in_one_transaction_are_distinct() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_account(alice(), 0);
        let reconciler = reconciler(&store);

        let first = deposit_event("tx1", &alice(), 5);
        let mut second = deposit_event("tx1", &alice(), 7);
        if let DecodedEvent::Deposit(payload) = &mut second {
            payload.id.event_index = 1;
            payload.id.message_index = 1;
        }

        let report = reconciler.reconcile(&[first, second]).await.unwrap();
        assert_eq!(report.applied, 2);
        assert_eq!(store.balance(&alice()), Some(12));
    }

    #[tokio::test]
    async fn test_withdraw_after_payout_is_keyed_by_transaction_hash() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_account(alice(), 10);
        let reconciler = reconciler(&store);
        let mut payout = deposit(&alice(), 4);
        payout.kind = MessageKind::Internal;
        let tx = transaction("txw", 10, vec![payout, withdraw(&alice(), 4)]);

        let decoded = EventDecoder::default().decode_transactions([&tx]);
        let report = reconciler.reconcile(&decoded.events).await.unwrap();

        assert_eq!(report.applied, 1);
        assert_eq!(store.balance(&alice()), Some(6));
        let keys: Vec<_> = store.history().into_iter().map(|r| r.tx_hash).collect();
        assert_eq!(keys, vec!["txw".to_string()]);
    }

    proptest! {
        /// Property: balance = initial + deposits - withdraws, however often events are replayed
        #[test]
        fn balance_is_conserved_under_replay(
            moves in prop::collection::vec((any::<bool>(), 1u64..1_000_000u64), 1..20),
            replays in 1usize..3,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .build()
                .unwrap();

            let withdrawn: u128 = moves
                .iter()
                .filter(|(deposit, _)| !deposit)
                .map(|(_, amount)| *amount as u128)
                .sum();
            let deposited: u128 = moves
                .iter()
                .filter(|(deposit, _)| *deposit)
                .map(|(_, amount)| *amount as u128)
                .sum();
            let initial = withdrawn;

            let events: Vec<DecodedEvent> = moves
                .iter()
                .enumerate()
                .map(|(i, (deposit, amount))| {
                    let hash = format!("tx{i}");
                    if *deposit {
                        deposit_event(&hash, &alice(), *amount as u128)
                    } else {
                        withdraw_event(&hash, &alice(), *amount as u128)
                    }
                })
                .collect();

            let store = Arc::new(InMemoryStore::new());
            store.insert_account(alice(), initial);
            let reconciler = reconciler(&store);

            runtime.block_on(async {
                for _ in 0..replays {
                    reconciler.reconcile(&events).await.unwrap();
                }
            });

            prop_assert_eq!(store.balance(&alice()), Some(initial + deposited - withdrawn));
            prop_assert_eq!(store.history().len(), events.len());
        }
    }
}
