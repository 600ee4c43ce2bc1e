//! Event system for the ledger listener.
//!
//! Every component reports what it does as a `ListenerEvent` to an injected `EventDispatcher`
//! rather than writing to a process-wide logger. Registered handlers decide what happens to
//! the events: `TracingHandler` turns them into log records, `DeadLetterHandler` keeps events
//! that could not be applied, and tests register a recording handler to assert on them.

use crate::ledger::AccountAddress;
use crate::listener::ListenerError;
use crate::listener::cursor::Cursor;
use crate::listener::decoder::DecodedEvent;
use crate::listener::filter::SkipReason;
use crate::listener::state_persistence::StatePersistenceService;
use crate::listener::supervisor::SupervisorState;
use crate::utils::{TON_DECIMALS, format_token_amount};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Events that occur while the listener runs
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// A cycle is starting
    CycleStarted { state: SupervisorState, cursor: Cursor },
    /// The ledger returned a page of transactions
    TransactionsFetched { count: usize, cursor: Cursor },
    /// The priming cycle established a cursor without reconciling anything
    Primed { skipped_transactions: usize, cursor: Cursor },
    /// A transaction was dropped before decoding
    TransactionSkipped { tx_hash: String, reason: SkipReason },
    /// An outbound message matched the op-code table but could not be decoded
    DecodeFailed {
        tx_hash: String,
        message_index: usize,
        error: String,
    },
    /// An event changed a balance and was recorded in the history
    EventApplied { event: DecodedEvent, new_balance: u128 },
    /// An event was already in the history
    DuplicateSkipped { event: DecodedEvent },
    /// No account exists for the event's address; the event was dropped
    AccountNotFound { event: DecodedEvent },
    /// The store refused the event; it was dropped
    EventRejected { event: DecodedEvent, reason: String },
    /// The cursor moved forward and was persisted
    CursorAdvanced { from: Cursor, to: Cursor },
    /// A cycle failed; the supervisor will retry after `retry_in`
    CycleFailed { error: String, retry_in: Duration },
}

/// Trait for handling listener events.
#[async_trait::async_trait]
pub trait ListenerEventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &ListenerEvent) -> Result<(), ListenerError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that fans events out to every registered handler.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn ListenerEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub fn register_handler(&mut self, handler: Box<dyn ListenerEventHandler>) {
        self.handlers.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running and never
    /// fail the caller.
    pub async fn dispatch(&self, event: &ListenerEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(event).await {
                error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

fn describe(event: &DecodedEvent) -> String {
    format!(
        "{:?} of {} TON for {} (tx {})",
        event.direction(),
        format_token_amount(event.payload().amount, TON_DECIMALS),
        event.account(),
        event.id().history_key()
    )
}

/// Writes every event to `tracing`.
pub struct TracingHandler {
    escrow_address: String,
}

impl TracingHandler {
    pub fn new(escrow_address: String) -> Self {
        Self { escrow_address }
    }
}

#[async_trait::async_trait]
impl ListenerEventHandler for TracingHandler {
    async fn handle(&self, event: &ListenerEvent) -> Result<(), ListenerError> {
        match event {
            ListenerEvent::CycleStarted { state, cursor } => {
                debug!(
                    "Cycle starting in {:?} for {} at cursor {}",
                    state, self.escrow_address, cursor
                );
            }
            ListenerEvent::TransactionsFetched { count, cursor } => {
                if *count == 0 {
                    debug!("No new transactions after {}", cursor);
                } else {
                    info!("Fetched {} transactions after {}", count, cursor);
                }
            }
            ListenerEvent::Primed {
                skipped_transactions,
                cursor,
            } => {
                info!(
                    "Priming cycle set cursor to {}, not processing {} existing transactions",
                    cursor, skipped_transactions
                );
            }
            ListenerEvent::TransactionSkipped { tx_hash, reason } => {
                info!("Skipped transaction {}: {}", tx_hash, reason);
            }
            ListenerEvent::DecodeFailed {
                tx_hash,
                message_index,
                error,
            } => {
                warn!(
                    "Failed to decode message {} of transaction {}: {}",
                    message_index, tx_hash, error
                );
            }
            ListenerEvent::EventApplied { event, new_balance } => {
                info!(
                    "Applied {}, new balance {} TON",
                    describe(event),
                    format_token_amount(*new_balance, TON_DECIMALS)
                );
            }
            ListenerEvent::DuplicateSkipped { event } => {
                info!("Already reconciled {}", describe(event));
            }
            ListenerEvent::AccountNotFound { event } => {
                warn!("No account for {}, dropping event", describe(event));
            }
            ListenerEvent::EventRejected { event, reason } => {
                error!("Store rejected {}: {}", describe(event), reason);
            }
            ListenerEvent::CursorAdvanced { from, to } => {
                debug!("Cursor advanced from {} to {}", from, to);
            }
            ListenerEvent::CycleFailed { error, retry_in } => {
                error!(
                    "Listener cycle failed: {}; retrying in {} ms",
                    error,
                    retry_in.as_millis()
                );
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "TracingHandler"
    }
}

/// Keeps events that were dropped so they can be replayed by an operator.
pub struct DeadLetterHandler {
    persistence: Arc<StatePersistenceService>,
}

impl DeadLetterHandler {
    pub fn new(persistence: Arc<StatePersistenceService>) -> Self {
        Self { persistence }
    }
}

#[async_trait::async_trait]
impl ListenerEventHandler for DeadLetterHandler {
    async fn handle(&self, event: &ListenerEvent) -> Result<(), ListenerError> {
        match event {
            ListenerEvent::AccountNotFound { event } => {
                self.persistence
                    .record_dead_letter(event, "account not found")
                    .await
            }
            ListenerEvent::EventRejected { event, reason } => {
                self.persistence.record_dead_letter(event, reason).await
            }
            _ => Ok(()),
        }
    }

    fn name(&self) -> &'static str {
        "DeadLetterHandler"
    }
}

/// Accounts touched by the events of a batch, for summary logging.
pub fn touched_accounts(events: &[DecodedEvent]) -> Vec<AccountAddress> {
    let mut accounts: Vec<AccountAddress> = events.iter().map(|e| *e.account()).collect();
    accounts.sort();
    accounts.dedup();
    accounts
}

#[cfg(test)]
pub(crate) mod test_utils {
    use super::*;
    use std::sync::Mutex;

    /// Records every event it receives.
    #[derive(Clone, Default)]
    pub struct RecordingHandler {
        events: Arc<Mutex<Vec<ListenerEvent>>>,
    }

    impl RecordingHandler {
        pub fn events(&self) -> Vec<ListenerEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl ListenerEventHandler for RecordingHandler {
        async fn handle(&self, event: &ListenerEvent) -> Result<(), ListenerError> {
            self.events.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "RecordingHandler"
        }
    }

    /// Dispatcher with a recording handler attached.
    pub fn recording_dispatcher() -> (Arc<EventDispatcher>, RecordingHandler) {
        let recorder = RecordingHandler::default();
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(recorder.clone()));
        (Arc::new(dispatcher), recorder)
    }
}
