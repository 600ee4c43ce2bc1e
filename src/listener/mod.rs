//! Escrow Ledger Listener
//!
//! This module contains the background worker that mirrors the escrow contract's on-chain
//! activity into the balance store and transaction history. It is composed of several
//! submodules, each responsible for one step of a polling cycle:
//!
//! - `cursor`: The forward-only position bounding what has already been fetched.
//! - `fetcher`: Queries the ledger for transactions after the cursor.
//! - `filter`: Drops transactions that failed on chain before anything is decoded.
//! - `decoder`: Turns outbound messages into typed `DecodedEvent`s through a fixed op-code table.
//! - `reconciler`: Applies each event to the stores exactly once.
//! - `supervisor`: Drives the cycle forever, isolating failures per cycle.
//! - `events`: The event sink every component reports to instead of a global logger.
//! - `progress_tracker`: Counters and periodic progress logging.
//! - `repositories` / `state_persistence`: Durable cursor and dead-letter storage.
//!
//! Only one supervisor runs per process and its cycles never overlap.

/// Forward-only ledger position
pub mod cursor;
/// Op-code table and payload decoding
pub mod decoder;
/// Event types, handler trait and dispatcher
pub mod events;
/// Ledger page fetching
pub mod fetcher;
/// On-chain success filter
pub mod filter;
/// Cycle statistics and progress logging
pub mod progress_tracker;
/// Idempotent application of events to the stores
pub mod reconciler;
/// File-backed repositories for the cursor and dead letters
pub mod repositories;
/// Persistence service over the repositories
pub mod state_persistence;
/// The polling state machine
pub mod supervisor;
/// Error types
pub mod types;

pub use cursor::Cursor;
pub use decoder::{DecodedEvent, EscrowEvent, EventDecoder, EventId};
pub use events::{EventDispatcher, ListenerEvent, ListenerEventHandler};
pub use supervisor::{Supervisor, SupervisorState};
pub use types::ListenerError;

/// Spawn the supervisor as a background task of the hosting runtime.
///
/// The task runs until the host aborts it.
pub fn spawn(supervisor: Supervisor) -> tokio::task::JoinHandle<()> {
	tokio::spawn(supervisor.run_forever())
}
