//! State persistence service for the ledger listener.
//!
//! This module provides the `StatePersistenceService`, which saves and restores the listener's
//! cursor and keeps the dead-letter log. Repository traits hide the file layout, so the
//! supervisor and event handlers only deal in cursors and events.

use crate::listener::ListenerError;
use crate::listener::cursor::Cursor;
use crate::listener::decoder::DecodedEvent;
use crate::listener::repositories::{
    CursorRepository, DeadLetter, DeadLetterRepository, FileCursorRepository,
    FileDeadLetterRepository,
};
use std::path::PathBuf;
use tracing::info;

/// Service for managing the listener's durable state.
pub struct StatePersistenceService {
    cursor_repo: Box<dyn CursorRepository + Send + Sync>,
    dead_letter_repo: Box<dyn DeadLetterRepository + Send + Sync>,
}

impl StatePersistenceService {
    /// Create a file-backed persistence service for one escrow account.
    pub fn new(data_dir: PathBuf, escrow_address: &str) -> Self {
        Self {
            cursor_repo: Box::new(FileCursorRepository::new(data_dir.clone(), escrow_address)),
            dead_letter_repo: Box::new(FileDeadLetterRepository::new(data_dir, escrow_address)),
        }
    }

    /// Create a service over custom repositories.
    pub fn with_repositories(
        cursor_repo: Box<dyn CursorRepository + Send + Sync>,
        dead_letter_repo: Box<dyn DeadLetterRepository + Send + Sync>,
    ) -> Self {
        Self {
            cursor_repo,
            dead_letter_repo,
        }
    }

    /// Restore the last committed cursor, if any.
    pub async fn load_cursor(&self) -> Result<Option<Cursor>, ListenerError> {
        let cursor = self.cursor_repo.load().await?;
        if let Some(cursor) = &cursor {
            info!("Restored listener cursor at {}", cursor);
        }
        Ok(cursor)
    }

    /// Durably record the cursor.
    pub async fn save_cursor(&self, cursor: &Cursor) -> Result<(), ListenerError> {
        self.cursor_repo.save(cursor).await
    }

    /// Keep a dropped event for later replay.
    pub async fn record_dead_letter(
        &self,
        event: &DecodedEvent,
        reason: &str,
    ) -> Result<(), ListenerError> {
        self.dead_letter_repo
            .append(&DeadLetter {
                event: event.clone(),
                reason: reason.to_string(),
                recorded_at: chrono::Utc::now().to_rfc3339(),
            })
            .await
    }

    /// All dead letters recorded so far, oldest first.
    pub async fn load_dead_letters(&self) -> Result<Vec<DeadLetter>, ListenerError> {
        self.dead_letter_repo.load_all().await
    }
}
