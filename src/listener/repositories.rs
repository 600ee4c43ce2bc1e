use crate::listener::ListenerError;
use crate::listener::cursor::Cursor;
use crate::listener::decoder::DecodedEvent;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Repository for the listener's cursor
#[async_trait::async_trait]
pub trait CursorRepository {
	async fn save(&self, cursor: &Cursor) -> Result<(), ListenerError>;
	async fn load(&self) -> Result<Option<Cursor>, ListenerError>;
}

/// An event that was dropped, kept for operator replay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
	pub event: DecodedEvent,
	pub reason: String,
	pub recorded_at: String,
}

/// Repository for dropped events
#[async_trait::async_trait]
pub trait DeadLetterRepository {
	async fn append(&self, letter: &DeadLetter) -> Result<(), ListenerError>;
	async fn load_all(&self) -> Result<Vec<DeadLetter>, ListenerError>;
}

fn file_stem(escrow_address: &str) -> String {
	escrow_address.replace(':', "_")
}

#[derive(Serialize, Deserialize)]
struct CursorFile {
	cursor: Cursor,
	updated_at: String,
}

/// File-based implementation of CursorRepository
///
/// The cursor is written to a temporary file and renamed over the previous one, so a crash
/// mid-write leaves the old cursor intact.
pub struct FileCursorRepository {
	data_dir: PathBuf,
	escrow_address: String,
}

impl FileCursorRepository {
	pub fn new(data_dir: PathBuf, escrow_address: &str) -> Self {
		Self {
			data_dir,
			escrow_address: file_stem(escrow_address),
		}
	}

	fn get_cursor_filename(&self) -> PathBuf {
		self.data_dir
			.join(format!("cursor_{}.json", self.escrow_address))
	}
}

#[async_trait::async_trait]
impl CursorRepository for FileCursorRepository {
	async fn save(&self, cursor: &Cursor) -> Result<(), ListenerError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		let content = serde_json::to_string_pretty(&CursorFile {
			cursor: *cursor,
			updated_at: chrono::Utc::now().to_rfc3339(),
		})
		.map_err(|e| ListenerError::PersistenceError(format!("Failed to serialize cursor: {}", e)))?;

		let filename = self.get_cursor_filename();
		let tmp_filename = filename.with_extension("json.tmp");
		tokio::fs::write(&tmp_filename, content)
			.await
			.map_err(|e| {
				ListenerError::PersistenceError(format!("Failed to write cursor file: {}", e))
			})?;
		tokio::fs::rename(&tmp_filename, &filename)
			.await
			.map_err(|e| {
				ListenerError::PersistenceError(format!("Failed to replace cursor file: {}", e))
			})?;

		debug!("Saved cursor {} to {:?}", cursor, filename);
		Ok(())
	}

	async fn load(&self) -> Result<Option<Cursor>, ListenerError> {
		let filename = self.get_cursor_filename();
		if !filename.exists() {
			return Ok(None);
		}

		let content = tokio::fs::read_to_string(&filename).await.map_err(|e| {
			ListenerError::PersistenceError(format!("Failed to read cursor file: {}", e))
		})?;
		let file: CursorFile = serde_json::from_str(&content).map_err(|e| {
			ListenerError::PersistenceError(format!("Failed to parse cursor file: {}", e))
		})?;

		info!(
			"Loaded cursor {} from {:?} (saved {})",
			file.cursor, filename, file.updated_at
		);
		Ok(Some(file.cursor))
	}
}

/// File-based implementation of DeadLetterRepository, one JSON object per line
pub struct FileDeadLetterRepository {
	data_dir: PathBuf,
	escrow_address: String,
}

impl FileDeadLetterRepository {
	pub fn new(data_dir: PathBuf, escrow_address: &str) -> Self {
		Self {
			data_dir,
			escrow_address: file_stem(escrow_address),
		}
	}

	fn get_dead_letter_filename(&self) -> PathBuf {
		self.data_dir
			.join(format!("dead_letters_{}.jsonl", self.escrow_address))
	}
}

#[async_trait::async_trait]
impl DeadLetterRepository for FileDeadLetterRepository {
	async fn append(&self, letter: &DeadLetter) -> Result<(), ListenerError> {
		tokio::fs::create_dir_all(&self.data_dir).await?;

		let mut line = serde_json::to_string(letter).map_err(|e| {
			ListenerError::PersistenceError(format!("Failed to serialize dead letter: {}", e))
		})?;
		line.push('\n');

		let filename = self.get_dead_letter_filename();
		let mut file = tokio::fs::OpenOptions::new()
			.create(true)
			.append(true)
			.open(&filename)
			.await?;
		file.write_all(line.as_bytes()).await?;
		file.flush().await?;

		info!(
			"Recorded dead letter for {} in {:?}",
			letter.event.id().history_key(),
			filename
		);
		Ok(())
	}

	async fn load_all(&self) -> Result<Vec<DeadLetter>, ListenerError> {
		let filename = self.get_dead_letter_filename();
		if !filename.exists() {
			return Ok(Vec::new());
		}

		let content = tokio::fs::read_to_string(&filename).await?;
		let mut letters = Vec::new();
		for (number, line) in content.lines().enumerate() {
			if line.trim().is_empty() {
				continue;
			}
			match serde_json::from_str::<DeadLetter>(line) {
				Ok(letter) => letters.push(letter),
				Err(e) => warn!(
					"Skipping unreadable dead letter on line {} of {:?}: {}",
					number + 1,
					filename,
					e
				),
			}
		}
		Ok(letters)
	}
}
