//!
//! Supabase-backed stores.
//!
//! Talks to the project's PostgREST endpoint with the service-role key. Balances live in the
//! `users` table and history in `tx_history` (see `sql/schema.sql`). Balance changes go through
//! the `apply_balance_delta` database function so the read-modify-write happens inside a single
//! `UPDATE` and cannot race with game settlement.

use super::{
	Account, AppendOutcome, BalanceStore, Direction, HistoryStore, StoreError,
	TransactionHistoryRecord,
};
use crate::ledger::AccountAddress;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Marker raised by `apply_balance_delta` when the balance would go negative.
const INSUFFICIENT_BALANCE_MARKER: &str = "insufficient_balance";

#[derive(Debug, Deserialize)]
struct UserRow {
	wallet_address: String,
	balance: u128,
}

#[derive(Debug, Serialize)]
struct ApplyDeltaParams {
	p_wallet_address: String,
	p_delta: i128,
}

#[derive(Debug, Serialize, Deserialize)]
struct TxHistoryRow {
	tx_hash: String,
	wallet_address: String,
	amount: u128,
	deposit: bool,
	created_at: DateTime<Utc>,
}

impl From<&TransactionHistoryRecord> for TxHistoryRow {
	fn from(record: &TransactionHistoryRecord) -> Self {
		Self {
			tx_hash: record.tx_hash.clone(),
			wallet_address: record.wallet_address.encode(),
			amount: record.amount,
			deposit: record.direction == Direction::Deposit,
			created_at: record.created_at,
		}
	}
}

#[derive(Clone)]
pub struct SupabaseStore {
	client: Client,
	supabase_url: String,
	service_role_key: String,
}

impl SupabaseStore {
	pub fn new(
		supabase_url: String,
		service_role_key: String,
		timeout: Duration,
	) -> Result<Self, StoreError> {
		let client = Client::builder().timeout(timeout).build()?;
		Ok(Self {
			client,
			supabase_url: supabase_url.trim_end_matches('/').to_string(),
			service_role_key,
		})
	}

	fn rest(&self, path: &str) -> String {
		format!("{}/rest/v1/{}", self.supabase_url, path)
	}

	fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
		request
			.header("apikey", &self.service_role_key)
			.bearer_auth(&self.service_role_key)
	}

	async fn check(response: Response) -> Result<Response, StoreError> {
		if response.status().is_success() {
			return Ok(response);
		}
		let status = response.status().as_u16();
		let body = response.text().await.unwrap_or_default();
		Err(StoreError::StatusError { status, body })
	}
}

#[async_trait::async_trait]
impl BalanceStore for SupabaseStore {
	async fn get_account(&self, address: &AccountAddress) -> Result<Option<Account>, StoreError> {
		let request = self.client.get(self.rest("users")).query(&[
			("wallet_address", format!("eq.{}", address)),
			("select", "wallet_address,balance".to_string()),
		]);
		let response = Self::check(self.authorized(request).send().await?).await?;
		let rows: Vec<UserRow> = serde_json::from_str(&response.text().await?)?;

		match rows.into_iter().next() {
			Some(row) => {
				debug!("Loaded account {} from Supabase", row.wallet_address);
				Ok(Some(Account {
					address: *address,
					balance: row.balance,
				}))
			}
			None => Ok(None),
		}
	}

	async fn apply_delta(&self, address: &AccountAddress, delta: i128) -> Result<u128, StoreError> {
		let request = self
			.client
			.post(self.rest("rpc/apply_balance_delta"))
			.json(&ApplyDeltaParams {
				p_wallet_address: address.encode(),
				p_delta: delta,
			});
		let response = self.authorized(request).send().await?;

		let response = match Self::check(response).await {
			Ok(response) => response,
			Err(StoreError::StatusError { body, .. })
				if body.contains(INSUFFICIENT_BALANCE_MARKER) =>
			{
				return Err(StoreError::InsufficientBalance {
					address: *address,
					delta,
				});
			}
			Err(e) => return Err(e),
		};

		let balance: Option<u128> = serde_json::from_str(&response.text().await?)?;
		balance.ok_or(StoreError::AccountNotFound(*address))
	}
}

#[async_trait::async_trait]
impl HistoryStore for SupabaseStore {
	async fn append(&self, record: &TransactionHistoryRecord) -> Result<AppendOutcome, StoreError> {
		let request = self
			.client
			.post(self.rest("tx_history"))
			.query(&[("on_conflict", "tx_hash")])
			.header("Prefer", "resolution=ignore-duplicates,return=representation")
			.json(&[TxHistoryRow::from(record)]);
		let response = Self::check(self.authorized(request).send().await?).await?;
		let inserted: Vec<TxHistoryRow> = serde_json::from_str(&response.text().await?)?;

		if inserted.is_empty() {
			Ok(AppendOutcome::Duplicate)
		} else {
			Ok(AppendOutcome::Inserted)
		}
	}

	async fn contains(&self, tx_hash: &str) -> Result<bool, StoreError> {
		let request = self.client.get(self.rest("tx_history")).query(&[
			("tx_hash", format!("eq.{}", tx_hash)),
			("select", "tx_hash".to_string()),
		]);
		let response = Self::check(self.authorized(request).send().await?).await?;
		let rows: Vec<serde_json::Value> = serde_json::from_str(&response.text().await?)?;
		Ok(!rows.is_empty())
	}
}
