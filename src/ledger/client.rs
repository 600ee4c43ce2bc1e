//!
//! HTTP client for the TonAPI indexer.
//!
//! This module provides an async client for reading an account's transaction stream from
//! TonAPI, and the `LedgerQuery` trait through which the listener consumes it. All methods
//! are async and designed for use with Tokio.

use super::types::*;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

/// Read access to an account's transaction stream.
///
/// Implementations perform exactly one request per call and never retry internally; retrying
/// is the caller's decision.
#[async_trait::async_trait]
pub trait LedgerQuery: Send + Sync {
	/// Fetch one page of transactions on `address` matching `query`.
	async fn fetch_transactions(
		&self,
		address: &str,
		query: TransactionQuery,
	) -> Result<Vec<RawTransaction>, LedgerError>;
}

/// TonAPI indexer client
#[derive(Clone)]
pub struct TonApiClient {
	/// The underlying HTTP client.
	http_client: Client,
	/// Base URL of the TonAPI deployment, e.g. `https://testnet.tonapi.io`.
	base_url: String,
	/// Optional bearer token raising the indexer's rate limits.
	api_key: Option<String>,
}

impl TonApiClient {
	/// Create a new TonAPI client.
	///
	/// # Arguments
	/// * `base_url` - The TonAPI deployment to query.
	/// * `api_key` - Optional API key sent as a bearer token.
	/// * `timeout` - Request timeout applied to every call.
	pub fn new(
		base_url: String,
		api_key: Option<String>,
		timeout: Duration,
	) -> Result<Self, LedgerError> {
		if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
			return Err(LedgerError::EndpointError(format!(
				"{} is not an http(s) URL",
				base_url
			)));
		}

		let http_client = Client::builder().timeout(timeout).build()?;

		Ok(Self {
			http_client,
			base_url: base_url.trim_end_matches('/').to_string(),
			api_key,
		})
	}

	fn transactions_url(&self, address: &str) -> String {
		format!(
			"{}/v2/blockchain/accounts/{}/transactions",
			self.base_url, address
		)
	}
}

#[async_trait::async_trait]
impl LedgerQuery for TonApiClient {
	async fn fetch_transactions(
		&self,
		address: &str,
		query: TransactionQuery,
	) -> Result<Vec<RawTransaction>, LedgerError> {
		let mut params = vec![
			("limit", query.limit.to_string()),
			("sort_order", query.order.as_str().to_string()),
		];
		if let Some(after) = query.after {
			params.push(("after_lt", after.0.to_string()));
		}

		debug!(
			"Fetching transactions for {} with params {:?}",
			address, params
		);

		let mut request = self
			.http_client
			.get(self.transactions_url(address))
			.query(&params);
		if let Some(api_key) = &self.api_key {
			request = request.bearer_auth(api_key);
		}

		let response = request.send().await?;

		if !response.status().is_success() {
			let status = response.status().as_u16();
			let body = response.text().await.unwrap_or_default();
			return Err(LedgerError::StatusError { status, body });
		}

		let text = response.text().await?;
		let page: TonApiTransactions = serde_json::from_str(&text)?;

		debug!(
			"Indexer returned {} transactions for {}",
			page.transactions.len(),
			address
		);

		Ok(page
			.transactions
			.into_iter()
			.map(RawTransaction::from)
			.collect())
	}
}
