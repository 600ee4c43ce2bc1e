use super::{
	Account, AppendOutcome, BalanceStore, HistoryStore, StoreError, TransactionHistoryRecord,
};
use crate::ledger::AccountAddress;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct MemoryState {
	balances: HashMap<AccountAddress, u128>,
	history: Vec<TransactionHistoryRecord>,
	history_keys: HashSet<String>,
}

/// Both stores kept in process memory behind one mutex.
///
/// Every operation takes the lock once, so `apply_delta` is atomic with respect to other
/// writers sharing the same instance.
#[derive(Default)]
pub struct InMemoryStore {
	state: Mutex<MemoryState>,
}

impl InMemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, MemoryState> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Provision an account. Stands in for the external provisioning step.
	pub fn insert_account(&self, address: AccountAddress, balance: u128) {
		self.lock().balances.insert(address, balance);
	}

	pub fn balance(&self, address: &AccountAddress) -> Option<u128> {
		self.lock().balances.get(address).copied()
	}

	pub fn history(&self) -> Vec<TransactionHistoryRecord> {
		self.lock().history.clone()
	}
}

#[async_trait::async_trait]
impl BalanceStore for InMemoryStore {
	async fn get_account(&self, address: &AccountAddress) -> Result<Option<Account>, StoreError> {
		Ok(self.lock().balances.get(address).map(|balance| Account {
			address: *address,
			balance: *balance,
		}))
	}

	async fn apply_delta(&self, address: &AccountAddress, delta: i128) -> Result<u128, StoreError> {
		let mut state = self.lock();
		let balance = state
			.balances
			.get_mut(address)
			.ok_or(StoreError::AccountNotFound(*address))?;

		let updated = if delta >= 0 {
			balance.checked_add(delta as u128)
		} else {
			balance.checked_sub(delta.unsigned_abs())
		};
		let updated = updated.ok_or(StoreError::InsufficientBalance {
			address: *address,
			delta,
		})?;

		*balance = updated;
		Ok(updated)
	}
}

#[async_trait::async_trait]
impl HistoryStore for InMemoryStore {
	async fn append(&self, record: &TransactionHistoryRecord) -> Result<AppendOutcome, StoreError> {
		let mut state = self.lock();
		if !state.history_keys.insert(record.tx_hash.clone()) {
			return Ok(AppendOutcome::Duplicate);
		}
		state.history.push(record.clone());
		Ok(AppendOutcome::Inserted)
	}

	async fn contains(&self, tx_hash: &str) -> Result<bool, StoreError> {
		Ok(self.lock().history_keys.contains(tx_hash))
	}
}
