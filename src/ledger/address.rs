use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressError {
	#[error("address is missing the ':' separator")]
	MissingSeparator,
	#[error("invalid workchain: {0}")]
	InvalidWorkchain(String),
	#[error("account hash must be 32 hex-encoded bytes")]
	InvalidHash,
}

/// A standard TON account address, `workchain:hash`.
///
/// This is the raw form the balance mirror keys accounts by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountAddress {
	pub workchain: i8,
	pub hash: [u8; 32],
}

impl AccountAddress {
	pub fn new(workchain: i8, hash: [u8; 32]) -> Self {
		Self { workchain, hash }
	}

	pub fn decode(encoded: &str) -> Result<Self, AddressError> {
		let (workchain, hash) = encoded
			.split_once(':')
			.ok_or(AddressError::MissingSeparator)?;
		let workchain = workchain
			.parse::<i8>()
			.map_err(|_| AddressError::InvalidWorkchain(workchain.to_string()))?;
		let bytes = hex::decode(hash).map_err(|_| AddressError::InvalidHash)?;
		let hash: [u8; 32] = bytes.try_into().map_err(|_| AddressError::InvalidHash)?;

		Ok(Self { workchain, hash })
	}

	pub fn encode(&self) -> String {
		format!("{}:{}", self.workchain, hex::encode(self.hash))
	}
}

impl std::fmt::Display for AccountAddress {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.encode())
	}
}

impl FromStr for AccountAddress {
	type Err = AddressError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::decode(s)
	}
}

impl Serialize for AccountAddress {
	fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&self.encode())
	}
}

impl<'de> Deserialize<'de> for AccountAddress {
	fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let raw = String::deserialize(deserializer)?;
		Self::decode(&raw).map_err(serde::de::Error::custom)
	}
}
