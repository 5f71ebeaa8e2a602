//! Storage-related types for the orderflow system.

use std::str::FromStr;

/// Storage namespaces for the different data collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
	/// Order records, keyed by order id.
	Orders,
	/// Append-only transition ledger, keyed by order id and sequence.
	Transitions,
	/// Id sequences.
	Sequences,
}

impl StorageKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			StorageKey::Orders => "orders",
			StorageKey::Transitions => "transitions",
			StorageKey::Sequences => "sequences",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[Self::Orders, Self::Transitions, Self::Sequences].into_iter()
	}

	/// Builds the id of a ledger entry.
	///
	/// Both parts are zero padded so lexicographic key order matches the
	/// numeric order of `(order_id, sequence)`.
	pub fn transition_id(order_id: u64, sequence: u64) -> String {
		format!("{:020}-{:010}", order_id, sequence)
	}

	/// Prefix shared by every ledger entry of one order.
	pub fn transition_prefix(order_id: u64) -> String {
		format!("{:020}-", order_id)
	}
}

impl FromStr for StorageKey {
	type Err = ();

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"orders" => Ok(Self::Orders),
			"transitions" => Ok(Self::Transitions),
			"sequences" => Ok(Self::Sequences),
			_ => Err(()),
		}
	}
}

impl From<StorageKey> for &'static str {
	fn from(key: StorageKey) -> Self {
		key.as_str()
	}
}
