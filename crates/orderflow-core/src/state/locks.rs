//! Per-order exclusive locks.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Registry of one async mutex per order id.
///
/// Acquisition waits at most `timeout`; callers treat a timeout as a
/// retryable concurrent modification.
pub struct OrderLocks {
	locks: DashMap<u64, Arc<Mutex<()>>>,
	timeout: Duration,
}

impl OrderLocks {
	pub fn new(timeout: Duration) -> Self {
		Self {
			locks: DashMap::new(),
			timeout,
		}
	}

	/// Waits for exclusive access to `order_id`.
	///
	/// Returns `None` when the lock could not be taken within the timeout.
	pub async fn acquire(&self, order_id: u64) -> Option<OwnedMutexGuard<()>> {
		let lock = self
			.locks
			.entry(order_id)
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();
		tokio::time::timeout(self.timeout, lock.lock_owned())
			.await
			.ok()
	}

	/// Drops lock entries nobody holds or waits for.
	pub fn prune_idle(&self) -> usize {
		let before = self.locks.len();
		self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
		before.saturating_sub(self.locks.len())
	}

	pub fn len(&self) -> usize {
		self.locks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}
