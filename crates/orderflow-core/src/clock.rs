//! Time source used for every window and timestamp decision.

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

/// Source of the current wall-clock time.
pub trait Clock: Send + Sync {
	fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now(&self) -> DateTime<Utc> {
		Utc::now()
	}
}

/// Clock that only moves when told to.
pub struct ManualClock {
	now: ArcSwap<DateTime<Utc>>,
}

impl ManualClock {
	pub fn new(start: DateTime<Utc>) -> Self {
		Self {
			now: ArcSwap::from_pointee(start),
		}
	}

	pub fn set(&self, at: DateTime<Utc>) {
		self.now.store(Arc::new(at));
	}

	pub fn advance(&self, by: Duration) {
		self.now.rcu(|current| **current + by);
	}
}

impl Clock for ManualClock {
	fn now(&self) -> DateTime<Utc> {
		**self.now.load()
	}
}
