//! Tenant settings consulted when an order is created.
//!
//! Settings can be swapped at runtime. Existing orders never see the change:
//! the cancellation window is copied onto the order at creation and never
//! looked up again.

use arc_swap::ArcSwap;
use orderflow_config::Config;
use std::collections::HashMap;
use std::sync::Arc;

pub struct TenantDirectory {
	/// Window used for tenants without an explicit setting.
	default_window_minutes: u32,
	windows: ArcSwap<HashMap<String, u32>>,
}

impl TenantDirectory {
	pub fn new(default_window_minutes: u32, windows: HashMap<String, u32>) -> Self {
		Self {
			default_window_minutes,
			windows: ArcSwap::from_pointee(windows),
		}
	}

	pub fn from_config(config: &Config) -> Self {
		let windows = config
			.tenants
			.iter()
			.map(|(id, tenant)| (id.clone(), tenant.cancellation_window_minutes))
			.collect();
		Self::new(config.cancellation.default_window_minutes, windows)
	}

	/// Cancellation window a new order of `tenant_id` receives.
	pub fn cancellation_window_for(&self, tenant_id: &str) -> u32 {
		self.windows
			.load()
			.get(tenant_id)
			.copied()
			.unwrap_or(self.default_window_minutes)
	}

	/// Changes one tenant's window for orders created from now on.
	pub fn set_cancellation_window(&self, tenant_id: &str, minutes: u32) {
		self.windows.rcu(|current| {
			let mut next = HashMap::clone(current);
			next.insert(tenant_id.to_string(), minutes);
			next
		});
		tracing::info!(tenant_id, minutes, "Tenant cancellation window updated");
	}

	/// Replaces every tenant setting at once.
	pub fn replace(&self, windows: HashMap<String, u32>) {
		self.windows.store(Arc::new(windows));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lookup_and_update() {
		let directory = TenantDirectory::new(15, HashMap::from([("acme".to_string(), 5)]));
		assert_eq!(directory.cancellation_window_for("acme"), 5);
		assert_eq!(directory.cancellation_window_for("other"), 15);

		directory.set_cancellation_window("other", 30);
		assert_eq!(directory.cancellation_window_for("other"), 30);
		assert_eq!(directory.cancellation_window_for("acme"), 5);

		directory.replace(HashMap::new());
		assert_eq!(directory.cancellation_window_for("acme"), 15);
	}

	#[test]
	fn test_from_config() {
		let config = Config::for_testing();
		let directory = TenantDirectory::from_config(&config);
		assert_eq!(
			directory.cancellation_window_for("anyone"),
			config.cancellation.default_window_minutes
		);
	}
}
