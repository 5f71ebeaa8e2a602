//! Client cancellation eligibility.

use chrono::{DateTime, Utc};
use orderflow_types::{Order, OrderStatus};
use thiserror::Error;

/// Why a client may not cancel an order.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CancellationDenial {
	#[error("Orders in status {0} cannot be cancelled by the client")]
	StatusNotCancellable(OrderStatus),
	#[error("Cancellation window expired at {deadline}")]
	WindowExpired { deadline: DateTime<Utc> },
}

/// Decides whether a client may still cancel an order.
///
/// Only the window snapshotted on the order is consulted, never the live
/// tenant setting. The check is pure; the engine repeats it under the order
/// lock before committing a client cancellation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CancellationWindowGuard;

impl CancellationWindowGuard {
	pub fn is_cancellable(order: &Order, now: DateTime<Utc>) -> bool {
		Self::check(order, now).is_ok()
	}

	pub fn check(order: &Order, now: DateTime<Utc>) -> Result<(), CancellationDenial> {
		if !matches!(order.status, OrderStatus::Paid | OrderStatus::Confirmed) {
			return Err(CancellationDenial::StatusNotCancellable(order.status));
		}
		let deadline = order.cancellation_deadline();
		if now > deadline {
			return Err(CancellationDenial::WindowExpired { deadline });
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, TimeZone};
	use orderflow_types::{format_order_number, DeliveryMethod};

	fn paid_order(window: u32) -> Order {
		let created_at = Utc.with_ymd_and_hms(2024, 3, 9, 18, 0, 0).unwrap();
		Order {
			id: 11,
			order_number: format_order_number(11, created_at),
			tenant_id: "acme".into(),
			client_id: 4,
			status: OrderStatus::Paid,
			delivery_method: DeliveryMethod::Delivery,
			created_at,
			updated_at: created_at,
			cancellation_window_minutes: window,
			retry_count: 0,
			payment_retry_expires_at: None,
			version: 1,
			paid_at: Some(created_at),
			confirmed_at: None,
			ready_at: None,
			delivered_at: None,
			completed_at: None,
			cancelled_at: None,
			refunded_at: None,
		}
	}

	#[test]
	fn test_window_boundary_is_inclusive() {
		let order = paid_order(15);
		let deadline = order.created_at + Duration::minutes(15);

		assert!(CancellationWindowGuard::is_cancellable(
			&order,
			order.created_at + Duration::minutes(14)
		));
		assert!(CancellationWindowGuard::is_cancellable(&order, deadline));
		assert_eq!(
			CancellationWindowGuard::check(&order, deadline + Duration::seconds(1)),
			Err(CancellationDenial::WindowExpired { deadline })
		);
	}

	#[test]
	fn test_only_paid_or_confirmed() {
		let mut order = paid_order(15);
		let now = order.created_at;

		order.status = OrderStatus::Confirmed;
		assert!(CancellationWindowGuard::is_cancellable(&order, now));

		for status in [
			OrderStatus::PendingPayment,
			OrderStatus::Preparing,
			OrderStatus::Cancelled,
		] {
			order.status = status;
			assert_eq!(
				CancellationWindowGuard::check(&order, now),
				Err(CancellationDenial::StatusNotCancellable(status))
			);
		}
	}

	#[test]
	fn test_uses_order_snapshot() {
		let order = paid_order(5);
		assert!(!CancellationWindowGuard::is_cancellable(
			&order,
			order.created_at + Duration::minutes(6)
		));
	}
}
