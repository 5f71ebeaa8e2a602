//! Legal status transitions.
//!
//! Business transitions follow a fixed adjacency table. Administrative
//! overrides skip the table but stay inside a small set of bounds so an order
//! never returns from a terminal state to an active one.

use once_cell::sync::Lazy;
use orderflow_types::{DeliveryMethod, OrderStatus};
use std::collections::{HashMap, HashSet};

static ADJACENCY: Lazy<HashMap<OrderStatus, HashSet<OrderStatus>>> = Lazy::new(|| {
	use OrderStatus::*;

	let mut m = HashMap::new();
	m.insert(
		PendingPayment,
		HashSet::from([Paid, PaymentFailed, Cancelled]),
	);
	m.insert(
		PaymentFailed,
		HashSet::from([PendingPayment, Paid, Cancelled]),
	);
	m.insert(Paid, HashSet::from([Confirmed, Cancelled]));
	m.insert(Confirmed, HashSet::from([Preparing, Cancelled]));
	m.insert(Preparing, HashSet::from([Ready]));
	m.insert(Ready, HashSet::from([OutForDelivery, ReadyForPickup]));
	m.insert(OutForDelivery, HashSet::from([Delivered]));
	m.insert(ReadyForPickup, HashSet::from([PickedUp]));
	m.insert(Delivered, HashSet::from([Completed]));
	m.insert(PickedUp, HashSet::from([Completed]));
	m.insert(Completed, HashSet::new()); // terminal
	m.insert(Cancelled, HashSet::new()); // terminal
	m.insert(Refunded, HashSet::new()); // terminal
	m
});

/// Returns true when `from -> to` is a regular business transition.
///
/// Delivery-method applicability is checked separately.
pub fn is_adjacent(from: OrderStatus, to: OrderStatus) -> bool {
	ADJACENCY.get(&from).is_some_and(|next| next.contains(&to))
}

/// Returns true when an administrative override may move `from -> to`.
///
/// Overrides may bridge any two active statuses and may refund any order.
/// A completed or cancelled order can only be refunded, and a refunded order
/// is final.
pub fn override_allowed(from: OrderStatus, to: OrderStatus) -> bool {
	if from == to {
		return false;
	}
	match from {
		OrderStatus::Refunded => false,
		OrderStatus::Completed | OrderStatus::Cancelled => to == OrderStatus::Refunded,
		_ => true,
	}
}

/// The single forward step an order takes from `current` on the happy path.
///
/// Statuses waiting on a payment have no operator-driven next step, and
/// terminal statuses have none at all.
pub fn next_status(current: OrderStatus, method: DeliveryMethod) -> Option<OrderStatus> {
	match current {
		OrderStatus::Paid => Some(OrderStatus::Confirmed),
		OrderStatus::Confirmed => Some(OrderStatus::Preparing),
		OrderStatus::Preparing => Some(OrderStatus::Ready),
		OrderStatus::Ready => Some(match method {
			DeliveryMethod::Delivery => OrderStatus::OutForDelivery,
			DeliveryMethod::Pickup => OrderStatus::ReadyForPickup,
		}),
		OrderStatus::OutForDelivery => Some(OrderStatus::Delivered),
		OrderStatus::ReadyForPickup => Some(OrderStatus::PickedUp),
		OrderStatus::Delivered | OrderStatus::PickedUp => Some(OrderStatus::Completed),
		OrderStatus::PendingPayment
		| OrderStatus::PaymentFailed
		| OrderStatus::Completed
		| OrderStatus::Cancelled
		| OrderStatus::Refunded => None,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_terminal_statuses_have_no_successors() {
		for from in OrderStatus::ALL.into_iter().filter(|s| s.is_terminal()) {
			for to in OrderStatus::ALL {
				assert!(!is_adjacent(from, to), "{} -> {}", from, to);
			}
		}
	}

	#[test]
	fn test_refunded_only_through_override() {
		for from in OrderStatus::ALL {
			assert!(!is_adjacent(from, OrderStatus::Refunded));
			if from != OrderStatus::Refunded {
				assert!(override_allowed(from, OrderStatus::Refunded));
			}
		}
		assert!(!override_allowed(OrderStatus::Refunded, OrderStatus::Paid));
		assert!(!override_allowed(OrderStatus::Cancelled, OrderStatus::Paid));
		assert!(override_allowed(OrderStatus::Preparing, OrderStatus::Paid));
		assert!(!override_allowed(OrderStatus::Ready, OrderStatus::Ready));
	}

	#[test]
	fn test_next_status_follows_adjacency() {
		for method in [DeliveryMethod::Delivery, DeliveryMethod::Pickup] {
			for current in OrderStatus::ALL {
				if let Some(next) = next_status(current, method) {
					assert!(is_adjacent(current, next));
					if let Some(required) = next.required_delivery_method() {
						assert_eq!(required, method);
					}
				}
			}
		}
		assert_eq!(
			next_status(OrderStatus::Ready, DeliveryMethod::Pickup),
			Some(OrderStatus::ReadyForPickup)
		);
	}
}
