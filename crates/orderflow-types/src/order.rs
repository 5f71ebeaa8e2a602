//! Order record types for the orderflow system.
//!
//! This module defines the persisted order entity, the closed status
//! enumeration it moves through and the delivery-method snapshot that decides
//! which branch an order takes after it is ready.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A customer order placed against exactly one tenant.
///
/// Orders are only mutated through the transition engine. The current
/// `status` is a cache of the latest entry in the order's transition ledger.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
	/// Unique numeric identifier.
	pub id: u64,
	/// Human readable order number, immutable once assigned.
	pub order_number: String,
	/// Tenant the order was placed against.
	pub tenant_id: String,
	/// Client that placed the order.
	pub client_id: u64,
	/// Current status of the order.
	pub status: OrderStatus,
	/// How the order reaches the client.
	pub delivery_method: DeliveryMethod,
	/// Creation time. Anchors every window calculation.
	pub created_at: DateTime<Utc>,
	/// Time of the last committed mutation.
	pub updated_at: DateTime<Utc>,
	/// Cancellation window copied from the tenant settings at creation.
	pub cancellation_window_minutes: u32,
	/// Number of payment retry attempts made so far.
	#[serde(default)]
	pub retry_count: u32,
	/// Deadline for payment retries, set once.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub payment_retry_expires_at: Option<DateTime<Utc>>,
	/// Number of committed transitions. Doubles as the ledger sequence.
	#[serde(default)]
	pub version: u64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub paid_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confirmed_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub ready_at: Option<DateTime<Utc>>,
	/// Set on `delivered` or `picked_up`, whichever the order reaches.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub delivered_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub completed_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub cancelled_at: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub refunded_at: Option<DateTime<Utc>>,
}

impl Order {
	/// Moves the order to `status` and records the status timestamp.
	///
	/// Status timestamps are written the first time a status is entered and
	/// never overwritten afterwards.
	pub fn apply_status(&mut self, status: OrderStatus, at: DateTime<Utc>) {
		let slot = match status {
			OrderStatus::Paid => Some(&mut self.paid_at),
			OrderStatus::Confirmed => Some(&mut self.confirmed_at),
			OrderStatus::Ready => Some(&mut self.ready_at),
			OrderStatus::Delivered | OrderStatus::PickedUp => Some(&mut self.delivered_at),
			OrderStatus::Completed => Some(&mut self.completed_at),
			OrderStatus::Cancelled => Some(&mut self.cancelled_at),
			OrderStatus::Refunded => Some(&mut self.refunded_at),
			_ => None,
		};
		if let Some(slot) = slot {
			slot.get_or_insert(at);
		}
		self.status = status;
		self.updated_at = at;
	}

	/// Returns the last instant at which a client may still cancel.
	pub fn cancellation_deadline(&self) -> DateTime<Utc> {
		self.created_at + Duration::minutes(i64::from(self.cancellation_window_minutes))
	}

	/// Returns the payment retry deadline.
	///
	/// Falls back to `created_at + window_minutes` for records whose expiry
	/// was never populated. The boolean is true when the fallback was used.
	pub fn payment_retry_deadline(&self, window_minutes: u32) -> (DateTime<Utc>, bool) {
		match self.payment_retry_expires_at {
			Some(expires_at) => (expires_at, false),
			None => (
				self.created_at + Duration::minutes(i64::from(window_minutes)),
				true,
			),
		}
	}

	/// Returns true when the order has been paid at some point.
	pub fn was_paid(&self) -> bool {
		self.paid_at.is_some()
	}
}

/// Input for creating a new order.
///
/// The cancellation window is not part of the input: it is snapshotted from
/// the tenant settings by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
	pub tenant_id: String,
	pub client_id: u64,
	pub delivery_method: DeliveryMethod,
}

/// Formats the human readable order number for a freshly allocated id.
pub fn format_order_number(id: u64, created_at: DateTime<Utc>) -> String {
	format!("ORD-{}-{:06}", created_at.format("%Y%m%d"), id)
}

/// How an order reaches the client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryMethod {
	Delivery,
	Pickup,
}

impl fmt::Display for DeliveryMethod {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			DeliveryMethod::Delivery => write!(f, "delivery"),
			DeliveryMethod::Pickup => write!(f, "pickup"),
		}
	}
}

/// Status of an order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Order created, waiting for the payment to go through.
	PendingPayment,
	/// The last payment attempt failed; a retry may still be possible.
	PaymentFailed,
	/// Payment captured.
	Paid,
	/// Accepted by the cook.
	Confirmed,
	/// Being cooked.
	Preparing,
	/// Cooked and waiting for hand-off.
	Ready,
	/// Handed to a courier.
	OutForDelivery,
	/// Waiting at the counter for the client.
	ReadyForPickup,
	/// Courier handed the order over.
	Delivered,
	/// Client collected the order.
	PickedUp,
	/// Terminal: fulfilled.
	Completed,
	/// Terminal: cancelled before fulfilment.
	Cancelled,
	/// Terminal: refunded by an administrator.
	Refunded,
}

impl OrderStatus {
	/// Every status, in lifecycle order.
	pub const ALL: [OrderStatus; 13] = [
		OrderStatus::PendingPayment,
		OrderStatus::PaymentFailed,
		OrderStatus::Paid,
		OrderStatus::Confirmed,
		OrderStatus::Preparing,
		OrderStatus::Ready,
		OrderStatus::OutForDelivery,
		OrderStatus::ReadyForPickup,
		OrderStatus::Delivered,
		OrderStatus::PickedUp,
		OrderStatus::Completed,
		OrderStatus::Cancelled,
		OrderStatus::Refunded,
	];

	pub fn as_str(&self) -> &'static str {
		match self {
			OrderStatus::PendingPayment => "pending_payment",
			OrderStatus::PaymentFailed => "payment_failed",
			OrderStatus::Paid => "paid",
			OrderStatus::Confirmed => "confirmed",
			OrderStatus::Preparing => "preparing",
			OrderStatus::Ready => "ready",
			OrderStatus::OutForDelivery => "out_for_delivery",
			OrderStatus::ReadyForPickup => "ready_for_pickup",
			OrderStatus::Delivered => "delivered",
			OrderStatus::PickedUp => "picked_up",
			OrderStatus::Completed => "completed",
			OrderStatus::Cancelled => "cancelled",
			OrderStatus::Refunded => "refunded",
		}
	}

	/// Terminal statuses accept no further business-driven transition.
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
		)
	}

	/// Statuses in which the order is still waiting for a successful payment.
	pub fn is_awaiting_payment(&self) -> bool {
		matches!(self, OrderStatus::PendingPayment | OrderStatus::PaymentFailed)
	}

	/// Statuses that only apply to one delivery method.
	pub fn required_delivery_method(&self) -> Option<DeliveryMethod> {
		match self {
			OrderStatus::OutForDelivery | OrderStatus::Delivered => Some(DeliveryMethod::Delivery),
			OrderStatus::ReadyForPickup | OrderStatus::PickedUp => Some(DeliveryMethod::Pickup),
			_ => None,
		}
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for OrderStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		OrderStatus::ALL
			.into_iter()
			.find(|status| status.as_str() == s)
			.ok_or_else(|| format!("Unknown order status: {}", s))
	}
}
