//! Status transition ledger types.

use crate::{Actor, OrderStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Immutable record of one committed status change.
///
/// Exactly one record is appended per successful transition. Records are
/// never updated or deleted; an order's history is its records ordered by
/// `sequence`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusTransition {
	pub order_id: u64,
	/// Order version after the change, starting at 1.
	pub sequence: u64,
	pub from: OrderStatus,
	pub to: OrderStatus,
	pub actor: Actor,
	pub is_override: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<String>,
	pub at: DateTime<Utc>,
}

/// A request to move one order to a target status.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionRequest {
	pub order_id: u64,
	pub target: OrderStatus,
	pub actor: Actor,
	pub is_override: bool,
	pub reason: Option<String>,
}

impl TransitionRequest {
	pub fn new(order_id: u64, target: OrderStatus, actor: Actor) -> Self {
		Self {
			order_id,
			target,
			actor,
			is_override: false,
			reason: None,
		}
	}

	/// Marks the request as an administrative override with a reason.
	pub fn with_override(mut self, reason: impl Into<String>) -> Self {
		self.is_override = true;
		self.reason = Some(reason.into());
		self
	}

	pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
		self.reason = Some(reason.into());
		self
	}
}
