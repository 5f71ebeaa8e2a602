//! Side-effect dispatch contracts for the orderflow system.
//!
//! After a transition commits, the engine informs the outside world:
//! notifications to clients and cooks, refunds to the client wallet, payout
//! hooks for the cook, and the activity/audit log. None of these are part of
//! the transition's correctness guarantees; callers log their failures and
//! move on.

use async_trait::async_trait;
use orderflow_types::{
	Actor, ConfigSchema, ImplementationRegistry, Order, OrderStatus, StatusTransition,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod log;
	pub mod recording;
}

/// Errors that can occur while dispatching a side effect.
#[derive(Debug, Error)]
pub enum DispatchError {
	#[error("Notification failed: {0}")]
	Notification(String),
	#[error("Refund failed: {0}")]
	Refund(String),
	#[error("Payout failed: {0}")]
	Payout(String),
	#[error("Audit log failed: {0}")]
	Audit(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// One append-only activity log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
	pub actor: Actor,
	pub order_id: u64,
	pub order_number: String,
	pub from: OrderStatus,
	pub to: OrderStatus,
	/// Free-form metadata such as the override flag and reason.
	pub metadata: BTreeMap<String, String>,
}

impl AuditEntry {
	/// Builds the entry describing a committed transition.
	pub fn for_transition(order: &Order, transition: &StatusTransition) -> Self {
		let mut metadata = BTreeMap::new();
		metadata.insert("sequence".to_string(), transition.sequence.to_string());
		if transition.is_override {
			metadata.insert("override".to_string(), "true".to_string());
		}
		if let Some(reason) = &transition.reason {
			metadata.insert("reason".to_string(), reason.clone());
		}
		Self {
			actor: transition.actor,
			order_id: order.id,
			order_number: order.order_number.clone(),
			from: transition.from,
			to: transition.to,
			metadata,
		}
	}
}

/// Informs clients and cooks about a new order status.
#[async_trait]
pub trait NotificationInterface: Send + Sync {
	async fn notify_status_change(
		&self,
		order: &Order,
		transition: &StatusTransition,
	) -> Result<(), DispatchError>;
}

/// Credits the client's wallet when a paid order is cancelled.
#[async_trait]
pub trait RefundInterface: Send + Sync {
	async fn credit_cancellation_refund(&self, order: &Order) -> Result<(), DispatchError>;
}

/// Cook payout hooks fired when an order completes.
#[async_trait]
pub trait PayoutInterface: Send + Sync {
	async fn capture_commission(&self, order: &Order) -> Result<(), DispatchError>;

	/// Starts the timer after which the cook may withdraw the order's earnings.
	async fn start_withdrawable_timer(&self, order: &Order) -> Result<(), DispatchError>;
}

/// Append-only activity log.
#[async_trait]
pub trait AuditInterface: Send + Sync {
	async fn record(&self, entry: &AuditEntry) -> Result<(), DispatchError>;
}

/// Bundle of the configured side-effect collaborators.
#[derive(Clone)]
pub struct DispatchService {
	pub notifications: Arc<dyn NotificationInterface>,
	pub refunds: Arc<dyn RefundInterface>,
	pub payouts: Arc<dyn PayoutInterface>,
	pub audit: Arc<dyn AuditInterface>,
	schema: Arc<dyn ConfigSchema>,
}

impl DispatchService {
	pub fn new(
		notifications: Arc<dyn NotificationInterface>,
		refunds: Arc<dyn RefundInterface>,
		payouts: Arc<dyn PayoutInterface>,
		audit: Arc<dyn AuditInterface>,
		schema: Arc<dyn ConfigSchema>,
	) -> Self {
		Self {
			notifications,
			refunds,
			payouts,
			audit,
			schema,
		}
	}

	/// Builds a service where one backend implements every contract.
	pub fn from_backend<B>(backend: Arc<B>, schema: Arc<dyn ConfigSchema>) -> Self
	where
		B: NotificationInterface + RefundInterface + PayoutInterface + AuditInterface + 'static,
	{
		Self::new(
			backend.clone(),
			backend.clone(),
			backend.clone(),
			backend,
			schema,
		)
	}

	pub fn config_schema(&self) -> &dyn ConfigSchema {
		self.schema.as_ref()
	}
}

/// Type alias for dispatch factory functions.
pub type DispatchFactory = fn(&toml::Value) -> Result<DispatchService, DispatchError>;

/// Registry trait for dispatch implementations.
pub trait DispatchRegistry: ImplementationRegistry<Factory = DispatchFactory> {}

/// Get all registered dispatch implementations.
pub fn get_all_implementations() -> Vec<(&'static str, DispatchFactory)> {
	use implementations::{log, recording};

	vec![
		(log::Registry::NAME, log::Registry::factory()),
		(recording::Registry::NAME, recording::Registry::factory()),
	]
}
