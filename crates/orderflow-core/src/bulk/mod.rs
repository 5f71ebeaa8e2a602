//! Mass status transitions.
//!
//! Applies one target status to a batch of orders. Each order goes through
//! the state machine on its own, so one order failing never blocks or rolls
//! back the others.

use crate::engine::event_bus::EventBus;
use crate::state::{transitions, OrderStateError, OrderStateMachine};
use futures::stream::{self, StreamExt};
use orderflow_types::{
	Actor, BatchEvent, DeliveryMethod, OrderStatus, OrderflowEvent, TransitionRequest,
};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Placeholder order number for ids that match no order.
pub const UNKNOWN_ORDER_NUMBER: &str = "N/A";

/// Why a selection cannot be advanced as one batch.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BulkValidationError {
	#[error("No orders selected")]
	EmptySelection,
	#[error("Orders not found: {0:?}")]
	OrdersNotFound(Vec<u64>),
	#[error("Selected orders have mixed statuses: {0:?}")]
	MixedStatuses(Vec<OrderStatus>),
	#[error("Selected ready orders have mixed delivery methods")]
	MixedDeliveryMethods,
	#[error("Orders in status {0} have no next status")]
	NoNextStatus(OrderStatus),
	#[error("Storage error: {0}")]
	Storage(String),
}

/// Category of a per-order failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkFailureKind {
	NotFound,
	Validation,
	Concurrency,
	Storage,
}

impl From<&OrderStateError> for BulkFailureKind {
	fn from(error: &OrderStateError) -> Self {
		match error {
			OrderStateError::OrderNotFound(_) => BulkFailureKind::NotFound,
			OrderStateError::ConcurrentModification(_) => BulkFailureKind::Concurrency,
			OrderStateError::Storage(_) => BulkFailureKind::Storage,
			OrderStateError::IllegalTransition { .. }
			| OrderStateError::DeliveryMethodMismatch { .. }
			| OrderStateError::CancellationWindowExpired { .. }
			| OrderStateError::OverrideReasonRequired
			| OrderStateError::CancellationNotPermitted { .. }
			| OrderStateError::OverrideNotPermitted { .. }
			| OrderStateError::PreconditionFailed(_) => BulkFailureKind::Validation,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
	pub order_id: u64,
	/// Order number, or [`UNKNOWN_ORDER_NUMBER`] when the order does not exist.
	pub order_number: String,
	pub reason: String,
	pub kind: BulkFailureKind,
}

/// Aggregated outcome of a mass transition.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkTransitionReport {
	pub total: usize,
	pub success_count: usize,
	pub failure_count: usize,
	/// One entry per failed order, in input order.
	pub failures: Vec<BulkFailure>,
}

pub struct MassTransitionCoordinator {
	state: Arc<OrderStateMachine>,
	event_bus: EventBus,
	concurrency: usize,
}

impl MassTransitionCoordinator {
	pub fn new(state: Arc<OrderStateMachine>, event_bus: EventBus, concurrency: usize) -> Self {
		Self {
			state,
			event_bus,
			concurrency: concurrency.max(1),
		}
	}

	/// Checks that the selected orders can move as one batch.
	///
	/// Returns the shared current status and the status all of them would
	/// move to next.
	pub async fn validate_same_status(
		&self,
		order_ids: &[u64],
	) -> Result<(OrderStatus, OrderStatus), BulkValidationError> {
		let order_ids = dedup(order_ids);
		if order_ids.is_empty() {
			return Err(BulkValidationError::EmptySelection);
		}

		let mut orders = Vec::with_capacity(order_ids.len());
		let mut missing = Vec::new();
		for id in order_ids {
			match self.state.get_order(id).await {
				Ok(order) => orders.push(order),
				Err(OrderStateError::OrderNotFound(_)) => missing.push(id),
				Err(e) => return Err(BulkValidationError::Storage(e.to_string())),
			}
		}
		if !missing.is_empty() {
			return Err(BulkValidationError::OrdersNotFound(missing));
		}

		let mut statuses: Vec<OrderStatus> = Vec::new();
		for order in &orders {
			if !statuses.contains(&order.status) {
				statuses.push(order.status);
			}
		}
		if statuses.len() > 1 {
			return Err(BulkValidationError::MixedStatuses(statuses));
		}
		let current = statuses[0];

		let methods: HashSet<DeliveryMethod> = orders.iter().map(|o| o.delivery_method).collect();
		if current == OrderStatus::Ready && methods.len() > 1 {
			return Err(BulkValidationError::MixedDeliveryMethods);
		}

		let method = orders[0].delivery_method;
		let next = transitions::next_status(current, method)
			.ok_or(BulkValidationError::NoNextStatus(current))?;
		Ok((current, next))
	}

	/// Moves every selected order to `target`, isolating failures per order.
	///
	/// Duplicate ids are processed once, at their first position.
	#[instrument(skip_all, fields(target = %target, orders = order_ids.len()))]
	pub async fn mass_update_status(
		&self,
		order_ids: &[u64],
		target: OrderStatus,
		actor: Actor,
	) -> BulkTransitionReport {
		let order_ids = dedup(order_ids);
		let results: Vec<(u64, Result<(), OrderStateError>)> = stream::iter(order_ids)
			.map(move |order_id| async move {
				let result = self
					.state
					.transition(TransitionRequest::new(order_id, target, actor))
					.await
					.map(|_| ());
				(order_id, result)
			})
			.buffered(self.concurrency)
			.collect()
			.await;

		let mut report = BulkTransitionReport {
			total: results.len(),
			..BulkTransitionReport::default()
		};
		for (order_id, result) in results {
			match result {
				Ok(()) => report.success_count += 1,
				Err(error) => {
					report.failures.push(self.describe_failure(order_id, &error).await);
				},
			}
		}
		report.failure_count = report.failures.len();

		tracing::info!(
			total = report.total,
			success_count = report.success_count,
			failure_count = report.failure_count,
			"Mass transition finished"
		);
		self.event_bus
			.publish(OrderflowEvent::Batch(BatchEvent::BulkCompleted {
				total: report.total,
				success_count: report.success_count,
				failure_count: report.failure_count,
			}));
		report
	}

	/// Validates the selection, then moves it to its shared next status.
	pub async fn mass_advance(
		&self,
		order_ids: &[u64],
		actor: Actor,
	) -> Result<BulkTransitionReport, BulkValidationError> {
		let (_, next) = self.validate_same_status(order_ids).await?;
		Ok(self.mass_update_status(order_ids, next, actor).await)
	}

	async fn describe_failure(&self, order_id: u64, error: &OrderStateError) -> BulkFailure {
		let kind = BulkFailureKind::from(error);
		let order_number = match kind {
			BulkFailureKind::NotFound => UNKNOWN_ORDER_NUMBER.to_string(),
			_ => self
				.state
				.get_order(order_id)
				.await
				.map(|order| order.order_number)
				.unwrap_or_else(|_| UNKNOWN_ORDER_NUMBER.to_string()),
		};
		let reason = match kind {
			BulkFailureKind::NotFound => "not found".to_string(),
			_ => error.to_string(),
		};
		tracing::debug!(order_id, %reason, "Order failed in mass transition");
		BulkFailure {
			order_id,
			order_number,
			reason,
			kind,
		}
	}
}

fn dedup(order_ids: &[u64]) -> Vec<u64> {
	let mut seen = HashSet::with_capacity(order_ids.len());
	order_ids
		.iter()
		.copied()
		.filter(|id| seen.insert(*id))
		.collect()
}
