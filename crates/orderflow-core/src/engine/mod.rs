//! Order engine facade.
//!
//! Ties the state machine, retry timer, mass coordinator and tenant directory
//! together behind one cloneable handle, and runs the periodic expired-payment
//! sweep until shutdown.

pub mod event_bus;
pub mod lifecycle;

use crate::bulk::{BulkTransitionReport, BulkValidationError, MassTransitionCoordinator};
use crate::guards::CancellationWindowGuard;
use crate::retry::{PaymentRetryTimer, RetryError, RetryOutcome, SweepReport};
use crate::state::{OrderStateError, OrderStateMachine};
use crate::tenants::TenantDirectory;
use orderflow_config::Config;
use orderflow_payment::PaymentDetails;
use orderflow_types::{
	Actor, NewOrder, Order, OrderStatus, StatusTransition, TransitionRequest,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::MissedTickBehavior;

/// Errors that can occur while running the engine.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Service error: {0}")]
	Service(String),
}

#[derive(Clone)]
pub struct OrderEngine {
	pub(crate) config: Config,
	pub(crate) state: Arc<OrderStateMachine>,
	pub(crate) retry: Arc<PaymentRetryTimer>,
	pub(crate) bulk: Arc<MassTransitionCoordinator>,
	pub(crate) tenants: Arc<TenantDirectory>,
	pub(crate) event_bus: event_bus::EventBus,
}

impl OrderEngine {
	pub fn new(
		config: Config,
		state: Arc<OrderStateMachine>,
		retry: Arc<PaymentRetryTimer>,
		bulk: Arc<MassTransitionCoordinator>,
		tenants: Arc<TenantDirectory>,
		event_bus: event_bus::EventBus,
	) -> Self {
		Self {
			config,
			state,
			retry,
			bulk,
			tenants,
			event_bus,
		}
	}

	/// Creates an order for a tenant.
	///
	/// The tenant's current cancellation window and the payment retry
	/// deadline are fixed on the order before it is stored.
	pub async fn create_order(&self, new_order: NewOrder) -> Result<Order, OrderStateError> {
		let window = self.tenants.cancellation_window_for(&new_order.tenant_id);
		self.state
			.create_order(new_order, window, self.retry.window_minutes())
			.await
	}

	pub async fn get_order(&self, order_id: u64) -> Result<Order, OrderStateError> {
		self.state.get_order(order_id).await
	}

	pub async fn order_history(
		&self,
		order_id: u64,
	) -> Result<Vec<StatusTransition>, OrderStateError> {
		self.state.order_history(order_id).await
	}

	/// Moves one order to a new status and returns the updated order.
	pub async fn transition(&self, request: TransitionRequest) -> Result<Order, OrderStateError> {
		self.state
			.transition(request)
			.await
			.map(|(order, _)| order)
	}

	/// Cancels an order on behalf of the client who placed it.
	///
	/// Ownership and the cancellation window are checked under the order lock.
	pub async fn cancel_by_client(
		&self,
		order_id: u64,
		client_id: u64,
	) -> Result<Order, OrderStateError> {
		let request = TransitionRequest::new(order_id, OrderStatus::Cancelled, Actor::User(client_id))
			.with_reason("cancelled by client");
		self.state
			.transition_guarded(request, move |order, _| {
				if order.client_id != client_id {
					return Err(OrderStateError::PreconditionFailed(format!(
						"order {} does not belong to client {}",
						order.order_number, client_id
					)));
				}
				Ok(())
			})
			.await
			.map(|(order, _)| order)
	}

	/// Unlocked cancellation check, suitable for display only.
	pub async fn can_cancel(&self, order_id: u64) -> Result<bool, OrderStateError> {
		let order = self.state.get_order(order_id).await?;
		Ok(CancellationWindowGuard::is_cancellable(
			&order,
			self.state.clock().now(),
		))
	}

	pub async fn retry_payment(
		&self,
		order_id: u64,
		actor: Actor,
		details: &PaymentDetails,
	) -> Result<RetryOutcome, RetryError> {
		self.retry.retry_payment(order_id, actor, details).await
	}

	/// Unlocked retry check, suitable for display only.
	pub async fn can_retry(&self, order_id: u64) -> Result<bool, OrderStateError> {
		let order = self.state.get_order(order_id).await?;
		Ok(self.retry.can_retry(&order))
	}

	pub async fn sweep_expired_orders(&self) -> Result<SweepReport, RetryError> {
		self.retry.sweep_expired_orders().await
	}

	pub async fn validate_same_status(
		&self,
		order_ids: &[u64],
	) -> Result<(OrderStatus, OrderStatus), BulkValidationError> {
		self.bulk.validate_same_status(order_ids).await
	}

	pub async fn mass_update_status(
		&self,
		order_ids: &[u64],
		target: OrderStatus,
		actor: Actor,
	) -> BulkTransitionReport {
		self.bulk.mass_update_status(order_ids, target, actor).await
	}

	pub async fn mass_advance(
		&self,
		order_ids: &[u64],
		actor: Actor,
	) -> Result<BulkTransitionReport, BulkValidationError> {
		self.bulk.mass_advance(order_ids, actor).await
	}

	/// Runs the periodic sweep until Ctrl+C.
	pub async fn run(&self) -> Result<(), EngineError> {
		self.initialize().await?;

		let mut interval =
			tokio::time::interval(Duration::from_secs(self.config.sweep.interval_seconds));
		interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

		loop {
			tokio::select! {
				_ = interval.tick() => {
					self.run_sweep().await;
				}

				_ = tokio::signal::ctrl_c() => {
					tracing::info!("Shutdown signal received");
					break;
				}
			}
		}

		self.shutdown().await
	}

	/// Runs one sweep and logs its outcome instead of failing.
	pub async fn run_sweep(&self) -> Option<SweepReport> {
		match self.sweep_expired_orders().await {
			Ok(report) => {
				let pruned = self.state.locks().prune_idle();
				tracing::debug!(pruned, "Pruned idle order locks");
				Some(report)
			},
			Err(e) => {
				tracing::error!(error = %e, "Expired payment sweep failed");
				None
			},
		}
	}

	pub fn event_bus(&self) -> &event_bus::EventBus {
		&self.event_bus
	}

	pub fn config(&self) -> &Config {
		&self.config
	}

	pub fn tenants(&self) -> &Arc<TenantDirectory> {
		&self.tenants
	}
}
