//! Order state machine implementation.
//!
//! Every order mutation goes through [`OrderStateMachine::with_order_lock`]:
//! the order is reloaded under its exclusive lock, re-validated against its
//! current status, persisted together with exactly one ledger entry, and only
//! then handed to the side-effect handler.

use super::locks::OrderLocks;
use super::transitions;
use crate::clock::Clock;
use crate::guards::{CancellationDenial, CancellationWindowGuard};
use crate::handlers::SideEffectHandler;
use chrono::{DateTime, Duration, Utc};
use orderflow_storage::{StorageError, StorageService};
use orderflow_types::{
	format_order_number, Actor, DeliveryMethod, NewOrder, Order, OrderStatus, StatusTransition,
	StorageKey, TransitionRequest,
};
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::instrument;

pub(crate) const ORDER_SEQUENCE: &str = "orders";

/// Errors that can occur during order state management.
#[derive(Debug, Error)]
pub enum OrderStateError {
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Illegal transition from {from} to {to}")]
	IllegalTransition { from: OrderStatus, to: OrderStatus },
	#[error("Order not found: {0}")]
	OrderNotFound(u64),
	/// The order lock could not be taken in time. Retry the whole operation.
	#[error("Order {0} is being modified concurrently")]
	ConcurrentModification(u64),
	#[error("Status {status} does not apply to {method} orders")]
	DeliveryMethodMismatch {
		status: OrderStatus,
		method: DeliveryMethod,
	},
	#[error("Cancellation window expired at {deadline}")]
	CancellationWindowExpired { deadline: DateTime<Utc> },
	#[error("Override transitions require a reason")]
	OverrideReasonRequired,
	/// Only the owning client or the system may cancel without an override.
	#[error("{actor} may not cancel a {from} order without an override")]
	CancellationNotPermitted { actor: Actor, from: OrderStatus },
	#[error("{actor} may not override the status of order {order_id}")]
	OverrideNotPermitted { actor: Actor, order_id: u64 },
	/// A caller-supplied precondition no longer holds under the lock.
	#[error("Precondition failed: {0}")]
	PreconditionFailed(String),
}

impl OrderStateError {
	/// Lock timeouts are the only errors worth retrying unchanged.
	pub fn is_retryable(&self) -> bool {
		matches!(self, OrderStateError::ConcurrentModification(_))
	}
}

impl From<CancellationDenial> for OrderStateError {
	fn from(denial: CancellationDenial) -> Self {
		match denial {
			CancellationDenial::StatusNotCancellable(status) => OrderStateError::IllegalTransition {
				from: status,
				to: OrderStatus::Cancelled,
			},
			CancellationDenial::WindowExpired { deadline } => {
				OrderStateError::CancellationWindowExpired { deadline }
			},
		}
	}
}

fn storage_error(e: StorageError) -> OrderStateError {
	OrderStateError::Storage(e.to_string())
}

/// Manages order status transitions and persistence.
pub struct OrderStateMachine {
	storage: Arc<StorageService>,
	locks: OrderLocks,
	clock: Arc<dyn Clock>,
	effects: Arc<SideEffectHandler>,
	/// Serializes order id allocation.
	sequence: Mutex<()>,
}

impl OrderStateMachine {
	pub fn new(
		storage: Arc<StorageService>,
		locks: OrderLocks,
		clock: Arc<dyn Clock>,
		effects: Arc<SideEffectHandler>,
	) -> Self {
		Self {
			storage,
			locks,
			clock,
			effects,
			sequence: Mutex::new(()),
		}
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	pub fn locks(&self) -> &OrderLocks {
		&self.locks
	}

	/// Runs `f` while holding the exclusive lock of `order_id`.
	///
	/// Fails with `ConcurrentModification` when the lock is not acquired
	/// within the configured timeout; `f` is not run in that case.
	pub async fn with_order_lock<T, E, F, Fut>(&self, order_id: u64, f: F) -> Result<T, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<T, E>>,
		E: From<OrderStateError>,
	{
		let _guard = match self.locks.acquire(order_id).await {
			Some(guard) => guard,
			None => {
				tracing::warn!(order_id, "Timed out waiting for order lock");
				return Err(OrderStateError::ConcurrentModification(order_id).into());
			},
		};
		f().await
	}

	/// Creates and stores a new order in `pending_payment`.
	///
	/// Both windows are fixed here, so the order is written exactly once and
	/// the creation event already carries the payment retry deadline.
	pub async fn create_order(
		&self,
		new_order: NewOrder,
		cancellation_window_minutes: u32,
		payment_retry_window_minutes: u32,
	) -> Result<Order, OrderStateError> {
		let id = self.next_order_id().await?;
		let now = self.clock.now();
		let payment_retry_expires_at =
			now + Duration::minutes(i64::from(payment_retry_window_minutes));
		let order = Order {
			id,
			order_number: format_order_number(id, now),
			tenant_id: new_order.tenant_id,
			client_id: new_order.client_id,
			status: OrderStatus::PendingPayment,
			delivery_method: new_order.delivery_method,
			created_at: now,
			updated_at: now,
			cancellation_window_minutes,
			retry_count: 0,
			payment_retry_expires_at: Some(payment_retry_expires_at),
			version: 0,
			paid_at: None,
			confirmed_at: None,
			ready_at: None,
			delivered_at: None,
			completed_at: None,
			cancelled_at: None,
			refunded_at: None,
		};

		self.storage
			.insert(StorageKey::Orders.as_str(), &id.to_string(), &order)
			.await
			.map_err(storage_error)?;

		tracing::info!(
			order_id = id,
			order_number = %order.order_number,
			tenant_id = %order.tenant_id,
			cancellation_window_minutes,
			%payment_retry_expires_at,
			"Order created"
		);
		self.effects.order_created(&order);
		Ok(order)
	}

	async fn next_order_id(&self) -> Result<u64, OrderStateError> {
		let _guard = self.sequence.lock().await;
		let namespace = StorageKey::Sequences.as_str();
		let current: u64 = match self.storage.retrieve(namespace, ORDER_SEQUENCE).await {
			Ok(value) => value,
			Err(StorageError::NotFound) => 0,
			Err(e) => return Err(storage_error(e)),
		};
		let next = current + 1;
		self.storage
			.store(namespace, ORDER_SEQUENCE, &next)
			.await
			.map_err(storage_error)?;
		Ok(next)
	}

	/// Gets an order by id.
	pub async fn get_order(&self, order_id: u64) -> Result<Order, OrderStateError> {
		match self
			.storage
			.retrieve(StorageKey::Orders.as_str(), &order_id.to_string())
			.await
		{
			Ok(order) => Ok(order),
			Err(StorageError::NotFound) => Err(OrderStateError::OrderNotFound(order_id)),
			Err(e) => Err(storage_error(e)),
		}
	}

	/// Returns the ledger of `order_id` ordered by sequence.
	pub async fn order_history(
		&self,
		order_id: u64,
	) -> Result<Vec<StatusTransition>, OrderStateError> {
		// Surface unknown orders instead of an empty history.
		self.get_order(order_id).await?;
		let entries: Vec<(String, StatusTransition)> = self
			.storage
			.list(
				StorageKey::Transitions.as_str(),
				&StorageKey::transition_prefix(order_id),
			)
			.await
			.map_err(storage_error)?;
		Ok(entries.into_iter().map(|(_, entry)| entry).collect())
	}

	/// Transitions an order to the requested status.
	pub async fn transition(
		&self,
		request: TransitionRequest,
	) -> Result<(Order, StatusTransition), OrderStateError> {
		self.transition_guarded(request, |_, _| Ok(())).await
	}

	/// Transitions an order after `guard` accepted its locked state.
	///
	/// The guard sees the order as reloaded under the lock, together with the
	/// commit time, and may adjust non-status fields before the status
	/// changes. Returning an error aborts without writing anything.
	#[instrument(skip_all, fields(order_id = request.order_id, to = %request.target))]
	pub async fn transition_guarded<G>(
		&self,
		request: TransitionRequest,
		guard: G,
	) -> Result<(Order, StatusTransition), OrderStateError>
	where
		G: FnOnce(&mut Order, DateTime<Utc>) -> Result<(), OrderStateError> + Send,
	{
		if request.is_override
			&& request
				.reason
				.as_deref()
				.map_or(true, |reason| reason.trim().is_empty())
		{
			return Err(OrderStateError::OverrideReasonRequired);
		}

		let order_id = request.order_id;
		let (order, transition) = self
			.with_order_lock(order_id, || async move {
				let mut order = self.get_order(order_id).await?;
				let now = self.clock.now();
				guard(&mut order, now)?;
				let transition = self.stage_transition(&mut order, &request, now)?;
				self.persist(&order, Some(&transition)).await?;
				Ok::<_, OrderStateError>((order, transition))
			})
			.await?;

		tracing::info!(
			order_id,
			from = %transition.from,
			to = %transition.to,
			actor = %transition.actor,
			is_override = transition.is_override,
			"Order status changed"
		);
		self.after_commit(&order, &transition).await;
		Ok((order, transition))
	}

	/// Validates `request` against `order` and applies it in memory.
	///
	/// Must be called under the order lock with the freshly loaded order.
	pub(crate) fn stage_transition(
		&self,
		order: &mut Order,
		request: &TransitionRequest,
		now: DateTime<Utc>,
	) -> Result<StatusTransition, OrderStateError> {
		let from = order.status;
		let to = request.target;

		let allowed = if request.is_override {
			transitions::override_allowed(from, to)
		} else {
			transitions::is_adjacent(from, to)
		};
		if !allowed {
			return Err(OrderStateError::IllegalTransition { from, to });
		}

		if let Some(method) = to.required_delivery_method() {
			if method != order.delivery_method {
				return Err(OrderStateError::DeliveryMethodMismatch {
					status: to,
					method: order.delivery_method,
				});
			}
		}

		let own_client = request.actor == Actor::User(order.client_id);
		if request.is_override {
			// Overrides are for staff; neither the client nor the engine itself.
			if own_client || request.actor == Actor::System {
				return Err(OrderStateError::OverrideNotPermitted {
					actor: request.actor,
					order_id: order.id,
				});
			}
		} else if to == OrderStatus::Cancelled {
			match request.actor {
				Actor::System => {},
				Actor::User(_) if own_client => CancellationWindowGuard::check(order, now)?,
				actor => return Err(OrderStateError::CancellationNotPermitted { actor, from }),
			}
		}

		order.apply_status(to, now);
		order.version += 1;

		Ok(StatusTransition {
			order_id: order.id,
			sequence: order.version,
			from,
			to,
			actor: request.actor,
			is_override: request.is_override,
			reason: request.reason.clone(),
			at: now,
		})
	}

	/// Writes the ledger entry, then the order.
	///
	/// The ledger key is derived from the new version, so a second writer of
	/// the same version is rejected. If the order write fails the ledger entry
	/// is removed again.
	pub(crate) async fn persist(
		&self,
		order: &Order,
		transition: Option<&StatusTransition>,
	) -> Result<(), OrderStateError> {
		let ledger_id = transition.map(|t| StorageKey::transition_id(t.order_id, t.sequence));
		if let (Some(id), Some(transition)) = (&ledger_id, transition) {
			self.storage
				.insert(StorageKey::Transitions.as_str(), id, transition)
				.await
				.map_err(storage_error)?;
		}

		if let Err(e) = self
			.storage
			.update(StorageKey::Orders.as_str(), &order.id.to_string(), order)
			.await
		{
			if let Some(id) = &ledger_id {
				if let Err(cleanup) = self
					.storage
					.remove(StorageKey::Transitions.as_str(), id)
					.await
				{
					tracing::error!(
						order_id = order.id,
						ledger_id = %id,
						error = %cleanup,
						"Failed to remove orphaned ledger entry"
					);
				}
			}
			return Err(storage_error(e));
		}
		Ok(())
	}

	/// Runs side effects for a committed transition.
	pub(crate) async fn after_commit(&self, order: &Order, transition: &StatusTransition) {
		self.effects.status_changed(order, transition).await;
	}

	/// Updates non-status fields of an order under its lock.
	///
	/// `updater` returns whether it changed anything; unchanged orders are not
	/// written. No ledger entry is created.
	pub async fn update_order_with<F>(
		&self,
		order_id: u64,
		updater: F,
	) -> Result<Order, OrderStateError>
	where
		F: FnOnce(&mut Order, DateTime<Utc>) -> Result<bool, OrderStateError>,
	{
		self.with_order_lock(order_id, || async move {
			let mut order = self.get_order(order_id).await?;
			let now = self.clock.now();
			if updater(&mut order, now)? {
				order.updated_at = now;
				self.persist(&order, None).await?;
			}
			Ok::<_, OrderStateError>(order)
		})
		.await
	}
}
