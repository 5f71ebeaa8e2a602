//! Payment retry window and expired-payment sweep.
//!
//! An unpaid order may retry its payment a bounded number of times inside a
//! window anchored to its creation time. When the attempts run out the order
//! is cancelled immediately; when the window elapses the periodic sweep
//! cancels it.

use crate::engine::event_bus::EventBus;
use crate::state::{OrderStateError, OrderStateMachine};
use chrono::{DateTime, Duration, Utc};
use orderflow_config::PaymentRetryConfig;
use orderflow_payment::{PaymentDetails, PaymentReceipt, PaymentService};
use orderflow_storage::QueryFilter;
use orderflow_types::{
	Actor, BatchEvent, Order, OrderStatus, OrderflowEvent, StorageKey, TransitionRequest,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

/// Reason recorded when the last allowed attempt fails.
pub const MAX_RETRIES_REASON: &str = "maximum retry attempts reached";
/// Reason recorded when the sweep cancels an expired order.
pub const RETRY_WINDOW_EXPIRED_REASON: &str = "payment retry window expired";

/// Why a payment retry is not allowed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RetryRejection {
	#[error("Maximum retry attempts ({max}) reached")]
	AttemptsExhausted { max: u32 },
	#[error("Payment retry window expired at {deadline}")]
	WindowExpired { deadline: DateTime<Utc> },
	#[error("Orders in status {0} cannot retry payment")]
	NotRetriable(OrderStatus),
}

/// Errors that can occur while retrying payments or sweeping.
#[derive(Debug, Error)]
pub enum RetryError {
	#[error(transparent)]
	Rejected(#[from] RetryRejection),
	#[error(transparent)]
	State(#[from] OrderStateError),
	#[error("Storage error: {0}")]
	Storage(String),
}

/// Result of a retry attempt that was allowed to run.
#[derive(Debug, Clone)]
pub enum RetryOutcome {
	/// The gateway accepted the payment initiation.
	Initiated {
		order: Order,
		receipt: PaymentReceipt,
	},
	/// Initiation failed; the order is back in `payment_failed`.
	Failed {
		order: Order,
		remaining_attempts: u32,
		error: String,
	},
	/// Initiation failed on the last allowed attempt; the order was cancelled.
	Cancelled { order: Order, error: String },
}

impl RetryOutcome {
	pub fn order(&self) -> &Order {
		match self {
			RetryOutcome::Initiated { order, .. }
			| RetryOutcome::Failed { order, .. }
			| RetryOutcome::Cancelled { order, .. } => order,
		}
	}
}

/// Counters of one sweep run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
	/// Orders still waiting on a payment.
	pub examined: usize,
	/// Orders whose retry window had elapsed.
	pub expired: usize,
	pub cancelled: usize,
	/// Orders that moved on or were cancelled elsewhere first.
	pub skipped: usize,
	pub failed: usize,
}

fn require_awaiting_payment(order: &mut Order, _now: DateTime<Utc>) -> Result<(), OrderStateError> {
	if order.status.is_awaiting_payment() {
		Ok(())
	} else {
		Err(OrderStateError::IllegalTransition {
			from: order.status,
			to: OrderStatus::Cancelled,
		})
	}
}

pub struct PaymentRetryTimer {
	state: Arc<OrderStateMachine>,
	payment: Arc<PaymentService>,
	event_bus: EventBus,
	max_retries: u32,
	window_minutes: u32,
}

impl PaymentRetryTimer {
	pub fn new(
		state: Arc<OrderStateMachine>,
		payment: Arc<PaymentService>,
		event_bus: EventBus,
		config: &PaymentRetryConfig,
	) -> Self {
		Self {
			state,
			payment,
			event_bus,
			max_retries: config.max_retries,
			window_minutes: config.window_minutes,
		}
	}

	pub fn max_retries(&self) -> u32 {
		self.max_retries
	}

	pub fn window_minutes(&self) -> u32 {
		self.window_minutes
	}

	/// Sets the retry deadline of an order that has none.
	///
	/// Orders get their deadline at creation, so this only changes records
	/// stored without one; otherwise nothing is written.
	pub async fn init_retry_window(&self, order_id: u64) -> Result<Order, OrderStateError> {
		let window = self.window_minutes;
		self.state
			.update_order_with(order_id, move |order, _| {
				if order.payment_retry_expires_at.is_some() {
					return Ok(false);
				}
				order.payment_retry_expires_at =
					Some(order.created_at + Duration::minutes(i64::from(window)));
				Ok(true)
			})
			.await
	}

	/// Explains why `order` may not retry its payment at `now`, if it may not.
	pub fn check_retry(&self, order: &Order, now: DateTime<Utc>) -> Result<(), RetryRejection> {
		if !order.status.is_awaiting_payment() {
			return Err(RetryRejection::NotRetriable(order.status));
		}
		if order.retry_count >= self.max_retries {
			return Err(RetryRejection::AttemptsExhausted {
				max: self.max_retries,
			});
		}
		let (deadline, fallback) = order.payment_retry_deadline(self.window_minutes);
		if fallback {
			tracing::warn!(
				order_id = order.id,
				%deadline,
				"Retry expiry never initialised, using creation-anchored fallback"
			);
		}
		if now > deadline {
			return Err(RetryRejection::WindowExpired { deadline });
		}
		Ok(())
	}

	/// Unlocked check, suitable for display only.
	pub fn can_retry(&self, order: &Order) -> bool {
		self.check_retry(order, self.state.clock().now()).is_ok()
	}

	/// Counts a retry attempt and asks the gateway to charge again.
	///
	/// The attempt is recorded under the order lock; the gateway call happens
	/// after the lock is released.
	#[instrument(skip_all, fields(order_id = order_id))]
	pub async fn retry_payment(
		&self,
		order_id: u64,
		actor: Actor,
		details: &PaymentDetails,
	) -> Result<RetryOutcome, RetryError> {
		let state = &self.state;
		let (order, transition) = state
			.with_order_lock(order_id, || async move {
				let mut order = state.get_order(order_id).await?;
				let now = state.clock().now();
				self.check_retry(&order, now)?;

				order.retry_count += 1;
				let transition = match order.status {
					OrderStatus::PaymentFailed => Some(state.stage_transition(
						&mut order,
						&TransitionRequest::new(order_id, OrderStatus::PendingPayment, actor),
						now,
					)?),
					_ => {
						order.updated_at = now;
						None
					},
				};
				state.persist(&order, transition.as_ref()).await?;
				Ok::<_, RetryError>((order, transition))
			})
			.await?;

		if let Some(transition) = &transition {
			state.after_commit(&order, transition).await;
		}
		tracing::info!(
			order_id,
			retry_count = order.retry_count,
			max_retries = self.max_retries,
			"Payment retry started"
		);

		let error = match self.payment.initiate_payment(&order, details).await {
			Ok(receipt) => return Ok(RetryOutcome::Initiated { order, receipt }),
			Err(e) => e.to_string(),
		};

		if order.retry_count >= self.max_retries {
			let (order, _) = state
				.transition_guarded(
					TransitionRequest::new(order_id, OrderStatus::Cancelled, Actor::System)
						.with_reason(MAX_RETRIES_REASON),
					require_awaiting_payment,
				)
				.await?;
			tracing::warn!(order_id, %error, "Payment retries exhausted, order cancelled");
			return Ok(RetryOutcome::Cancelled { order, error });
		}

		let (order, _) = state
			.transition(
				TransitionRequest::new(order_id, OrderStatus::PaymentFailed, Actor::System)
					.with_reason(error.clone()),
			)
			.await?;
		Ok(RetryOutcome::Failed {
			remaining_attempts: self.max_retries.saturating_sub(order.retry_count),
			order,
			error,
		})
	}

	/// Cancels every unpaid order whose retry window has elapsed.
	///
	/// Safe to run concurrently with itself and with user actions: each
	/// cancellation re-checks status and deadline under the order lock.
	#[instrument(skip_all)]
	pub async fn sweep_expired_orders(&self) -> Result<SweepReport, RetryError> {
		let candidates = self.sweep_candidates().await?;
		Ok(self.cancel_expired(candidates).await)
	}

	/// Loads the orders still awaiting payment.
	///
	/// The result is a snapshot; any of these orders may be paid before
	/// [`Self::cancel_expired`] reaches it.
	pub(crate) async fn sweep_candidates(&self) -> Result<Vec<Order>, RetryError> {
		let awaiting = [OrderStatus::PendingPayment, OrderStatus::PaymentFailed]
			.iter()
			.map(|status| serde_json::Value::String(status.as_str().to_string()))
			.collect();
		let candidates: Vec<(String, Order)> = self
			.state
			.storage()
			.query(
				StorageKey::Orders.as_str(),
				QueryFilter::In("status".to_string(), awaiting),
			)
			.await
			.map_err(|e| RetryError::Storage(e.to_string()))?;
		Ok(candidates.into_iter().map(|(_, order)| order).collect())
	}

	/// Cancels the expired orders among `candidates` and reports the sweep.
	pub(crate) async fn cancel_expired(&self, candidates: Vec<Order>) -> SweepReport {
		let now = self.state.clock().now();
		let window = self.window_minutes;
		let mut report = SweepReport {
			examined: candidates.len(),
			..SweepReport::default()
		};

		for order in candidates {
			let (deadline, fallback) = order.payment_retry_deadline(window);
			if now <= deadline {
				continue;
			}
			report.expired += 1;
			if fallback {
				tracing::warn!(
					order_id = order.id,
					%deadline,
					"Sweeping order without retry expiry, using creation-anchored fallback"
				);
			}

			let request = TransitionRequest::new(order.id, OrderStatus::Cancelled, Actor::System)
				.with_reason(RETRY_WINDOW_EXPIRED_REASON);
			let result = self
				.state
				.transition_guarded(request, move |order, now| {
					require_awaiting_payment(order, now)?;
					let (deadline, _) = order.payment_retry_deadline(window);
					if now <= deadline {
						return Err(OrderStateError::PreconditionFailed(format!(
							"payment retry window open until {}",
							deadline
						)));
					}
					Ok(())
				})
				.await;

			match result {
				Ok(_) => report.cancelled += 1,
				Err(OrderStateError::IllegalTransition { .. })
				| Err(OrderStateError::PreconditionFailed(_)) => report.skipped += 1,
				Err(e) => {
					report.failed += 1;
					tracing::warn!(order_id = order.id, error = %e, "Failed to cancel expired order");
				},
			}
		}

		tracing::info!(
			examined = report.examined,
			expired = report.expired,
			cancelled = report.cancelled,
			skipped = report.skipped,
			failed = report.failed,
			"Expired payment sweep finished"
		);
		self.event_bus
			.publish(OrderflowEvent::Batch(BatchEvent::SweepCompleted {
				examined: report.examined,
				cancelled: report.cancelled,
			}));
		report
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{fixture, Fixture};
	use orderflow_dispatch::implementations::recording::DispatchRecord;
	use orderflow_payment::implementations::mock::{MockOutcome, MockPayment};
	use orderflow_types::DeliveryMethod;

	fn timer(fixture: &Fixture, gateway: MockPayment) -> PaymentRetryTimer {
		PaymentRetryTimer::new(
			fixture.state.clone(),
			Arc::new(PaymentService::new(Box::new(gateway))),
			fixture.event_bus.clone(),
			&PaymentRetryConfig {
				max_retries: 3,
				window_minutes: 15,
			},
		)
	}

	fn card() -> PaymentDetails {
		PaymentDetails {
			provider: "card".into(),
			token: Some("tok_1".into()),
		}
	}

	#[tokio::test]
	async fn test_init_retry_window_is_set_once() {
		let fixture = fixture();
		let timer = timer(&fixture, MockPayment::new(MockOutcome::Accept));

		let created = fixture.order(DeliveryMethod::Delivery).await;
		let unchanged = timer.init_retry_window(created.id).await.unwrap();
		assert_eq!(unchanged, created);

		let legacy = fixture
			.order_without_retry_expiry(DeliveryMethod::Delivery)
			.await;
		let first = timer.init_retry_window(legacy.id).await.unwrap();
		let expected = legacy.created_at + Duration::minutes(15);
		assert_eq!(first.payment_retry_expires_at, Some(expected));

		fixture.clock.advance(Duration::minutes(3));
		let second = timer.init_retry_window(legacy.id).await.unwrap();
		assert_eq!(second.payment_retry_expires_at, Some(expected));
		assert_eq!(second.updated_at, first.updated_at);
	}

	#[tokio::test]
	async fn test_rejection_reasons_are_distinct() {
		let fixture = fixture();
		let timer = timer(&fixture, MockPayment::new(MockOutcome::Accept));
		let mut order = fixture.order(DeliveryMethod::Delivery).await;
		let now = order.created_at;

		order.retry_count = 3;
		assert_eq!(
			timer.check_retry(&order, now),
			Err(RetryRejection::AttemptsExhausted { max: 3 })
		);

		order.retry_count = 0;
		let late = now + Duration::minutes(16);
		assert_eq!(
			timer.check_retry(&order, late),
			Err(RetryRejection::WindowExpired {
				deadline: now + Duration::minutes(15)
			})
		);

		order.status = OrderStatus::Paid;
		assert_eq!(
			timer.check_retry(&order, now),
			Err(RetryRejection::NotRetriable(OrderStatus::Paid))
		);
	}

	#[tokio::test]
	async fn test_retry_bound_cancels_order() {
		let fixture = fixture();
		let gateway = MockPayment::new(MockOutcome::Decline);
		let timer = timer(&fixture, gateway.clone());
		let order = fixture.order(DeliveryMethod::Pickup).await;

		for remaining in [2, 1] {
			match timer
				.retry_payment(order.id, Actor::User(order.client_id), &card())
				.await
				.unwrap()
			{
				RetryOutcome::Failed {
					order,
					remaining_attempts,
					..
				} => {
					assert_eq!(remaining_attempts, remaining);
					assert_eq!(order.status, OrderStatus::PaymentFailed);
				},
				other => panic!("expected failed attempt, got {:?}", other),
			}
		}

		let outcome = timer
			.retry_payment(order.id, Actor::User(order.client_id), &card())
			.await
			.unwrap();
		let cancelled = match outcome {
			RetryOutcome::Cancelled { order, .. } => order,
			other => panic!("expected cancellation, got {:?}", other),
		};
		assert_eq!(cancelled.status, OrderStatus::Cancelled);
		assert_eq!(cancelled.retry_count, 3);
		assert!(!timer.can_retry(&cancelled));
		assert_eq!(gateway.attempts(), 3);

		let history = fixture.state.order_history(order.id).await.unwrap();
		let last = history.last().unwrap();
		assert_eq!(last.actor, Actor::System);
		assert_eq!(last.reason.as_deref(), Some(MAX_RETRIES_REASON));

		let rejected = timer
			.retry_payment(order.id, Actor::User(order.client_id), &card())
			.await;
		assert!(matches!(
			rejected,
			Err(RetryError::Rejected(RetryRejection::NotRetriable(
				OrderStatus::Cancelled
			)))
		));
	}

	#[tokio::test]
	async fn test_successful_retry_keeps_order_pending() {
		let fixture = fixture();
		let timer = timer(&fixture, MockPayment::new(MockOutcome::Accept));
		let order = fixture.order(DeliveryMethod::Delivery).await;

		let outcome = timer
			.retry_payment(order.id, Actor::User(order.client_id), &card())
			.await
			.unwrap();
		assert!(matches!(outcome, RetryOutcome::Initiated { .. }));
		assert_eq!(outcome.order().status, OrderStatus::PendingPayment);
		assert_eq!(outcome.order().retry_count, 1);
	}

	#[tokio::test]
	async fn test_sweep_cancels_only_expired_orders() {
		let fixture = fixture();
		let timer = timer(&fixture, MockPayment::new(MockOutcome::Accept));

		let stale = fixture.order(DeliveryMethod::Delivery).await;
		// Swept through the creation-anchored fallback deadline.
		let legacy = fixture
			.order_without_retry_expiry(DeliveryMethod::Delivery)
			.await;

		fixture.clock.advance(Duration::minutes(10));
		let fresh = fixture.order(DeliveryMethod::Delivery).await;
		let paid = fixture
			.order_in(DeliveryMethod::Pickup, &[OrderStatus::Paid])
			.await;

		fixture.clock.advance(Duration::minutes(6));
		let report = timer.sweep_expired_orders().await.unwrap();
		assert_eq!(report.examined, 3);
		assert_eq!(report.expired, 2);
		assert_eq!(report.cancelled, 2);

		for (id, status) in [
			(stale.id, OrderStatus::Cancelled),
			(legacy.id, OrderStatus::Cancelled),
			(fresh.id, OrderStatus::PendingPayment),
			(paid.id, OrderStatus::Paid),
		] {
			assert_eq!(fixture.state.get_order(id).await.unwrap().status, status);
		}

		let again = timer.sweep_expired_orders().await.unwrap();
		assert_eq!(again.cancelled, 0);
		assert_eq!(fixture.state.order_history(stale.id).await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_sweep_skips_order_paid_after_query() {
		let fixture = fixture();
		let timer = timer(&fixture, MockPayment::new(MockOutcome::Accept));
		let late_payer = fixture.order(DeliveryMethod::Delivery).await;
		let abandoned = fixture.order(DeliveryMethod::Delivery).await;
		fixture.clock.advance(Duration::minutes(16));

		let candidates = timer.sweep_candidates().await.unwrap();
		assert_eq!(candidates.len(), 2);

		// The payment lands between the query and the cancellation.
		fixture
			.state
			.transition(TransitionRequest::new(
				late_payer.id,
				OrderStatus::Paid,
				Actor::System,
			))
			.await
			.unwrap();

		let report = timer.cancel_expired(candidates).await;
		assert_eq!(report.examined, 2);
		assert_eq!(report.expired, 2);
		assert_eq!(report.cancelled, 1);
		assert_eq!(report.skipped, 1);
		assert_eq!(report.failed, 0);

		let paid = fixture.state.get_order(late_payer.id).await.unwrap();
		assert_eq!(paid.status, OrderStatus::Paid);
		assert!(paid.cancelled_at.is_none());
		let history = fixture.state.order_history(late_payer.id).await.unwrap();
		assert!(history.iter().all(|t| t.to != OrderStatus::Cancelled));
		assert!(fixture
			.recorder
			.records_for(late_payer.id)
			.await
			.iter()
			.all(|r| !matches!(r, DispatchRecord::Refund { .. })));

		assert_eq!(
			fixture.state.get_order(abandoned.id).await.unwrap().status,
			OrderStatus::Cancelled
		);
	}
}
