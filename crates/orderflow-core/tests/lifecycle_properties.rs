mod common;

use common::*;
use orderflow_core::{OrderStateError, RetryOutcome};
use orderflow_dispatch::implementations::recording::DispatchRecord;
use orderflow_payment::implementations::mock::{MockOutcome, MockPayment};
use orderflow_types::{Actor, DeliveryMethod, OrderStatus, TransitionRequest};
use OrderStatus::*;

/// Regular business edges, written out independently of the engine's table.
const ALLOWED: &[(OrderStatus, OrderStatus)] = &[
	(PendingPayment, Paid),
	(PendingPayment, PaymentFailed),
	(PendingPayment, Cancelled),
	(PaymentFailed, PendingPayment),
	(PaymentFailed, Paid),
	(PaymentFailed, Cancelled),
	(Paid, Confirmed),
	(Paid, Cancelled),
	(Confirmed, Preparing),
	(Confirmed, Cancelled),
	(Preparing, Ready),
	(Ready, OutForDelivery),
	(Ready, ReadyForPickup),
	(OutForDelivery, Delivered),
	(ReadyForPickup, PickedUp),
	(Delivered, Completed),
	(PickedUp, Completed),
];

fn method_for(status: OrderStatus) -> DeliveryMethod {
	status.required_delivery_method().unwrap_or(DeliveryMethod::Delivery)
}

#[tokio::test]
async fn test_illegal_pairs_are_rejected_without_change() {
	let h = harness();

	for from in OrderStatus::ALL {
		let order = h.order_forced(method_for(from), from).await;
		let history_len = h.engine.order_history(order.id).await.unwrap().len();

		for to in OrderStatus::ALL {
			if ALLOWED.contains(&(from, to)) {
				continue;
			}
			let result = h
				.engine
				.transition(TransitionRequest::new(order.id, to, STAFF))
				.await;
			let illegal = matches!(
				result,
				Err(OrderStateError::IllegalTransition { from: f, to: t }) if f == from && t == to
			);
			assert!(illegal, "{} -> {} should be illegal, got {:?}", from, to, result);
			assert_eq!(h.status_of(order.id).await, from);
		}

		assert_eq!(
			h.engine.order_history(order.id).await.unwrap().len(),
			history_len,
			"rejected transitions from {} left ledger entries",
			from
		);
	}
}

#[tokio::test]
async fn test_ready_branch_depends_on_delivery_method() {
	let h = harness();
	let delivery = h.order_in(DeliveryMethod::Delivery, &TO_READY).await;

	let result = h
		.engine
		.transition(TransitionRequest::new(delivery.id, ReadyForPickup, STAFF))
		.await;
	assert!(matches!(
		result,
		Err(OrderStateError::DeliveryMethodMismatch { .. })
	));
	assert_eq!(h.status_of(delivery.id).await, Ready);

	h.engine
		.transition(TransitionRequest::new(delivery.id, OutForDelivery, STAFF))
		.await
		.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_duplicate_requests_commit_once() {
	let h = harness();
	let order = h.order_in(DeliveryMethod::Pickup, &[Paid]).await;
	let request = TransitionRequest::new(order.id, Confirmed, STAFF);

	let (first, second) = tokio::join!(
		h.engine.transition(request.clone()),
		h.engine.transition(request.clone()),
	);

	let results = [first, second];
	assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
	assert!(results.iter().any(|r| matches!(
		r,
		Err(OrderStateError::IllegalTransition {
			from: Confirmed,
			to: Confirmed
		})
	)));
	assert_eq!(h.entries_into(order.id, Confirmed).await, 1);

	let notifications = h
		.recorder
		.records_for(order.id)
		.await
		.into_iter()
		.filter(|r| matches!(r, DispatchRecord::Notification { to: Confirmed, .. }))
		.count();
	assert_eq!(notifications, 1);
}

#[tokio::test]
async fn test_tenant_window_change_does_not_touch_existing_orders() {
	let h = harness();
	let early = h.order_in(DeliveryMethod::Delivery, &[Paid]).await;
	assert_eq!(early.cancellation_window_minutes, 15);

	h.engine.tenants().set_cancellation_window(TENANT, 60);
	let late = h.order_in(DeliveryMethod::Delivery, &[Paid]).await;
	assert_eq!(late.cancellation_window_minutes, 60);

	h.advance_minutes(20);
	assert!(!h.engine.can_cancel(early.id).await.unwrap());
	assert!(h.engine.can_cancel(late.id).await.unwrap());
	assert!(matches!(
		h.engine.cancel_by_client(early.id, CLIENT).await,
		Err(OrderStateError::CancellationWindowExpired { .. })
	));

	// Shrinking the window later does not shorten it either.
	h.engine.tenants().set_cancellation_window(TENANT, 1);
	let cancelled = h.engine.cancel_by_client(late.id, CLIENT).await.unwrap();
	assert_eq!(cancelled.status, Cancelled);
	assert_eq!(
		h.engine.get_order(early.id).await.unwrap().cancellation_window_minutes,
		15
	);
}

#[tokio::test]
async fn test_retries_are_bounded() {
	let h = harness_with_payment(MockPayment::new(MockOutcome::Decline));
	let order = h.order(DeliveryMethod::Delivery).await;
	let max = h.engine.config().payment_retry.max_retries;

	for attempt in 1..=max {
		assert!(h.engine.can_retry(order.id).await.unwrap());
		let outcome = h
			.engine
			.retry_payment(order.id, Actor::User(CLIENT), &card())
			.await
			.unwrap();
		assert_eq!(outcome.order().retry_count, attempt);
		if attempt < max {
			assert!(matches!(outcome, RetryOutcome::Failed { .. }));
		} else {
			assert!(matches!(outcome, RetryOutcome::Cancelled { .. }));
		}
	}

	let order = h.engine.get_order(order.id).await.unwrap();
	assert_eq!(order.status, Cancelled);
	assert_eq!(order.retry_count, max);
	assert!(!h.engine.can_retry(order.id).await.unwrap());
	assert!(h
		.engine
		.retry_payment(order.id, Actor::User(CLIENT), &card())
		.await
		.is_err());
	assert_eq!(h.payment.attempts(), max as usize);
}

#[tokio::test]
async fn test_bulk_failures_stay_isolated() {
	let h = harness();
	let mut valid = Vec::new();
	for _ in 0..4 {
		valid.push(h.order_in(DeliveryMethod::Delivery, &TO_CONFIRMED).await.id);
	}
	let only_paid = h.order_in(DeliveryMethod::Delivery, &[Paid]).await.id;
	let cancelled = h.order_in(DeliveryMethod::Delivery, &[Paid]).await.id;
	h.engine.cancel_by_client(cancelled, CLIENT).await.unwrap();

	let mut ids = valid.clone();
	ids.insert(1, only_paid);
	ids.insert(3, cancelled);

	let report = h.engine.mass_update_status(&ids, Preparing, STAFF).await;
	assert_eq!(report.total, 6);
	assert_eq!(report.success_count, 4);
	assert_eq!(report.failure_count, 2);
	assert_eq!(
		report.failures.iter().map(|f| f.order_id).collect::<Vec<_>>(),
		vec![only_paid, cancelled]
	);

	for id in valid {
		assert_eq!(h.status_of(id).await, Preparing);
	}
	assert_eq!(h.status_of(only_paid).await, Paid);
	assert_eq!(h.status_of(cancelled).await, Cancelled);
}

#[tokio::test]
async fn test_terminal_orders_only_accept_refund_override() {
	let h = harness();
	let completed = h
		.order_in(
			DeliveryMethod::Pickup,
			&[Paid, Confirmed, Preparing, Ready, ReadyForPickup, PickedUp, Completed],
		)
		.await;
	let paid = h.order_in(DeliveryMethod::Delivery, &[Paid]).await;
	let cancelled = h.engine.cancel_by_client(paid.id, CLIENT).await.unwrap();
	let refunded = h.order_forced(DeliveryMethod::Delivery, Refunded).await;

	for order in [&completed, &cancelled, &refunded] {
		for to in OrderStatus::ALL {
			let plain = h
				.engine
				.transition(TransitionRequest::new(order.id, to, STAFF))
				.await;
			assert!(plain.is_err(), "{} -> {} must fail", order.status, to);

			if to != Refunded {
				let forced = h
					.engine
					.transition(
						TransitionRequest::new(order.id, to, Actor::User(1)).with_override("reopen"),
					)
					.await;
				assert!(forced.is_err(), "override {} -> {} must fail", order.status, to);
			}
		}
	}

	let missing_reason = TransitionRequest {
		is_override: true,
		..TransitionRequest::new(completed.id, Refunded, Actor::User(1))
	};
	assert!(matches!(
		h.engine.transition(missing_reason).await,
		Err(OrderStateError::OverrideReasonRequired)
	));

	for order in [&completed, &cancelled] {
		let refunded = h
			.engine
			.transition(
				TransitionRequest::new(order.id, Refunded, Actor::User(1))
					.with_override("customer complaint"),
			)
			.await
			.unwrap();
		assert_eq!(refunded.status, Refunded);
		assert!(refunded.refunded_at.is_some());

		let last = h.engine.order_history(order.id).await.unwrap();
		let last = last.last().unwrap();
		assert!(last.is_override);
		assert_eq!(last.reason.as_deref(), Some("customer complaint"));
	}

	assert!(h
		.engine
		.transition(
			TransitionRequest::new(refunded.id, Refunded, Actor::User(1)).with_override("again"),
		)
		.await
		.is_err());
}
