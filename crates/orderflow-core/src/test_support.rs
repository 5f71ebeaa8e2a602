//! Shared fixtures for unit tests.

use crate::clock::ManualClock;
use crate::engine::event_bus::EventBus;
use crate::handlers::SideEffectHandler;
use crate::state::{OrderLocks, OrderStateMachine};
use chrono::{TimeZone, Utc};
use orderflow_dispatch::implementations::recording::RecordingDispatcher;
use orderflow_storage::implementations::memory::MemoryStorage;
use orderflow_storage::StorageService;
use orderflow_types::{Actor, DeliveryMethod, NewOrder, Order, OrderStatus, TransitionRequest};
use std::sync::Arc;
use std::time::Duration;

pub(crate) struct Fixture {
	pub state: Arc<OrderStateMachine>,
	pub clock: Arc<ManualClock>,
	pub recorder: RecordingDispatcher,
	pub event_bus: EventBus,
}

pub(crate) fn fixture() -> Fixture {
	let clock = Arc::new(ManualClock::new(
		Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap(),
	));
	let recorder = RecordingDispatcher::new();
	let event_bus = EventBus::default();
	let effects = Arc::new(SideEffectHandler::new(
		recorder.service(),
		event_bus.clone(),
	));
	let state = Arc::new(OrderStateMachine::new(
		Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
		OrderLocks::new(Duration::from_millis(200)),
		clock.clone(),
		effects,
	));
	Fixture {
		state,
		clock,
		recorder,
		event_bus,
	}
}

impl Fixture {
	pub async fn order(&self, method: DeliveryMethod) -> Order {
		self.state
			.create_order(
				NewOrder {
					tenant_id: "acme".into(),
					client_id: 7,
					delivery_method: method,
				},
				15,
				15,
			)
			.await
			.unwrap()
	}

	/// Creates an order stored without a payment retry deadline.
	pub async fn order_without_retry_expiry(&self, method: DeliveryMethod) -> Order {
		let order = self.order(method).await;
		self.state
			.update_order_with(order.id, |order, _| {
				order.payment_retry_expires_at = None;
				Ok(true)
			})
			.await
			.unwrap()
	}

	/// Creates an order and walks it along `path` as a staff user.
	pub async fn order_in(&self, method: DeliveryMethod, path: &[OrderStatus]) -> Order {
		let mut order = self.order(method).await;
		for status in path {
			order = self
				.state
				.transition(TransitionRequest::new(order.id, *status, Actor::User(100)))
				.await
				.unwrap()
				.0;
		}
		order
	}
}
