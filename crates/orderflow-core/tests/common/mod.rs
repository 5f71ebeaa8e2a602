#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use orderflow_config::Config;
use orderflow_core::{EngineFactories, ManualClock, OrderEngine, OrderEngineBuilder};
use orderflow_dispatch::implementations::recording::{DispatchRecord, RecordingDispatcher};
use orderflow_payment::implementations::mock::{MockOutcome, MockPayment};
use orderflow_payment::PaymentDetails;
use orderflow_storage::implementations::memory::MemoryStorage;
use orderflow_storage::{StorageError, StorageInterface};
use orderflow_types::{
	Actor, ConfigSchema, DeliveryMethod, NewOrder, Order, OrderStatus, TransitionRequest,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const TENANT: &str = "acme";
pub const CLIENT: u64 = 7;
pub const STAFF: Actor = Actor::User(100);

pub const TO_CONFIRMED: [OrderStatus; 2] = [OrderStatus::Paid, OrderStatus::Confirmed];
pub const TO_READY: [OrderStatus; 4] = [
	OrderStatus::Paid,
	OrderStatus::Confirmed,
	OrderStatus::Preparing,
	OrderStatus::Ready,
];

pub fn start() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub struct Harness {
	pub engine: OrderEngine,
	pub clock: Arc<ManualClock>,
	pub recorder: RecordingDispatcher,
	pub payment: MockPayment,
}

pub fn harness() -> Harness {
	harness_with_payment(MockPayment::new(MockOutcome::Accept))
}

pub fn harness_with_payment(payment: MockPayment) -> Harness {
	build_harness(payment, None)
}

/// Harness whose storage can be told to refuse rewriting stored orders.
pub fn harness_with_storage(storage: GuardedStorage) -> Harness {
	build_harness(MockPayment::new(MockOutcome::Accept), Some(storage))
}

fn build_harness(payment: MockPayment, storage: Option<GuardedStorage>) -> Harness {
	let clock = Arc::new(ManualClock::new(start()));
	let recorder = RecordingDispatcher::new();
	let mut builder = OrderEngineBuilder::new(Config::for_testing())
		.with_clock(clock.clone())
		.with_dispatch(recorder.service())
		.with_payment(Box::new(payment.clone()));
	if let Some(storage) = storage {
		builder = builder.with_storage(Box::new(storage));
	}
	let engine = builder
		.build(EngineFactories::registered())
		.expect("engine builds from testing config");
	engine.tenants().set_cancellation_window(TENANT, 15);

	Harness {
		engine,
		clock,
		recorder,
		payment,
	}
}

/// In-memory storage that fails writes over existing orders while frozen.
#[derive(Clone, Default)]
pub struct GuardedStorage {
	inner: Arc<MemoryStorage>,
	frozen: Arc<AtomicBool>,
}

impl GuardedStorage {
	pub fn freeze_orders(&self) {
		self.frozen.store(true, Ordering::SeqCst);
	}
}

#[async_trait]
impl StorageInterface for GuardedStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.inner.get_bytes(key).await
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		if self.frozen.load(Ordering::SeqCst)
			&& key.starts_with("orders:")
			&& self.inner.exists(key).await?
		{
			return Err(StorageError::Backend(format!("{} is read-only", key)));
		}
		self.inner.set_bytes(key, value).await
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.inner.delete(key).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		self.inner.exists(key).await
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		self.inner.list_keys(prefix).await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		self.inner.config_schema()
	}
}

pub fn card() -> PaymentDetails {
	PaymentDetails {
		provider: "card".into(),
		token: Some("tok_test".into()),
	}
}

impl Harness {
	pub async fn order(&self, method: DeliveryMethod) -> Order {
		self.engine
			.create_order(NewOrder {
				tenant_id: TENANT.into(),
				client_id: CLIENT,
				delivery_method: method,
			})
			.await
			.unwrap()
	}

	/// Creates an order and walks it along `path` as staff.
	pub async fn order_in(&self, method: DeliveryMethod, path: &[OrderStatus]) -> Order {
		let mut order = self.order(method).await;
		for status in path {
			order = self
				.engine
				.transition(TransitionRequest::new(order.id, *status, STAFF))
				.await
				.unwrap();
		}
		order
	}

	/// Creates an order and forces it into `status` with an override.
	pub async fn order_forced(&self, method: DeliveryMethod, status: OrderStatus) -> Order {
		let order = self.order(method).await;
		if status == OrderStatus::PendingPayment {
			return order;
		}
		self.engine
			.transition(
				TransitionRequest::new(order.id, status, Actor::User(1)).with_override("test setup"),
			)
			.await
			.unwrap()
	}

	pub fn advance_minutes(&self, minutes: i64) {
		self.clock.advance(Duration::minutes(minutes));
	}

	pub async fn status_of(&self, order_id: u64) -> OrderStatus {
		self.engine.get_order(order_id).await.unwrap().status
	}

	pub async fn entries_into(&self, order_id: u64, status: OrderStatus) -> usize {
		self.engine
			.order_history(order_id)
			.await
			.unwrap()
			.iter()
			.filter(|t| t.to == status)
			.count()
	}

	pub async fn refunds_for(&self, order_id: u64) -> usize {
		self.recorder
			.records_for(order_id)
			.await
			.iter()
			.filter(|r| matches!(r, DispatchRecord::Refund { .. }))
			.count()
	}
}
