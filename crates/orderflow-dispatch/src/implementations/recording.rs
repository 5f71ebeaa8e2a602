//! In-memory dispatcher that records every side effect.
//!
//! Clones share the same record list, so a test can keep one handle and hand
//! another to the engine. Individual side-effect kinds can be made to fail to
//! exercise the engine's isolation of dispatch errors.

use crate::{
	AuditEntry, AuditInterface, DispatchError, DispatchFactory, DispatchRegistry, DispatchService,
	NotificationInterface, PayoutInterface, RefundInterface,
};
use async_trait::async_trait;
use orderflow_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Order, OrderStatus, Schema,
	StatusTransition, ValidationError,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Kind of side effect, used to select which ones fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DispatchKind {
	Notification,
	Refund,
	Commission,
	WithdrawableTimer,
	Audit,
}

impl DispatchKind {
	fn parse(value: &str) -> Option<Self> {
		match value {
			"notification" => Some(Self::Notification),
			"refund" => Some(Self::Refund),
			"commission" => Some(Self::Commission),
			"withdrawable_timer" => Some(Self::WithdrawableTimer),
			"audit" => Some(Self::Audit),
			_ => None,
		}
	}
}

/// A side effect observed by the recorder.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchRecord {
	Notification {
		order_id: u64,
		from: OrderStatus,
		to: OrderStatus,
	},
	Refund {
		order_id: u64,
	},
	Commission {
		order_id: u64,
	},
	WithdrawableTimer {
		order_id: u64,
	},
	Audit(AuditEntry),
}

impl DispatchRecord {
	pub fn order_id(&self) -> u64 {
		match self {
			Self::Notification { order_id, .. }
			| Self::Refund { order_id }
			| Self::Commission { order_id }
			| Self::WithdrawableTimer { order_id } => *order_id,
			Self::Audit(entry) => entry.order_id,
		}
	}
}

#[derive(Clone, Default)]
pub struct RecordingDispatcher {
	records: Arc<Mutex<Vec<DispatchRecord>>>,
	failing: Arc<HashSet<DispatchKind>>,
}

impl RecordingDispatcher {
	pub fn new() -> Self {
		Self::default()
	}

	/// Recorder whose side effects of the given kinds always fail.
	///
	/// Failing calls are not recorded.
	pub fn failing(kinds: impl IntoIterator<Item = DispatchKind>) -> Self {
		Self {
			records: Arc::default(),
			failing: Arc::new(kinds.into_iter().collect()),
		}
	}

	/// Wraps this recorder into a [`DispatchService`] sharing its records.
	pub fn service(&self) -> DispatchService {
		DispatchService::from_backend(Arc::new(self.clone()), Arc::new(RecordingDispatcherSchema))
	}

	pub async fn records(&self) -> Vec<DispatchRecord> {
		self.records.lock().await.clone()
	}

	/// Records concerning one order, in dispatch order.
	pub async fn records_for(&self, order_id: u64) -> Vec<DispatchRecord> {
		self.records
			.lock()
			.await
			.iter()
			.filter(|r| r.order_id() == order_id)
			.cloned()
			.collect()
	}

	async fn push(&self, kind: DispatchKind, record: DispatchRecord) -> Result<(), DispatchError> {
		if self.failing.contains(&kind) {
			let message = format!("injected {:?} failure for order {}", kind, record.order_id());
			return Err(match kind {
				DispatchKind::Notification => DispatchError::Notification(message),
				DispatchKind::Refund => DispatchError::Refund(message),
				DispatchKind::Commission | DispatchKind::WithdrawableTimer => {
					DispatchError::Payout(message)
				},
				DispatchKind::Audit => DispatchError::Audit(message),
			});
		}
		self.records.lock().await.push(record);
		Ok(())
	}
}

#[async_trait]
impl NotificationInterface for RecordingDispatcher {
	async fn notify_status_change(
		&self,
		order: &Order,
		transition: &StatusTransition,
	) -> Result<(), DispatchError> {
		self.push(
			DispatchKind::Notification,
			DispatchRecord::Notification {
				order_id: order.id,
				from: transition.from,
				to: transition.to,
			},
		)
		.await
	}
}

#[async_trait]
impl RefundInterface for RecordingDispatcher {
	async fn credit_cancellation_refund(&self, order: &Order) -> Result<(), DispatchError> {
		self.push(
			DispatchKind::Refund,
			DispatchRecord::Refund { order_id: order.id },
		)
		.await
	}
}

#[async_trait]
impl PayoutInterface for RecordingDispatcher {
	async fn capture_commission(&self, order: &Order) -> Result<(), DispatchError> {
		self.push(
			DispatchKind::Commission,
			DispatchRecord::Commission { order_id: order.id },
		)
		.await
	}

	async fn start_withdrawable_timer(&self, order: &Order) -> Result<(), DispatchError> {
		self.push(
			DispatchKind::WithdrawableTimer,
			DispatchRecord::WithdrawableTimer { order_id: order.id },
		)
		.await
	}
}

#[async_trait]
impl AuditInterface for RecordingDispatcher {
	async fn record(&self, entry: &AuditEntry) -> Result<(), DispatchError> {
		self.push(DispatchKind::Audit, DispatchRecord::Audit(entry.clone()))
			.await
	}
}

/// Configuration schema for RecordingDispatcher.
pub struct RecordingDispatcherSchema;

impl ConfigSchema for RecordingDispatcherSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![
				Field::new("fail", FieldType::Array(Box::new(FieldType::String))).with_validator(
					|v| {
						let kinds = v.as_array().map(Vec::as_slice).unwrap_or_default();
						match kinds
							.iter()
							.filter_map(|k| k.as_str())
							.find(|k| DispatchKind::parse(k).is_none())
						{
							Some(unknown) => Err(format!("unknown dispatch kind '{}'", unknown)),
							None => Ok(()),
						}
					},
				),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a recording dispatcher from configuration.
///
/// Configuration parameters:
/// - `fail`: optional list of side-effect kinds that always fail
pub fn create_dispatch(config: &toml::Value) -> Result<DispatchService, DispatchError> {
	RecordingDispatcherSchema
		.validate(config)
		.map_err(|e| DispatchError::Configuration(e.to_string()))?;

	let failing = config
		.get("fail")
		.and_then(|v| v.as_array())
		.map(|kinds| {
			kinds
				.iter()
				.filter_map(|k| k.as_str().and_then(DispatchKind::parse))
				.collect::<Vec<_>>()
		})
		.unwrap_or_default();

	Ok(RecordingDispatcher::failing(failing).service())
}

/// Registry for the recording dispatcher.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "recording";
	type Factory = DispatchFactory;

	fn factory() -> Self::Factory {
		create_dispatch
	}
}

impl DispatchRegistry for Registry {}
