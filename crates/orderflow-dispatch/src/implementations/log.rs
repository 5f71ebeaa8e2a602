//! Dispatcher that writes every side effect to the tracing log.
//!
//! Used by deployments that have no downstream notification or wallet
//! services wired up yet. Nothing can fail.

use crate::{
	AuditEntry, AuditInterface, DispatchError, DispatchFactory, DispatchRegistry, DispatchService,
	NotificationInterface, PayoutInterface, RefundInterface,
};
use async_trait::async_trait;
use orderflow_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Order, Schema, StatusTransition,
	ValidationError,
};
use std::sync::Arc;

const DEFAULT_TARGET: &str = "orderflow::dispatch";

pub struct LogDispatcher {
	/// Extra label attached to every line, e.g. a deployment name.
	label: String,
}

impl LogDispatcher {
	pub fn new(label: impl Into<String>) -> Self {
		Self {
			label: label.into(),
		}
	}
}

#[async_trait]
impl NotificationInterface for LogDispatcher {
	async fn notify_status_change(
		&self,
		order: &Order,
		transition: &StatusTransition,
	) -> Result<(), DispatchError> {
		tracing::info!(
			target: DEFAULT_TARGET,
			label = %self.label,
			order_number = %order.order_number,
			client_id = order.client_id,
			from = %transition.from,
			to = %transition.to,
			"Status change notification"
		);
		Ok(())
	}
}

#[async_trait]
impl RefundInterface for LogDispatcher {
	async fn credit_cancellation_refund(&self, order: &Order) -> Result<(), DispatchError> {
		tracing::info!(
			target: DEFAULT_TARGET,
			label = %self.label,
			order_number = %order.order_number,
			client_id = order.client_id,
			"Cancellation refund credited"
		);
		Ok(())
	}
}

#[async_trait]
impl PayoutInterface for LogDispatcher {
	async fn capture_commission(&self, order: &Order) -> Result<(), DispatchError> {
		tracing::info!(
			target: DEFAULT_TARGET,
			label = %self.label,
			order_number = %order.order_number,
			tenant_id = %order.tenant_id,
			"Commission captured"
		);
		Ok(())
	}

	async fn start_withdrawable_timer(&self, order: &Order) -> Result<(), DispatchError> {
		tracing::info!(
			target: DEFAULT_TARGET,
			label = %self.label,
			order_number = %order.order_number,
			tenant_id = %order.tenant_id,
			"Withdrawable timer started"
		);
		Ok(())
	}
}

#[async_trait]
impl AuditInterface for LogDispatcher {
	async fn record(&self, entry: &AuditEntry) -> Result<(), DispatchError> {
		tracing::info!(
			target: DEFAULT_TARGET,
			label = %self.label,
			actor = %entry.actor,
			order_number = %entry.order_number,
			from = %entry.from,
			to = %entry.to,
			metadata = ?entry.metadata,
			"Audit"
		);
		Ok(())
	}
}

/// Configuration schema for LogDispatcher.
pub struct LogDispatcherSchema;

impl ConfigSchema for LogDispatcherSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(vec![], vec![Field::new("label", FieldType::String)]);
		schema.validate(config)
	}
}

/// Factory function to create a log dispatcher from configuration.
///
/// Configuration parameters:
/// - `label`: optional label attached to every log line (default: "default")
pub fn create_dispatch(config: &toml::Value) -> Result<DispatchService, DispatchError> {
	LogDispatcherSchema
		.validate(config)
		.map_err(|e| DispatchError::Configuration(e.to_string()))?;

	let label = config
		.get("label")
		.and_then(|v| v.as_str())
		.unwrap_or("default");

	Ok(DispatchService::from_backend(
		Arc::new(LogDispatcher::new(label)),
		Arc::new(LogDispatcherSchema),
	))
}

/// Registry for the log dispatcher.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "log";
	type Factory = DispatchFactory;

	fn factory() -> Self::Factory {
		create_dispatch
	}
}

impl DispatchRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_label_must_be_string() {
		let bad: toml::Value = toml::from_str("label = 3").unwrap();
		assert!(matches!(
			create_dispatch(&bad),
			Err(DispatchError::Configuration(_))
		));

		let empty = toml::Value::Table(toml::map::Map::new());
		let service = create_dispatch(&empty).unwrap();
		assert!(service.config_schema().validate(&empty).is_ok());
	}
}
