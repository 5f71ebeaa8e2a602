//! Mock payment gateway.
//!
//! Accepts or declines every charge according to its configuration, or
//! follows a script of outcomes. Intended for development deployments and
//! tests; clones share their script and attempt counter.

use crate::{
	PaymentDetails, PaymentError, PaymentFactory, PaymentInterface, PaymentReceipt,
	PaymentRegistry,
};
use async_trait::async_trait;
use orderflow_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Order, Schema, ValidationError,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Outcome of one mocked payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOutcome {
	Accept,
	Decline,
}

#[derive(Clone)]
pub struct MockPayment {
	/// Used once the script is exhausted.
	default_outcome: MockOutcome,
	script: Arc<Mutex<VecDeque<MockOutcome>>>,
	attempts: Arc<AtomicUsize>,
}

impl MockPayment {
	pub fn new(default_outcome: MockOutcome) -> Self {
		Self::scripted([], default_outcome)
	}

	/// Plays `outcomes` in order, then falls back to the default outcome.
	pub fn scripted(
		outcomes: impl IntoIterator<Item = MockOutcome>,
		default_outcome: MockOutcome,
	) -> Self {
		Self {
			default_outcome,
			script: Arc::new(Mutex::new(outcomes.into_iter().collect::<VecDeque<_>>())),
			attempts: Arc::new(AtomicUsize::new(0)),
		}
	}

	/// Number of payment attempts made so far.
	pub fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}
}

#[async_trait]
impl PaymentInterface for MockPayment {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MockPaymentSchema)
	}

	async fn initiate_payment(
		&self,
		order: &Order,
		details: &PaymentDetails,
	) -> Result<PaymentReceipt, PaymentError> {
		let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
		let outcome = self
			.script
			.lock()
			.await
			.pop_front()
			.unwrap_or(self.default_outcome);

		match outcome {
			MockOutcome::Accept => Ok(PaymentReceipt {
				reference: format!("mock-{}-{}", order.order_number, attempt),
				redirect_url: None,
			}),
			MockOutcome::Decline => Err(PaymentError::Declined(format!(
				"mock gateway declined {} charge",
				details.provider
			))),
		}
	}
}

/// Configuration schema for MockPayment.
pub struct MockPaymentSchema;

impl ConfigSchema for MockPaymentSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("outcome", FieldType::String).with_validator(|v| {
				match v.as_str() {
					Some("accept") | Some("decline") => Ok(()),
					_ => Err("outcome must be \"accept\" or \"decline\"".into()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a mock payment gateway from configuration.
///
/// Configuration parameters:
/// - `outcome`: "accept" (default) or "decline"
pub fn create_payment(config: &toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError> {
	MockPaymentSchema
		.validate(config)
		.map_err(|e| PaymentError::Configuration(e.to_string()))?;

	let outcome = match config.get("outcome").and_then(|v| v.as_str()) {
		Some("decline") => MockOutcome::Decline,
		_ => MockOutcome::Accept,
	};
	Ok(Box::new(MockPayment::new(outcome)))
}

/// Registry for the mock payment implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "mock";
	type Factory = PaymentFactory;

	fn factory() -> Self::Factory {
		create_payment
	}
}

impl PaymentRegistry for Registry {}
