//! Payment initiation module for the orderflow system.
//!
//! The engine never speaks a gateway protocol. It hands an order and the
//! client's provider details to a [`PaymentInterface`] implementation and only
//! acts on success or failure.

use async_trait::async_trait;
use orderflow_types::{ConfigSchema, ImplementationRegistry, Order};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod mock;
}

/// Errors that can occur while initiating a payment.
#[derive(Debug, Error)]
pub enum PaymentError {
	/// The gateway declined the charge.
	#[error("Payment declined: {0}")]
	Declined(String),
	/// The gateway could not be reached or answered unexpectedly.
	#[error("Gateway error: {0}")]
	Gateway(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Provider details supplied by the client for a payment attempt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PaymentDetails {
	/// Payment provider identifier, e.g. "card" or "wallet".
	pub provider: String,
	/// Opaque provider-specific token.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub token: Option<String>,
}

/// Gateway acknowledgement of an initiated payment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentReceipt {
	/// Gateway reference for the initiated charge.
	pub reference: String,
	/// Optional URL the client must visit to complete the payment.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub redirect_url: Option<String>,
}

/// Trait implemented by payment gateway integrations.
#[async_trait]
pub trait PaymentInterface: Send + Sync {
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Starts a charge for `order` using the client's provider details.
	async fn initiate_payment(
		&self,
		order: &Order,
		details: &PaymentDetails,
	) -> Result<PaymentReceipt, PaymentError>;
}

/// Type alias for payment factory functions.
pub type PaymentFactory = fn(&toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError>;

/// Registry trait for payment implementations.
pub trait PaymentRegistry: ImplementationRegistry<Factory = PaymentFactory> {}

/// Get all registered payment implementations.
pub fn get_all_implementations() -> Vec<(&'static str, PaymentFactory)> {
	use implementations::mock;

	vec![(mock::Registry::NAME, mock::Registry::factory())]
}

/// Service wrapping the configured payment implementation.
pub struct PaymentService {
	implementation: Box<dyn PaymentInterface>,
}

impl PaymentService {
	pub fn new(implementation: Box<dyn PaymentInterface>) -> Self {
		Self { implementation }
	}

	/// Initiates a payment and logs the outcome.
	pub async fn initiate_payment(
		&self,
		order: &Order,
		details: &PaymentDetails,
	) -> Result<PaymentReceipt, PaymentError> {
		match self.implementation.initiate_payment(order, details).await {
			Ok(receipt) => {
				tracing::info!(
					order_id = order.id,
					provider = %details.provider,
					reference = %receipt.reference,
					"Payment initiated"
				);
				Ok(receipt)
			},
			Err(e) => {
				tracing::warn!(
					order_id = order.id,
					provider = %details.provider,
					error = %e,
					"Payment initiation failed"
				);
				Err(e)
			},
		}
	}
}
