//! Builder for constructing order engines.
//!
//! Composes an [`OrderEngine`] from the storage, payment and dispatch
//! implementations named in the configuration, using factory functions.
//! Individual components can be supplied directly, which tests use to keep a
//! handle on a recording dispatcher or a scripted payment gateway.

use crate::bulk::MassTransitionCoordinator;
use crate::clock::{Clock, SystemClock};
use crate::engine::{event_bus::EventBus, OrderEngine};
use crate::handlers::SideEffectHandler;
use crate::retry::PaymentRetryTimer;
use crate::state::{OrderLocks, OrderStateMachine};
use crate::tenants::TenantDirectory;
use orderflow_config::{Config, ImplementationsConfig};
use orderflow_dispatch::{DispatchError, DispatchFactory, DispatchService};
use orderflow_payment::{PaymentError, PaymentFactory, PaymentInterface, PaymentService};
use orderflow_storage::{StorageError, StorageFactory, StorageInterface, StorageService};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions for every pluggable component, keyed by the name used
/// in configuration.
pub struct EngineFactories<SF, PF, DF> {
	pub storage_factories: HashMap<String, SF>,
	pub payment_factories: HashMap<String, PF>,
	pub dispatch_factories: HashMap<String, DF>,
}

impl EngineFactories<StorageFactory, PaymentFactory, DispatchFactory> {
	/// Factories of every implementation shipped with the workspace.
	pub fn registered() -> Self {
		fn collect<F>(implementations: Vec<(&'static str, F)>) -> HashMap<String, F> {
			implementations
				.into_iter()
				.map(|(name, factory)| {
					tracing::debug!(implementation = name, "Registering implementation");
					(name.to_string(), factory)
				})
				.collect()
		}

		Self {
			storage_factories: collect(orderflow_storage::get_all_implementations()),
			payment_factories: collect(orderflow_payment::get_all_implementations()),
			dispatch_factories: collect(orderflow_dispatch::get_all_implementations()),
		}
	}
}

/// Builds the primary implementation of one configuration section.
fn build_primary<T, E, F>(
	component: &str,
	section: &ImplementationsConfig,
	factories: &HashMap<String, F>,
) -> Result<T, BuilderError>
where
	E: Display,
	F: Fn(&toml::Value) -> Result<T, E>,
{
	let name = &section.primary;
	let config = section.primary_config().ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} '{}' not found in implementations",
			component, name
		))
	})?;
	let factory = factories.get(name).ok_or_else(|| {
		BuilderError::MissingComponent(format!("{} implementation '{}'", component, name))
	})?;

	match factory(config) {
		Ok(implementation) => {
			tracing::info!(component, implementation = %name, "Loaded");
			Ok(implementation)
		},
		Err(e) => {
			tracing::error!(
				component,
				implementation = %name,
				error = %e,
				"Failed to create implementation"
			);
			Err(BuilderError::Config(format!(
				"Failed to create {} implementation '{}': {}",
				component, name, e
			)))
		},
	}
}

/// Builder for an [`OrderEngine`].
pub struct OrderEngineBuilder {
	config: Config,
	clock: Option<Arc<dyn Clock>>,
	storage: Option<Box<dyn StorageInterface>>,
	payment: Option<Box<dyn PaymentInterface>>,
	dispatch: Option<DispatchService>,
}

impl OrderEngineBuilder {
	pub fn new(config: Config) -> Self {
		Self {
			config,
			clock: None,
			storage: None,
			payment: None,
			dispatch: None,
		}
	}

	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = Some(clock);
		self
	}

	pub fn with_storage(mut self, storage: Box<dyn StorageInterface>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn with_payment(mut self, payment: Box<dyn PaymentInterface>) -> Self {
		self.payment = Some(payment);
		self
	}

	pub fn with_dispatch(mut self, dispatch: DispatchService) -> Self {
		self.dispatch = Some(dispatch);
		self
	}

	/// Builds the engine, creating every component not supplied directly.
	pub fn build<SF, PF, DF>(
		self,
		factories: EngineFactories<SF, PF, DF>,
	) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		PF: Fn(&toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError>,
		DF: Fn(&toml::Value) -> Result<DispatchService, DispatchError>,
	{
		let config = self.config;

		let storage_backend = match self.storage {
			Some(storage) => storage,
			None => build_primary("storage", &config.storage, &factories.storage_factories)?,
		};
		let payment_backend = match self.payment {
			Some(payment) => payment,
			None => build_primary("payment", &config.payment, &factories.payment_factories)?,
		};
		let dispatch = match self.dispatch {
			Some(dispatch) => dispatch,
			None => build_primary("dispatch", &config.dispatch, &factories.dispatch_factories)?,
		};
		let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

		let storage = Arc::new(StorageService::new(storage_backend));
		let payment = Arc::new(PaymentService::new(payment_backend));
		let event_bus = EventBus::default();
		let effects = Arc::new(SideEffectHandler::new(dispatch, event_bus.clone()));

		let state = Arc::new(OrderStateMachine::new(
			storage,
			OrderLocks::new(Duration::from_millis(config.engine.lock_timeout_ms)),
			clock,
			effects,
		));
		let retry = Arc::new(PaymentRetryTimer::new(
			state.clone(),
			payment,
			event_bus.clone(),
			&config.payment_retry,
		));
		let bulk = Arc::new(MassTransitionCoordinator::new(
			state.clone(),
			event_bus.clone(),
			config.engine.bulk_concurrency,
		));
		let tenants = Arc::new(TenantDirectory::from_config(&config));

		tracing::info!(
			engine_id = %config.engine.id,
			lock_timeout_ms = config.engine.lock_timeout_ms,
			bulk_concurrency = config.engine.bulk_concurrency,
			"Order engine built"
		);
		Ok(OrderEngine::new(
			config, state, retry, bulk, tenants, event_bus,
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_types::{DeliveryMethod, NewOrder, OrderStatus};

	#[tokio::test]
	async fn test_build_from_testing_config() {
		let engine = OrderEngineBuilder::new(Config::for_testing())
			.build(EngineFactories::registered())
			.unwrap();
		engine.initialize().await.unwrap();

		let order = engine
			.create_order(NewOrder {
				tenant_id: "acme".into(),
				client_id: 1,
				delivery_method: DeliveryMethod::Delivery,
			})
			.await
			.unwrap();
		assert_eq!(order.status, OrderStatus::PendingPayment);
		assert!(order.payment_retry_expires_at.is_some());
	}

	#[test]
	fn test_unknown_primary_is_missing_component() {
		let mut config = Config::for_testing();
		config.payment.primary = "stripe".into();
		config
			.payment
			.implementations
			.insert("stripe".into(), toml::Value::Table(toml::map::Map::new()));

		let result = OrderEngineBuilder::new(config).build(EngineFactories::registered());
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}

	#[test]
	fn test_invalid_implementation_config() {
		let mut config = Config::for_testing();
		config.payment.implementations.insert(
			"mock".into(),
			toml::from_str("outcome = \"sometimes\"").unwrap(),
		);

		let result = OrderEngineBuilder::new(config).build(EngineFactories::registered());
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}
}
