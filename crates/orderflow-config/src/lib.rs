//! Configuration module for the orderflow system.
//!
//! Configuration is loaded from TOML. String values may reference
//! environment variables as `${VAR}` or `${VAR:-default}`, and a file may pull
//! in other files with `include = ["a.toml", "b.toml"]` as long as every
//! top-level section is defined exactly once across all of them.

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Upper bound for any configured window, in minutes (one week).
const MAX_WINDOW_MINUTES: u32 = 7 * 24 * 60;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Engine instance settings.
	pub engine: EngineConfig,
	/// Default cancellation window for tenants without an override.
	#[serde(default)]
	pub cancellation: CancellationConfig,
	/// Payment retry bounds.
	#[serde(default)]
	pub payment_retry: PaymentRetryConfig,
	/// Expired-payment sweep scheduling.
	#[serde(default)]
	pub sweep: SweepConfig,
	/// Storage backend selection.
	pub storage: ImplementationsConfig,
	/// Payment gateway selection.
	pub payment: ImplementationsConfig,
	/// Side-effect dispatch backend selection.
	pub dispatch: ImplementationsConfig,
	/// Per-tenant settings keyed by tenant id.
	#[serde(default)]
	pub tenants: HashMap<String, TenantConfig>,
}

/// Engine instance settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
	/// Identifier of this engine instance, used in logs.
	pub id: String,
	/// Maximum time to wait for an order lock before giving up.
	#[serde(default = "default_lock_timeout_ms")]
	pub lock_timeout_ms: u64,
	/// Number of orders a mass transition processes in parallel.
	#[serde(default = "default_bulk_concurrency")]
	pub bulk_concurrency: usize,
}

fn default_lock_timeout_ms() -> u64 {
	5_000
}

fn default_bulk_concurrency() -> usize {
	16
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CancellationConfig {
	/// Window snapshotted onto new orders of tenants without their own setting.
	#[serde(default = "default_window_minutes")]
	pub default_window_minutes: u32,
}

impl Default for CancellationConfig {
	fn default() -> Self {
		Self {
			default_window_minutes: default_window_minutes(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaymentRetryConfig {
	/// Maximum number of payment retry attempts per order.
	#[serde(default = "default_max_retries")]
	pub max_retries: u32,
	/// Retry window, anchored to order creation.
	#[serde(default = "default_window_minutes")]
	pub window_minutes: u32,
}

impl Default for PaymentRetryConfig {
	fn default() -> Self {
		Self {
			max_retries: default_max_retries(),
			window_minutes: default_window_minutes(),
		}
	}
}

fn default_max_retries() -> u32 {
	3
}

fn default_window_minutes() -> u32 {
	15
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SweepConfig {
	/// Seconds between two expired-payment sweeps.
	#[serde(default = "default_sweep_interval")]
	pub interval_seconds: u64,
}

impl Default for SweepConfig {
	fn default() -> Self {
		Self {
			interval_seconds: default_sweep_interval(),
		}
	}
}

fn default_sweep_interval() -> u64 {
	15 * 60
}

/// Selection of a pluggable implementation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ImplementationsConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of implementation names to their raw configuration.
	pub implementations: HashMap<String, toml::Value>,
}

impl ImplementationsConfig {
	/// Returns the raw configuration of the primary implementation.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}

	fn validate(&self, section: &str) -> Result<(), ConfigError> {
		if self.primary.is_empty() {
			return Err(ConfigError::Validation(format!(
				"{} primary implementation cannot be empty",
				section
			)));
		}
		if !self.implementations.contains_key(&self.primary) {
			return Err(ConfigError::Validation(format!(
				"Primary {} '{}' not found in implementations",
				section, self.primary
			)));
		}
		Ok(())
	}
}

/// Settings of one tenant.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TenantConfig {
	pub cancellation_window_minutes: u32,
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of VAR_NAME and supports defaults
/// with `${VAR_NAME:-default_value}`. Input is limited to 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut missing = None;
	let resolved = re.replace_all(input, |caps: &regex::Captures<'_>| {
		let name = &caps[1];
		match (std::env::var(name), caps.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				missing.get_or_insert_with(|| name.to_string());
				String::new()
			},
		}
	});

	match missing {
		Some(name) => Err(ConfigError::Validation(format!(
			"Environment variable '{}' not found",
			name
		))),
		None => Ok(resolved.into_owned()),
	}
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let base_dir = path
			.parent()
			.filter(|p| !p.as_os_str().is_empty())
			.unwrap_or_else(|| Path::new("."));
		let file_name = path.file_name().ok_or_else(|| {
			ConfigError::Validation(format!("Invalid path: {}", path.display()))
		})?;

		loader::ConfigLoader::new(base_dir)
			.load_config(file_name)
			.await
	}

	/// Returns the cancellation window a new order of `tenant_id` receives.
	pub fn cancellation_window_for(&self, tenant_id: &str) -> u32 {
		self.tenants
			.get(tenant_id)
			.map(|tenant| tenant.cancellation_window_minutes)
			.unwrap_or(self.cancellation.default_window_minutes)
	}

	fn validate(&self) -> Result<(), ConfigError> {
		if self.engine.id.is_empty() {
			return Err(ConfigError::Validation("Engine ID cannot be empty".into()));
		}
		if self.engine.lock_timeout_ms == 0 {
			return Err(ConfigError::Validation(
				"engine.lock_timeout_ms must be greater than 0".into(),
			));
		}
		if self.engine.lock_timeout_ms > 60_000 {
			return Err(ConfigError::Validation(
				"engine.lock_timeout_ms cannot exceed 60000 (1 minute)".into(),
			));
		}
		if self.engine.bulk_concurrency == 0 {
			return Err(ConfigError::Validation(
				"engine.bulk_concurrency must be at least 1".into(),
			));
		}

		validate_window(
			"cancellation.default_window_minutes",
			self.cancellation.default_window_minutes,
		)?;
		validate_window(
			"payment_retry.window_minutes",
			self.payment_retry.window_minutes,
		)?;
		if self.payment_retry.max_retries == 0 {
			return Err(ConfigError::Validation(
				"payment_retry.max_retries must be at least 1".into(),
			));
		}
		if self.payment_retry.max_retries > 10 {
			return Err(ConfigError::Validation(
				"payment_retry.max_retries cannot exceed 10".into(),
			));
		}

		if self.sweep.interval_seconds == 0 {
			return Err(ConfigError::Validation(
				"sweep.interval_seconds must be greater than 0".into(),
			));
		}
		if self.sweep.interval_seconds > 86_400 {
			return Err(ConfigError::Validation(
				"sweep.interval_seconds cannot exceed 86400 (24 hours)".into(),
			));
		}

		self.storage.validate("storage")?;
		self.payment.validate("payment")?;
		self.dispatch.validate("dispatch")?;

		for (tenant_id, tenant) in &self.tenants {
			if tenant_id.is_empty() {
				return Err(ConfigError::Validation("Tenant ID cannot be empty".into()));
			}
			validate_window(
				&format!("tenants.{}.cancellation_window_minutes", tenant_id),
				tenant.cancellation_window_minutes,
			)?;
		}

		Ok(())
	}
}

fn validate_window(field: &str, minutes: u32) -> Result<(), ConfigError> {
	if minutes > MAX_WINDOW_MINUTES {
		return Err(ConfigError::Validation(format!(
			"{} cannot exceed {} minutes",
			field, MAX_WINDOW_MINUTES
		)));
	}
	Ok(())
}

/// Parses TOML, resolving environment variables and validating the result.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(any(test, feature = "testing"))]
impl Config {
	/// Minimal in-memory configuration for tests.
	pub fn for_testing() -> Self {
		TESTING_CONFIG
			.parse()
			.unwrap_or_else(|e| panic!("testing config must parse: {}", e))
	}
}

#[cfg(any(test, feature = "testing"))]
const TESTING_CONFIG: &str = r#"
[engine]
id = "test-engine"
lock_timeout_ms = 500
bulk_concurrency = 4

[storage]
primary = "memory"
[storage.implementations.memory]

[payment]
primary = "mock"
[payment.implementations.mock]

[dispatch]
primary = "recording"
[dispatch.implementations.recording]
"#;
