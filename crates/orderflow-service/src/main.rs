//! Main entry point for the orderflow service.
//!
//! Loads the configuration, builds the order engine with the implementations
//! it names and runs the expired-payment sweep on its schedule until
//! interrupted. With `--sweep-once` a single sweep runs and its report is
//! printed, for use from an external scheduler.

use clap::Parser;
use orderflow_config::Config;
use orderflow_core::{EngineFactories, OrderEngine, OrderEngineBuilder};
use std::path::PathBuf;

/// Command-line arguments for the orderflow service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,

	/// Run one expired-payment sweep and exit
	#[arg(long)]
	sweep_once: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	use tracing_subscriber::{fmt, EnvFilter};

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	let config = Config::from_file(&args.config).await?;
	tracing::info!("Loaded configuration [{}]", config.engine.id);

	let engine = build_engine(config)?;

	if args.sweep_once {
		engine.initialize().await?;
		let report = engine.sweep_expired_orders().await?;
		println!("{}", serde_json::to_string_pretty(&report)?);
		engine.shutdown().await?;
		return Ok(());
	}

	tracing::info!("Started orderflow engine");
	engine.run().await?;
	tracing::info!("Stopped orderflow engine");
	Ok(())
}

/// Builds the order engine with every registered implementation.
fn build_engine(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	Ok(OrderEngineBuilder::new(config).build(EngineFactories::registered())?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::tempdir;

	#[test]
	fn test_args_defaults() {
		let args = Args::try_parse_from(["orderflow"]).unwrap();
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
		assert!(!args.sweep_once);
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::try_parse_from([
			"orderflow",
			"--config",
			"prod.toml",
			"-l",
			"debug",
			"--sweep-once",
		])
		.unwrap();
		assert_eq!(args.config, PathBuf::from("prod.toml"));
		assert_eq!(args.log_level, "debug");
		assert!(args.sweep_once);
	}

	#[tokio::test]
	async fn test_build_engine_from_file() {
		let dir = tempdir().unwrap();
		let storage_dir = dir.path().join("storage");
		let config_path = dir.path().join("orderflow.toml");
		let contents = format!(
			r#"
[engine]
id = "file-engine"

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "{}"

[payment]
primary = "mock"
[payment.implementations.mock]
outcome = "decline"

[dispatch]
primary = "log"
[dispatch.implementations.log]

[tenants.acme]
cancellation_window_minutes = 5
"#,
			storage_dir.display()
		);
		std::fs::write(&config_path, contents).unwrap();

		let config = Config::from_file(&config_path).await.unwrap();
		let engine = build_engine(config).unwrap();
		assert_eq!(engine.config().engine.id, "file-engine");
		assert_eq!(engine.tenants().cancellation_window_for("acme"), 5);

		engine.initialize().await.unwrap();
		let report = engine.sweep_expired_orders().await.unwrap();
		assert_eq!(report.examined, 0);
	}

	#[tokio::test]
	async fn test_build_engine_rejects_unknown_implementation() {
		let config: Config = r#"
[engine]
id = "broken"

[storage]
primary = "redis"
[storage.implementations.redis]

[payment]
primary = "mock"
[payment.implementations.mock]

[dispatch]
primary = "log"
[dispatch.implementations.log]
"#
		.parse()
		.unwrap();

		assert!(build_engine(config).is_err());
	}
}
