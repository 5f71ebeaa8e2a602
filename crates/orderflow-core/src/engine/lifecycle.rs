//! Startup and shutdown of the order engine.

use super::{EngineError, OrderEngine};
use crate::state::order::ORDER_SEQUENCE;
use orderflow_types::StorageKey;

impl OrderEngine {
	/// Checks that storage answers before the first sweep runs.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(engine_id = %self.config.engine.id, "Initializing order engine");
		self.state
			.storage()
			.exists(StorageKey::Sequences.as_str(), ORDER_SEQUENCE)
			.await
			.map_err(|e| EngineError::Service(format!("Storage unavailable: {}", e)))?;
		Ok(())
	}

	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!(engine_id = %self.config.engine.id, "Shutting down order engine");
		Ok(())
	}
}
