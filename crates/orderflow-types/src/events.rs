//! Event types for in-process communication.
//!
//! Events are published on the engine's event bus after state has been
//! committed, allowing other components to react without being part of the
//! transition's atomic boundary.

use crate::{Order, StatusTransition};
use serde::{Deserialize, Serialize};

/// Main event type encompassing all orderflow events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderflowEvent {
	/// Events about single orders.
	Order(OrderEvent),
	/// Events from batch operations.
	Batch(BatchEvent),
}

/// Events related to a single order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// A new order has been stored.
	Created { order: Order },
	/// An order's status changed.
	StatusChanged {
		order: Order,
		transition: StatusTransition,
	},
}

/// Events emitted by batch operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
	/// An expired-payment sweep finished.
	SweepCompleted { examined: usize, cancelled: usize },
	/// A mass transition finished.
	BulkCompleted {
		total: usize,
		success_count: usize,
		failure_count: usize,
	},
}
