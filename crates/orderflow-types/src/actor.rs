//! Actor types.
//!
//! Every transition is attributed to either a human user or the system
//! itself (scheduled sweeps, automatic cancellations).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Who triggered a transition.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
	/// A human user: client, cook or administrator.
	User(u64),
	/// An automated, system-triggered action.
	System,
}

impl Actor {
	pub fn user_id(&self) -> Option<u64> {
		match self {
			Actor::User(id) => Some(*id),
			Actor::System => None,
		}
	}
}

impl fmt::Display for Actor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Actor::User(id) => write!(f, "user:{}", id),
			Actor::System => write!(f, "system"),
		}
	}
}
