//! Common types module for the orderflow system.
//!
//! This module defines the domain types shared by every orderflow crate: the
//! order record and its status enumeration, actors, transition events, storage
//! keys and the configuration-schema helpers used by pluggable implementations.

/// Actor types identifying who triggered a transition.
pub mod actor;
/// Event types for in-process communication.
pub mod events;
/// Order record, status and delivery-method types.
pub mod order;
/// Base trait for self-registering implementations.
pub mod registry;
/// Storage key types.
pub mod storage;
/// Status transition ledger types.
pub mod transition;
/// Configuration validation types for pluggable implementations.
pub mod validation;

pub use actor::*;
pub use events::*;
pub use order::*;
pub use registry::*;
pub use storage::*;
pub use transition::*;
pub use validation::*;
