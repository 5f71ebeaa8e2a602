//! State management for orders.
//!
//! Provides the per-order lock registry, the transition table and the state
//! machine through which every order mutation is funneled.

pub mod locks;
pub mod order;
pub mod transitions;

pub use locks::OrderLocks;
pub use order::{OrderStateError, OrderStateMachine};
