//! Core order lifecycle engine.
//!
//! Owns the order state machine and everything that mutates orders through
//! it: the cancellation window guard, the payment retry timer, the expired
//! payment sweep and mass transitions. Side effects of committed transitions
//! are handed to the dispatch backends and published on the event bus.

pub mod builder;
pub mod bulk;
pub mod clock;
pub mod engine;
pub mod guards;
pub mod handlers;
pub mod retry;
pub mod state;
pub mod tenants;

#[cfg(test)]
mod test_support;

pub use builder::{BuilderError, EngineFactories, OrderEngineBuilder};
pub use bulk::{BulkFailure, BulkFailureKind, BulkTransitionReport, BulkValidationError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{event_bus::EventBus, EngineError, OrderEngine};
pub use guards::{CancellationDenial, CancellationWindowGuard};
pub use retry::{RetryError, RetryOutcome, RetryRejection, SweepReport};
pub use state::{OrderStateError, OrderStateMachine};
