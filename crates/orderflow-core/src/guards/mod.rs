//! Read-only eligibility checks.

pub mod cancellation;

pub use cancellation::{CancellationDenial, CancellationWindowGuard};
