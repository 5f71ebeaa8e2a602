//! Handlers invoked after a transition has been committed.

pub mod side_effects;

pub use side_effects::SideEffectHandler;
