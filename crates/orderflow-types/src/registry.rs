//! Registry trait for self-registering implementations.

/// Base trait for implementation registries.
///
/// Each pluggable implementation (storage backend, payment gateway, dispatch
/// backend) exposes a `Registry` struct declaring the name used for it in
/// configuration files together with its factory function.
pub trait ImplementationRegistry {
	/// Name used in configuration, e.g. "memory" for `storage.implementations.memory`.
	const NAME: &'static str;

	/// Factory function type for this kind of implementation.
	type Factory;

	fn factory() -> Self::Factory;
}
