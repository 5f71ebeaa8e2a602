//! Post-commit side effects.
//!
//! Runs after a transition has been persisted and its order lock released.
//! Every failure is logged and swallowed: the committed status is the source
//! of truth and nothing here can undo it.

use crate::engine::event_bus::EventBus;
use orderflow_dispatch::{AuditEntry, DispatchService};
use orderflow_types::{Order, OrderEvent, OrderStatus, OrderflowEvent, StatusTransition};

pub struct SideEffectHandler {
	dispatch: DispatchService,
	event_bus: EventBus,
}

impl SideEffectHandler {
	pub fn new(dispatch: DispatchService, event_bus: EventBus) -> Self {
		Self {
			dispatch,
			event_bus,
		}
	}

	pub fn order_created(&self, order: &Order) {
		self.event_bus
			.publish(OrderflowEvent::Order(OrderEvent::Created {
				order: order.clone(),
			}));
	}

	/// Dispatches everything that follows a committed transition.
	pub async fn status_changed(&self, order: &Order, transition: &StatusTransition) {
		let entry = AuditEntry::for_transition(order, transition);
		if let Err(e) = self.dispatch.audit.record(&entry).await {
			tracing::error!(
				order_id = order.id,
				sequence = transition.sequence,
				error = %e,
				"Failed to record audit entry"
			);
		}

		if let Err(e) = self
			.dispatch
			.notifications
			.notify_status_change(order, transition)
			.await
		{
			tracing::warn!(
				order_id = order.id,
				to = %transition.to,
				error = %e,
				"Failed to send status notification"
			);
		}

		match transition.to {
			OrderStatus::Completed => {
				if let Err(e) = self.dispatch.payouts.capture_commission(order).await {
					tracing::warn!(order_id = order.id, error = %e, "Failed to capture commission");
				}
				if let Err(e) = self.dispatch.payouts.start_withdrawable_timer(order).await {
					tracing::warn!(order_id = order.id, error = %e, "Failed to start withdrawable timer");
				}
			},
			OrderStatus::Cancelled if order.was_paid() => {
				if let Err(e) = self.dispatch.refunds.credit_cancellation_refund(order).await {
					tracing::error!(order_id = order.id, error = %e, "Failed to dispatch cancellation refund");
				}
			},
			OrderStatus::Cancelled => {
				tracing::debug!(order_id = order.id, "Order never paid, no refund dispatched");
			},
			_ => {},
		}

		self.event_bus
			.publish(OrderflowEvent::Order(OrderEvent::StatusChanged {
				order: order.clone(),
				transition: transition.clone(),
			}));
	}
}
