//! In-process event bus.
//!
//! Broadcasts committed order events to any number of subscribers. Publishing
//! never blocks and never fails the caller; slow subscribers lag and lose the
//! oldest events.

use orderflow_types::OrderflowEvent;
use tokio::sync::broadcast;

const DEFAULT_CAPACITY: usize = 1024;

#[derive(Clone)]
pub struct EventBus {
	sender: broadcast::Sender<OrderflowEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<OrderflowEvent> {
		self.sender.subscribe()
	}

	/// Publishes `event` to current subscribers.
	///
	/// Returns the number of subscribers that received it.
	pub fn publish(&self, event: OrderflowEvent) -> usize {
		match self.sender.send(event) {
			Ok(receivers) => receivers,
			Err(_) => {
				tracing::trace!("No event subscribers");
				0
			},
		}
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(DEFAULT_CAPACITY)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use orderflow_types::BatchEvent;

	#[tokio::test]
	async fn test_publish_reaches_subscribers() {
		let bus = EventBus::default();
		assert_eq!(
			bus.publish(OrderflowEvent::Batch(BatchEvent::SweepCompleted {
				examined: 0,
				cancelled: 0
			})),
			0
		);

		let mut receiver = bus.subscribe();
		bus.publish(OrderflowEvent::Batch(BatchEvent::SweepCompleted {
			examined: 2,
			cancelled: 1,
		}));
		match receiver.recv().await.unwrap() {
			OrderflowEvent::Batch(BatchEvent::SweepCompleted { examined, cancelled }) => {
				assert_eq!((examined, cancelled), (2, 1));
			},
			other => panic!("unexpected event: {:?}", other),
		}
	}
}
