//! Typed engine notifications.
//!
//! The engine publishes one [`AudioEvent`] per notification onto a bounded
//! channel. Hosts either drain it once per frame or hold a cloned receiver.

use cosmos_common::{SourceId, ZoneId};
use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::trace;

/// Notifications emitted by the spatial audio engine.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioEvent {
    /// The listener moved into a zone's candidate region.
    ZoneEntered {
        /// Zone entered
        zone: ZoneId,
        /// Zone name
        name: String,
    },
    /// The listener left a zone's candidate region.
    ZoneExited {
        /// Zone exited
        zone: ZoneId,
    },
    /// A source began playing.
    SourceStarted {
        /// Source started
        source: SourceId,
    },
    /// A non-looping source reached the end of its payload.
    SourceFinished {
        /// Source finished
        source: SourceId,
    },
    /// A payload finished loading.
    LoadCompleted {
        /// Source whose payload loaded
        source: SourceId,
        /// Payload duration in seconds
        duration: f64,
    },
    /// A payload failed to load.
    LoadFailed {
        /// Source whose payload failed
        source: SourceId,
        /// Loader message
        message: String,
    },
}

/// Bounded event channel owned by the engine.
#[derive(Debug)]
pub struct EventBus {
    sender: Sender<AudioEvent>,
    receiver: Receiver<AudioEvent>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventBus {
    /// Creates a new event bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            capacity,
        }
    }

    /// Publishes an event to the bus.
    pub fn publish(&self, event: AudioEvent) {
        trace!(?event, "audio event");
        // Non-blocking send - if full, event is dropped
        let _ = self.sender.try_send(event);
    }

    /// Drains all pending events.
    pub fn drain(&self) -> Vec<AudioEvent> {
        self.receiver.try_iter().collect()
    }

    /// Returns the number of pending events.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }

    /// Returns the channel capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns a receiver handle for consuming events elsewhere.
    #[must_use]
    pub fn receiver(&self) -> Receiver<AudioEvent> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_and_drain() {
        let bus = EventBus::new(4);
        bus.publish(AudioEvent::ZoneExited {
            zone: ZoneId::from_raw(1),
        });
        bus.publish(AudioEvent::SourceStarted {
            source: SourceId::from_raw(2),
        });
        assert_eq!(bus.pending_count(), 2);

        let events = bus.drain();
        assert_eq!(events.len(), 2);
        assert_eq!(bus.pending_count(), 0);
    }

    #[test]
    fn test_full_bus_drops_events() {
        let bus = EventBus::new(1);
        for raw in 0..3 {
            bus.publish(AudioEvent::SourceFinished {
                source: SourceId::from_raw(raw),
            });
        }
        assert_eq!(bus.drain().len(), 1);
    }

    #[test]
    fn test_receiver_handle_sees_events() {
        let bus = EventBus::default();
        let rx = bus.receiver();
        bus.publish(AudioEvent::LoadFailed {
            source: SourceId::from_raw(9),
            message: "404".into(),
        });
        assert!(matches!(rx.try_recv(), Ok(AudioEvent::LoadFailed { .. })));
    }
}
