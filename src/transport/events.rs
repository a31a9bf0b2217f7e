// Fan-out of transport events. Every subscriber gets its own channel; a
// subscriber that hangs up is dropped on the next publish.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crossbeam_channel::{Receiver, Sender};

use crate::shared::TransportEvent;

#[derive(Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<TransportEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<TransportEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: TransportEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Sender<TransportEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::PlaybackState;

    #[test]
    fn every_subscriber_hears_every_event() {
        let bus = EventBus::new();
        let a = bus.subscribe();
        let b = bus.subscribe();
        let event = TransportEvent::StateChanged {
            old: PlaybackState::Stopped,
            new: PlaybackState::Playing,
        };
        bus.publish(event.clone());
        assert_eq!(a.try_recv(), Ok(event.clone()));
        assert_eq!(b.try_recv(), Ok(event));
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let keep = bus.subscribe();
        drop(bus.subscribe());
        bus.publish(TransportEvent::EndOfSequence);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(keep.try_recv(), Ok(TransportEvent::EndOfSequence));
    }
}
