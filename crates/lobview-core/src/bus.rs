//! Subscriber registry with channel-based fan-out.
//!
//! Each subscriber gets its own unbounded channel; a slow or dropped
//! subscriber never blocks delivery to the others. The [`Subscription`]
//! handle removes its sender on drop, so unsubscribing is just letting the
//! handle go out of scope (or calling [`Subscription::unsubscribe`] to make
//! it explicit).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

struct Registry<T> {
    senders: Mutex<HashMap<u64, mpsc::UnboundedSender<T>>>,
    next_id: AtomicU64,
}

/// Broadcast bus for one event category.
pub struct EventBus<T> {
    registry: Arc<Registry<T>>,
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

impl<T: Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                senders: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a subscriber. Returns the removal handle and the receiving
    /// end of the subscriber's channel.
    pub fn subscribe(&self) -> (Subscription, mpsc::UnboundedReceiver<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.senders.lock().insert(id, tx);

        let registry = Arc::downgrade(&self.registry);
        let subscription = Subscription {
            cancel: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    registry.senders.lock().remove(&id);
                }
            })),
        };
        (subscription, rx)
    }

    /// Number of live subscribers.
    pub fn len(&self) -> usize {
        self.registry.senders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every subscriber registration. Receivers see their channels
    /// close; nothing is delivered afterwards.
    pub fn clear(&self) {
        self.registry.senders.lock().clear();
    }
}

impl<T: Clone> EventBus<T> {
    /// Deliver an event to every current subscriber, pruning any whose
    /// receiver has been dropped.
    pub fn emit(&self, event: &T) {
        let mut senders = self.registry.senders.lock();
        senders.retain(|_, tx| tx.send(event.clone()).is_ok());
    }
}

/// RAII unsubscribe handle returned by [`EventBus::subscribe`].
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Remove the subscriber now rather than on drop.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fan_out_to_all_subscribers() {
        let bus: EventBus<u32> = EventBus::new();
        let (_sub_a, mut rx_a) = bus.subscribe();
        let (_sub_b, mut rx_b) = bus.subscribe();

        bus.emit(&7);
        assert_eq!(rx_a.try_recv().unwrap(), 7);
        assert_eq!(rx_b.try_recv().unwrap(), 7);
    }

    #[test]
    fn test_dropped_receiver_does_not_block_others() {
        let bus: EventBus<u32> = EventBus::new();
        let (_sub_a, rx_a) = bus.subscribe();
        let (_sub_b, mut rx_b) = bus.subscribe();

        drop(rx_a);
        bus.emit(&1);
        bus.emit(&2);
        assert_eq!(rx_b.try_recv().unwrap(), 1);
        assert_eq!(rx_b.try_recv().unwrap(), 2);
        // Dead subscriber was pruned on emit.
        assert_eq!(bus.len(), 1);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let bus: EventBus<u32> = EventBus::new();
        let (sub, mut rx) = bus.subscribe();

        bus.emit(&1);
        sub.unsubscribe();
        bus.emit(&2);

        assert_eq!(rx.try_recv().unwrap(), 1);
        // Channel closed after unsubscribe, nothing more delivered.
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_bus_and_subscription_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<EventBus<u32>>();
        assert_send_sync::<Subscription>();
    }

    #[test]
    fn test_handles_move_across_threads() {
        let bus: EventBus<u32> = EventBus::new();
        let (sub, mut rx) = bus.subscribe();

        let bus_remote = bus.clone();
        std::thread::spawn(move || {
            bus_remote.emit(&9);
            drop(sub);
        })
        .join()
        .unwrap();

        assert_eq!(rx.try_recv().unwrap(), 9);
        assert!(bus.is_empty());
    }

    #[test]
    fn test_clear_silences_everyone() {
        let bus: EventBus<u32> = EventBus::new();
        let (_sub, mut rx) = bus.subscribe();
        bus.clear();
        bus.emit(&1);
        assert!(rx.try_recv().is_err());
        assert!(bus.is_empty());
    }
}
