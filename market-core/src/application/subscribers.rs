//! Fan-out of applied events to registered observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

type Callback<E, D> = Arc<dyn Fn(&E, &D) + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionId(u64);

/// Delivers `(event, record snapshot)` pairs to subscribers, synchronously
/// with event application, so per-record ordering matches the applied
/// sequence. Unsubscribing lets an in-flight dispatch finish but stops
/// every later one.
pub struct SubscriberHub<E, D> {
    subscribers: Mutex<Vec<(u64, Callback<E, D>)>>,
    next_id: AtomicU64,
}

impl<E, D> SubscriberHub<E, D> {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
    }

    pub fn subscribe(&self, callback: impl Fn(&E, &D) + Send + Sync + 'static) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        SubscriptionId(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(sub_id, _)| *sub_id != id.0);
    }

    pub fn publish(&self, event: &E, deal: &D) {
        // Snapshot under the lock, call outside it, so a callback may
        // subscribe or unsubscribe without deadlocking.
        let snapshot: Vec<Callback<E, D>> = self
            .subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in snapshot {
            callback(event, deal);
        }
    }
}

impl<E, D> Default for SubscriberHub<E, D> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn unsubscribed_callbacks_see_no_later_events() {
        let hub: SubscriberHub<u32, &'static str> = SubscriberHub::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_in_cb = Arc::clone(&seen);
        let id = hub.subscribe(move |_, _| {
            seen_in_cb.fetch_add(1, Ordering::SeqCst);
        });

        hub.publish(&1, &"a");
        hub.unsubscribe(id);
        hub.publish(&2, &"b");
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}
