use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use lingo_logging::lingo_trace;
use tokio::sync::mpsc;

type Listeners = HashMap<String, Vec<(u64, mpsc::UnboundedSender<String>)>>;

/// In-process push-event channels keyed by name.
///
/// Payloads emitted to a name with no subscriber are dropped, so a listener
/// must subscribe before whatever produces its events starts.
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: Mutex<Listeners>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Subscribes to `name`. The subscription ends when the guard is dropped.
    pub fn subscribe(self: &Arc<Self>, name: impl Into<String>) -> Subscription {
        let name = name.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.lock().entry(name.clone()).or_default().push((id, tx));
        lingo_trace!("subscribed {} to {}", id, name);
        Subscription {
            bus: Arc::clone(self),
            name,
            id,
            rx,
        }
    }

    /// Delivers `payload` to every current subscriber of `name`; returns how many received it.
    pub fn emit(&self, name: &str, payload: impl Into<String>) -> usize {
        let payload = payload.into();
        let listeners = self.lock();
        let Some(subscribers) = listeners.get(name) else {
            return 0;
        };
        subscribers
            .iter()
            .filter(|(_, tx)| tx.send(payload.clone()).is_ok())
            .count()
    }

    pub fn subscriber_count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, Vec::len)
    }

    /// Number of names with at least one live subscription.
    pub fn channel_count(&self) -> usize {
        self.lock().len()
    }

    fn unsubscribe(&self, name: &str, id: u64) {
        let mut listeners = self.lock();
        if let Some(subscribers) = listeners.get_mut(name) {
            subscribers.retain(|(subscriber, _)| *subscriber != id);
            if subscribers.is_empty() {
                listeners.remove(name);
            }
        }
        lingo_trace!("unsubscribed {} from {}", id, name);
    }

    fn lock(&self) -> MutexGuard<'_, Listeners> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Live subscription to one event name.
#[derive(Debug)]
pub struct Subscription {
    bus: Arc<EventBus>,
    name: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<String>,
}

impl Subscription {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn recv(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(&self.name, self.id);
    }
}
