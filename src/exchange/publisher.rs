//! Out-of-band publication of committed cluster-changed events.
//!
//! The dispatcher queues at most one pending event; queueing over an
//! undelivered event replaces it (latest wins, by design of the one-slot
//! protocol: downstream consumers only ever need the newest committed view).
//! A dedicated worker delivers events to registered listeners, so listener
//! callbacks run outside the exchange lock and may freely re-enter exchange
//! accessors.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use tokio::sync::Notify;
use tracing::debug;

use crate::constants::EVENT_LISTENER_MAX;

use super::event::ClusterChangedEvent;

/// Listener invoked on the publisher worker for every committed membership.
pub type ClusterChangedListener = Box<dyn Fn(&ClusterChangedEvent) + Send + Sync>;

/// One-slot, latest-wins event publisher.
pub(crate) struct EventPublisher {
    pending: Mutex<Option<ClusterChangedEvent>>,
    listeners: RwLock<Vec<ClusterChangedListener>>,
    notify: Notify,
    shutting_down: AtomicBool,
}

impl EventPublisher {
    pub fn new() -> Self {
        EventPublisher {
            pending: Mutex::new(None),
            listeners: RwLock::new(Vec::with_capacity(EVENT_LISTENER_MAX)),
            notify: Notify::new(),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Register a listener.
    ///
    /// # Panics
    ///
    /// Panics when the fixed listener capacity is exceeded; the cap is a
    /// structural limit, not a runtime condition.
    pub fn register_listener(&self, listener: ClusterChangedListener) {
        let mut listeners = self.listeners.write().expect("listener lock poisoned");
        assert!(
            listeners.len() < EVENT_LISTENER_MAX,
            "cannot register more than {} event listeners",
            EVENT_LISTENER_MAX
        );
        listeners.push(listener);
    }

    /// Queue an event for delivery, replacing any undelivered one.
    pub fn queue(&self, event: ClusterChangedEvent) {
        let replaced = self
            .pending
            .lock()
            .expect("pending event lock poisoned")
            .replace(event)
            .is_some();
        if replaced {
            debug!("coalesced undelivered cluster-changed event");
        }
        self.notify.notify_one();
    }

    /// Ask the worker to exit. Idempotent.
    pub fn stop(&self) {
        self.shutting_down.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    /// Worker loop: deliver pending events until shutdown.
    pub async fn run(&self) {
        loop {
            self.notify.notified().await;
            if self.shutting_down.load(Ordering::Acquire) {
                debug!("event publisher shutting down");
                break;
            }
            self.publish_pending();
        }
    }

    fn publish_pending(&self) {
        let event = self
            .pending
            .lock()
            .expect("pending event lock poisoned")
            .take();
        let Some(event) = event else {
            return;
        };

        debug!(
            cluster_key = %event.cluster_key,
            cluster_size = event.cluster_size(),
            "publishing cluster-changed event"
        );
        let listeners = self.listeners.read().expect("listener lock poisoned");
        for listener in listeners.iter() {
            listener(&event);
        }
    }
}
