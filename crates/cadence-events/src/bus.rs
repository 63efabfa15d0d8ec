use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::{debug, warn};

use crate::types::{EntityEvent, Subscription};

/// Process-wide registry and dispatcher of entity change notifications.
///
/// Share one instance across the process behind an `Arc<EventBus>`.
pub struct EventBus {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
        }
    }

    /// Register a subscription. A subscription with the same name is replaced,
    /// so each named subscriber exists at most once.
    pub fn subscribe(&self, subscription: Subscription) {
        let mut subs = self.subscriptions.write().expect("event bus poisoned");
        subs.retain(|s| s.name != subscription.name);
        debug!(
            name = %subscription.name,
            entity = ?subscription.entity,
            kind = ?subscription.kind,
            "subscriber registered"
        );
        subs.push(subscription);
    }

    /// Remove a subscription by name. Silent no-op if the name is not found.
    pub fn unsubscribe(&self, name: &str) {
        let mut subs = self.subscriptions.write().expect("event bus poisoned");
        let before = subs.len();
        subs.retain(|s| s.name != name);
        if subs.len() < before {
            debug!(name, "subscriber removed");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.read().expect("event bus poisoned").len()
    }

    /// Fire-and-forget: each matching subscriber runs on its own Tokio task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn publish(&self, event: EntityEvent) {
        for sub in self.matching(&event) {
            let event = event.clone();
            tokio::spawn(async move {
                run_subscriber(&sub, &event).await;
            });
        }
    }

    /// Deliver `event` to every matching subscriber in registration order and
    /// wait for all of them. Returns the number of subscribers that handled it
    /// without error.
    pub async fn dispatch(&self, event: &EntityEvent) -> usize {
        let mut delivered = 0;
        for sub in self.matching(event) {
            if run_subscriber(&sub, event).await {
                delivered += 1;
            }
        }
        delivered
    }

    /// Clone the matching subscriptions so no lock is held across an await.
    fn matching(&self, event: &EntityEvent) -> Vec<Subscription> {
        let subs = self.subscriptions.read().expect("event bus poisoned");
        subs.iter()
            .filter(|s| event.matches(s.entity, s.kind))
            .cloned()
            .collect()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_subscriber(sub: &Subscription, event: &EntityEvent) -> bool {
    let t = Instant::now();
    let subscriber = Arc::clone(&sub.subscriber);
    let result = subscriber.handle(event).await;
    let elapsed_ms = t.elapsed().as_millis() as u64;

    match result {
        Ok(()) => {
            debug!(
                subscriber = %sub.name,
                entity_id = %event.entity_id,
                duration_ms = elapsed_ms,
                "event handled"
            );
            true
        }
        Err(e) => {
            warn!(
                subscriber = %sub.name,
                entity_id = %event.entity_id,
                duration_ms = elapsed_ms,
                error = %e,
                "subscriber failed"
            );
            false
        }
    }
}
