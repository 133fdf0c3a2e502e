//! In-process transport.
//!
//! [`InMemoryTransport`] implements both transport traits. `publish` awaits
//! every matching callback in registration order before returning, so a
//! publisher queue does not move on until the subscribers have accepted the
//! envelope.

use crate::framework::{BoxError, BundleKey, Envelope, MessageType, Topic};
use crate::transport::{DeliveryCallback, SubscriptionHandle, TransportPublisher, TransportSubscriber};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tracing::trace;

#[derive(Default)]
struct Registry {
    routes: Mutex<HashMap<BundleKey, Vec<(u64, DeliveryCallback)>>>,
    next_id: AtomicU64,
    published: AtomicUsize,
}

impl Registry {
    fn remove(&self, key: &BundleKey, id: u64) {
        let mut routes = self.routes.lock();
        if let Some(callbacks) = routes.get_mut(key) {
            callbacks.retain(|(existing, _)| *existing != id);
            if callbacks.is_empty() {
                routes.remove(key);
            }
        }
    }
}

/// Cloning shares the same registry.
#[derive(Clone, Default)]
pub struct InMemoryTransport {
    registry: Arc<Registry>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live registrations across all keys.
    pub fn subscriber_count(&self) -> usize {
        self.registry.routes.lock().values().map(Vec::len).sum()
    }

    /// Envelopes accepted by `publish` so far.
    pub fn published(&self) -> usize {
        self.registry.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TransportPublisher for InMemoryTransport {
    async fn publish(&self, envelope: Envelope) -> Result<(), BoxError> {
        let key = BundleKey {
            message_type: envelope.message_type(),
            topic: envelope.topic().cloned(),
        };
        let callbacks: Vec<DeliveryCallback> = self
            .registry
            .routes
            .lock()
            .get(&key)
            .map(|callbacks| callbacks.iter().map(|(_, cb)| cb.clone()).collect())
            .unwrap_or_default();
        self.registry.published.fetch_add(1, Ordering::Relaxed);
        trace!(message_type = %key.message_type, receivers = callbacks.len(), "In-memory publish");

        for callback in callbacks {
            callback(envelope.clone()).await;
        }
        Ok(())
    }
}

struct MemorySubscription {
    registry: Weak<Registry>,
    key: BundleKey,
    id: u64,
}

impl SubscriptionHandle for MemorySubscription {
    fn unsubscribe(self: Box<Self>) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.key, self.id);
        }
    }
}

impl TransportSubscriber for InMemoryTransport {
    fn subscribe(
        &self,
        message_type: MessageType,
        topic: Option<Topic>,
        callback: DeliveryCallback,
    ) -> Result<Box<dyn SubscriptionHandle>, BoxError> {
        let key = BundleKey {
            message_type,
            topic,
        };
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry
            .routes
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, callback));
        Ok(Box::new(MemorySubscription {
            registry: Arc::downgrade(&self.registry),
            key,
            id,
        }))
    }
}

impl std::fmt::Debug for InMemoryTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryTransport")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published())
            .finish()
    }
}
