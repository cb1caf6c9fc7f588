//! Actor-event subscription cache.
//!
//! Subscriptions recorded at the forwarding boundary survive cutover, so
//! one-way event messages keep reaching subscribers registered before or
//! during the migration. The map is sharded per (actor, interface), so
//! subscribe, unsubscribe and lookup never contend globally.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::Result;

/// One published actor event
#[derive(Debug, Clone)]
pub struct ActorEvent {
    /// Actor that raised the event
    pub actor_id: String,
    /// Event interface the subscription was made against
    pub interface_id: u32,
    /// Opaque event payload
    pub payload: Bytes,
}

/// Client capable of delivering events back to a subscriber
#[async_trait]
pub trait EventCallback: Send + Sync {
    /// Deliver one event, one-way
    async fn deliver(&self, event: ActorEvent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SubscriptionScope {
    actor_id: String,
    interface_id: u32,
}

/// Cache of remote event subscribers keyed by actor and interface
pub struct EventSubscriptionCache {
    entries: DashMap<SubscriptionScope, HashMap<Uuid, Arc<dyn EventCallback>>>,
}

impl EventSubscriptionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        EventSubscriptionCache {
            entries: DashMap::new(),
        }
    }

    /// Record a subscription, replacing any previous one with the same id
    pub fn subscribe(
        &self,
        actor_id: &str,
        interface_id: u32,
        subscription_id: Uuid,
        callback: Arc<dyn EventCallback>,
    ) {
        let scope = SubscriptionScope {
            actor_id: actor_id.to_string(),
            interface_id,
        };
        self.entries
            .entry(scope)
            .or_default()
            .insert(subscription_id, callback);
    }

    /// Drop a subscription, returning whether it existed
    pub fn unsubscribe(&self, actor_id: &str, interface_id: u32, subscription_id: Uuid) -> bool {
        let scope = SubscriptionScope {
            actor_id: actor_id.to_string(),
            interface_id,
        };
        match self.entries.get_mut(&scope) {
            Some(mut subscribers) => subscribers.remove(&subscription_id).is_some(),
            None => false,
        }
    }

    /// Current subscribers for an actor and interface
    pub fn subscribers(&self, actor_id: &str, interface_id: u32) -> Vec<Arc<dyn EventCallback>> {
        let scope = SubscriptionScope {
            actor_id: actor_id.to_string(),
            interface_id,
        };
        self.entries
            .get(&scope)
            .map(|subscribers| subscribers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Total number of cached subscriptions
    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    /// Whether the cache holds no subscriptions
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver an event to every cached subscriber of its scope.
    ///
    /// Delivery is one-way. Individual failures are logged and skipped so a
    /// dead subscriber never blocks the rest.
    pub async fn fan_out(&self, event: &ActorEvent) -> usize {
        let mut delivered = 0;
        for callback in self.subscribers(&event.actor_id, event.interface_id) {
            match callback.deliver(event.clone()).await {
                Ok(()) => delivered += 1,
                Err(err) => log::warn!(
                    "event delivery failed actor={} interface={} error={}",
                    event.actor_id,
                    event.interface_id,
                    err
                ),
            }
        }
        delivered
    }
}

impl Default for EventSubscriptionCache {
    fn default() -> Self {
        Self::new()
    }
}
