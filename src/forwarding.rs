//! Request-forwarding dispatcher.
//!
//! Every inbound actor call passes through here. The dispatcher consults the
//! orchestrator and serves the call locally, forwards it unchanged to the
//! remote side, or rejects it with a retryable error. A forwarded-once
//! marker breaks the loop that would otherwise form while both sides are in
//! their downtime window.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use uuid::Uuid;

use crate::error::{MigrationError, Result};
use crate::events::{ActorEvent, EventCallback, EventSubscriptionCache};
use crate::orchestrator::Orchestrator;
use crate::telemetry::Telemetry;

/// One inbound actor method call
#[derive(Debug, Clone)]
pub struct ActorCall {
    /// Target actor identity
    pub actor_id: String,
    /// Actor interface the method belongs to
    pub interface_id: u32,
    /// Method within the interface
    pub method_id: u32,
    /// Opaque request payload, never re-encoded by the dispatcher
    pub payload: Bytes,
    /// Whether the call was already forwarded once
    pub forwarded: bool,
}

impl ActorCall {
    /// Build a call that has not been forwarded yet
    pub fn new(actor_id: impl Into<String>, interface_id: u32, method_id: u32, payload: Bytes) -> Self {
        ActorCall {
            actor_id: actor_id.into(),
            interface_id,
            method_id,
            payload,
            forwarded: false,
        }
    }
}

/// Response to an actor call, returned byte-for-byte to the original caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorCallResponse {
    /// Opaque response payload
    pub payload: Bytes,
}

/// Local actor runtime the dispatcher hands allowed calls to
#[async_trait]
pub trait ActorCallHandler: Send + Sync {
    /// Dispatch a call to the local actor implementation
    async fn handle(&self, call: ActorCall) -> Result<ActorCallResponse>;
}

/// Client for the remote service on the other side of the migration
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Forward a call unchanged and return the remote response unchanged
    async fn forward(&self, call: ActorCall) -> Result<ActorCallResponse>;
}

/// Per-call routing layer between the transport and the actor runtime
pub struct RequestDispatcher {
    orchestrator: Arc<dyn Orchestrator>,
    local: Arc<dyn ActorCallHandler>,
    remote: Arc<dyn RemoteClient>,
    local_events: Arc<dyn EventCallback>,
    subscriptions: Arc<EventSubscriptionCache>,
    telemetry: Arc<dyn Telemetry>,
}

impl RequestDispatcher {
    /// Create a dispatcher over the injected collaborators
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        local: Arc<dyn ActorCallHandler>,
        remote: Arc<dyn RemoteClient>,
        local_events: Arc<dyn EventCallback>,
        subscriptions: Arc<EventSubscriptionCache>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        RequestDispatcher {
            orchestrator,
            local,
            remote,
            local_events,
            subscriptions,
            telemetry,
        }
    }

    /// The subscription cache shared with the host
    pub fn subscriptions(&self) -> &Arc<EventSubscriptionCache> {
        &self.subscriptions
    }

    /// Route one inbound call.
    ///
    /// A call that must be forwarded but already carries the forwarded
    /// marker means both sides are fenced, it is rejected with a retryable
    /// error instead of bouncing again. A call admitted here may still
    /// observe the transition into downtime while executing; that also
    /// surfaces as the retryable error, never as silent loss.
    pub async fn dispatch(&self, mut call: ActorCall) -> Result<ActorCallResponse> {
        if self.orchestrator.is_call_to_be_forwarded() {
            if call.forwarded {
                self.telemetry.call_rejected(&call.actor_id);
                return Err(MigrationError::CallsDisallowed);
            }
            call.forwarded = true;
            self.telemetry.call_forwarded(&call.actor_id);
            return self.remote.forward(call).await;
        }
        self.orchestrator.ensure_actor_calls_allowed()?;
        self.local.handle(call).await
    }

    /// Intercept a subscribe call before any forwarding.
    ///
    /// The subscription is cached locally regardless of which side serves
    /// the actor, so no subscriber registered around the cutover is dropped.
    pub fn subscribe(
        &self,
        actor_id: &str,
        interface_id: u32,
        subscription_id: Uuid,
        callback: Arc<dyn EventCallback>,
    ) {
        self.subscriptions
            .subscribe(actor_id, interface_id, subscription_id, callback);
    }

    /// Intercept an unsubscribe call, returning whether it was registered
    pub fn unsubscribe(&self, actor_id: &str, interface_id: u32, subscription_id: Uuid) -> bool {
        self.subscriptions
            .unsubscribe(actor_id, interface_id, subscription_id)
    }

    /// Fan one actor event out to the local subscriber manager and every
    /// cached remote subscriber. Returns how many deliveries succeeded.
    pub async fn publish_event(&self, event: ActorEvent) -> usize {
        let mut delivered = 0;
        match self.local_events.deliver(event.clone()).await {
            Ok(()) => delivered += 1,
            Err(err) => log::warn!(
                "local event delivery failed actor={} error={}",
                event.actor_id,
                err
            ),
        }
        delivered + self.subscriptions.fan_out(&event).await
    }
}
