//! Event handling for phone-core
//!
//! Two delivery paths exist side by side, mirroring how applications tend
//! to consume events:
//!
//! - [`Phone::subscribe_events`](crate::phone::Phone::subscribe_events)
//!   hands out a `tokio::sync::broadcast` receiver.
//! - [`PhoneEventHandler`] implementations registered with
//!   [`Phone::subscribe`](crate::phone::Phone::subscribe) are awaited one
//!   after another, in subscription order, before the next event is
//!   emitted.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::call::{CallHandle, CallId, CallState};
use crate::error::PhoneError;
use crate::locus::Locus;

/// Events published by a [`Phone`](crate::phone::Phone)
#[derive(Debug, Clone)]
pub enum PhoneEvent {
    /// An inbound call is ringing; only emitted while registered and connected
    IncomingCall { call: CallHandle },
    RegistrationChanged { registered: bool },
    ConnectionChanged { connected: bool },
    CallStateChanged {
        call_id: CallId,
        previous: CallState,
        state: CallState,
    },
}

impl PhoneEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PhoneEvent::IncomingCall { .. } => "call:incoming",
            PhoneEvent::RegistrationChanged { .. } => "change:registered",
            PhoneEvent::ConnectionChanged { .. } => "change:connected",
            PhoneEvent::CallStateChanged { .. } => "call:state",
        }
    }
}

/// Events published by a single call session
#[derive(Debug, Clone)]
pub enum CallEvent {
    StateChanged { previous: CallState, state: CallState },
    /// The shared session record changed
    LocusChanged { locus: Locus },
    Error { error: PhoneError },
}

impl CallEvent {
    pub fn name(&self) -> &'static str {
        match self {
            CallEvent::StateChanged { .. } => "change:state",
            CallEvent::LocusChanged { .. } => "change:locus",
            CallEvent::Error { .. } => "error",
        }
    }
}

#[async_trait]
pub trait PhoneEventHandler: Send + Sync {
    async fn on_incoming_call(&self, call: CallHandle);

    async fn on_registration_changed(&self, _registered: bool) {}

    async fn on_connection_changed(&self, _connected: bool) {}

    async fn on_call_state_changed(&self, _call_id: CallId, _previous: CallState, _state: CallState) {}

    async fn on_phone_event(&self, event: PhoneEvent) {
        match event {
            PhoneEvent::IncomingCall { call } => self.on_incoming_call(call).await,
            PhoneEvent::RegistrationChanged { registered } => self.on_registration_changed(registered).await,
            PhoneEvent::ConnectionChanged { connected } => self.on_connection_changed(connected).await,
            PhoneEvent::CallStateChanged {
                call_id,
                previous,
                state,
            } => self.on_call_state_changed(call_id, previous, state).await,
        }
    }
}

struct Subscription {
    id: Uuid,
    handler: Arc<dyn PhoneEventHandler>,
}

/// Per-phone publish/subscribe registry
pub struct EventEmitter {
    subscriptions: RwLock<Vec<Subscription>>,
    broadcast: broadcast::Sender<PhoneEvent>,
}

impl EventEmitter {
    pub fn new(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            subscriptions: RwLock::new(Vec::new()),
            broadcast,
        }
    }

    pub fn subscribe(&self, handler: Arc<dyn PhoneEventHandler>) -> Uuid {
        let id = Uuid::new_v4();
        self.subscriptions.write().push(Subscription { id, handler });
        id
    }

    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        let mut subscriptions = self.subscriptions.write();
        match subscriptions.iter().position(|s| s.id == subscription_id) {
            Some(pos) => {
                subscriptions.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PhoneEvent> {
        self.broadcast.subscribe()
    }

    /// Publish to the broadcast channel, then await each handler in order
    pub async fn emit(&self, event: PhoneEvent) {
        tracing::debug!(event = event.name(), "Emitting phone event");

        let _ = self.broadcast.send(event.clone());

        let handlers: Vec<Arc<dyn PhoneEventHandler>> =
            self.subscriptions.read().iter().map(|s| s.handler.clone()).collect();
        for handler in handlers {
            handler.on_phone_event(event.clone()).await;
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(100)
    }
}
