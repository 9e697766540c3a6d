//! The phone: top-level call orchestrator
//!
//! A [`Phone`] owns one [`DeviceRegistry`] and one [`RealtimeChannel`],
//! creates and tracks [`CallSession`](crate::call::CallSession)s and
//! republishes their lifecycle to subscribers.
//!
//! # Architecture
//!
//! - **`builder`** - [`PhoneBuilder`], assembles collaborators and config
//! - **`registration`** - `register()` / `deregister()` composites
//! - **`calls`** - `dial()`, session lookups, local media
//! - **`dispatch`** - the task that consumes realtime events and gates
//!   incoming-call notifications on `registered && connected`
//! - **`registry`** - the active session registry
//! - **`recovery`** - retry and timeout helpers
//!
//! # Usage
//!
//! ```rust,ignore
//! let phone = PhoneBuilder::new()
//!     .credentials(Credentials::new("kirk@example.com", token))
//!     .directory(directory)
//!     .transport(transport)
//!     .media(media)
//!     .resolver(resolver)
//!     .signaling(signaling)
//!     .build()
//!     .await?;
//!
//! phone.register().await?;
//!
//! let call = phone.dial("spock@example.com", DialOptions::new())?;
//! call.wait_for_state(CallState::Connected).await?;
//! call.hangup().await?;
//! ```

mod builder;
mod calls;
mod dispatch;
pub mod recovery;
mod registration;
pub(crate) mod registry;
pub(crate) mod status;

pub use builder::PhoneBuilder;
pub use calls::DialOptions;
pub use status::PhoneStatus;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::call::{CallDirection, CallState, SessionContext};
use crate::config::PhoneConfig;
use crate::device::{DeviceDescriptor, DeviceRegistry};
use crate::events::{EventEmitter, PhoneEvent, PhoneEventHandler};
use crate::media::MediaAcquirer;
use crate::mercury::{RealtimeChannel, RealtimeConnectionState};
use crate::signaling::CallSignaling;

use dispatch::InboundSignal;
use registry::CallRegistry;

/// Snapshot of a phone's calls and connectivity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneStats {
    pub registered: bool,
    pub connected: bool,
    pub active_calls: usize,
    pub connected_calls: usize,
    /// Inbound calls not yet answered
    pub ringing_calls: usize,
    pub outbound_calls: usize,
    pub inbound_calls: usize,
}

/// Calling client: device registration, realtime channel and call sessions
pub struct Phone {
    config: PhoneConfig,
    device: DeviceRegistry,
    channel: RealtimeChannel,
    media: MediaAcquirer,
    signaling: Arc<dyn CallSignaling>,
    emitter: Arc<EventEmitter>,
    registry: Arc<CallRegistry>,
    ctx: SessionContext,
    inbox: mpsc::UnboundedSender<InboundSignal>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl Phone {
    pub fn config(&self) -> &PhoneConfig {
        &self.config
    }

    /// A device descriptor is present
    pub fn registered(&self) -> bool {
        self.device.is_registered()
    }

    /// The realtime channel is connected
    pub fn connected(&self) -> bool {
        self.channel.is_connected()
    }

    pub fn status(&self) -> PhoneStatus {
        self.ctx.status.current()
    }

    pub fn device(&self) -> Option<DeviceDescriptor> {
        self.device.descriptor()
    }

    pub fn connection_state(&self) -> RealtimeConnectionState {
        self.channel.state()
    }

    /// Identity of the local user as it appears in call participants
    pub fn user_id(&self) -> &str {
        &self.device.credentials().user_id
    }

    /// Register a handler; handlers run in subscription order
    pub fn subscribe(&self, handler: Arc<dyn PhoneEventHandler>) -> Uuid {
        self.emitter.subscribe(handler)
    }

    pub fn unsubscribe(&self, subscription_id: Uuid) -> bool {
        self.emitter.unsubscribe(subscription_id)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PhoneEvent> {
        self.emitter.subscribe_events()
    }

    pub fn stats(&self) -> PhoneStats {
        let status = self.status();
        PhoneStats {
            registered: status.registered,
            connected: status.connected,
            active_calls: self.registry.len(),
            connected_calls: self.registry.count(|_, state| state.is_active()),
            ringing_calls: self.registry.count(|direction, state| {
                direction == CallDirection::Inbound && state == CallState::Negotiating
            }),
            outbound_calls: self.registry.count(|direction, _| direction == CallDirection::Outbound),
            inbound_calls: self.registry.count(|direction, _| direction == CallDirection::Inbound),
        }
    }
}

impl Drop for Phone {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.lock().take() {
            dispatcher.abort();
        }
    }
}

impl fmt::Debug for Phone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Phone")
            .field("user_id", &self.user_id())
            .field("status", &self.status())
            .field("active_calls", &self.registry.len())
            .finish()
    }
}
