//! Realtime signaling channel ("Mercury")
//!
//! A persistent push connection addressed by the registered device. The
//! channel forwards every signaling event the transport delivers into a
//! single unbounded queue that lives as long as the channel itself, so the
//! consumer sees one uninterrupted stream across reconnects.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::device::DeviceDescriptor;
use crate::error::{PhoneError, PhoneResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RealtimeConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalingEventType {
    CallInvite,
    CallUpdate,
    ParticipantChange,
}

/// Tagged message delivered by the realtime transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalingEvent {
    #[serde(rename = "type")]
    pub event_type: SignalingEventType,
    /// Locus URL of the call the event belongs to
    pub session_id: String,
    pub payload: serde_json::Value,
}

/// External realtime transport boundary
#[async_trait]
pub trait RealtimeTransport: Send + Sync {
    /// Complete the handshake and return the inbound event stream.
    ///
    /// The stream ending means the transport dropped the connection.
    async fn connect(&self, device: &DeviceDescriptor) -> anyhow::Result<BoxStream<'static, SignalingEvent>>;

    async fn disconnect(&self) -> anyhow::Result<()>;
}

pub struct RealtimeChannel {
    transport: Arc<dyn RealtimeTransport>,
    state: Arc<watch::Sender<RealtimeConnectionState>>,
    events_tx: mpsc::UnboundedSender<SignalingEvent>,
    events_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<SignalingEvent>>>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    op_lock: Mutex<()>,
}

impl RealtimeChannel {
    pub fn new(transport: Arc<dyn RealtimeTransport>) -> Self {
        let (state, _) = watch::channel(RealtimeConnectionState::Disconnected);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            state: Arc::new(state),
            events_tx,
            events_rx: parking_lot::Mutex::new(Some(events_rx)),
            pump: parking_lot::Mutex::new(None),
            op_lock: Mutex::new(()),
        }
    }

    /// Connect using the device's routing; a no-op when already connected.
    pub async fn connect(&self, device: Option<&DeviceDescriptor>) -> PhoneResult<()> {
        let _guard = self.op_lock.lock().await;

        if self.state() == RealtimeConnectionState::Connected {
            tracing::debug!("Realtime channel already connected");
            return Ok(());
        }

        let device = device.ok_or(PhoneError::NotRegistered)?;

        self.state.send_replace(RealtimeConnectionState::Connecting);
        tracing::info!(user_id = %device.user_id, "Connecting realtime channel");

        let mut stream = match self.transport.connect(device).await {
            Ok(stream) => stream,
            Err(e) => {
                self.state.send_replace(RealtimeConnectionState::Disconnected);
                tracing::warn!(error = %e, "Realtime handshake failed");
                return Err(PhoneError::connection_failed(e.to_string()));
            }
        };

        self.state.send_replace(RealtimeConnectionState::Connected);

        let tx = self.events_tx.clone();
        let state = self.state.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = stream.next().await {
                tracing::trace!(event_type = ?event.event_type, session_id = %event.session_id, "Realtime event");
                if tx.send(event).is_err() {
                    break;
                }
            }
            tracing::warn!("Realtime transport closed the connection");
            state.send_replace(RealtimeConnectionState::Disconnected);
        });

        if let Some(previous) = self.pump.lock().replace(pump) {
            previous.abort();
        }

        tracing::info!("Realtime channel connected");
        Ok(())
    }

    /// Drop the connection; a no-op when already disconnected.
    pub async fn disconnect(&self) -> PhoneResult<()> {
        let _guard = self.op_lock.lock().await;

        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }

        if self.state() == RealtimeConnectionState::Disconnected {
            tracing::debug!("Realtime channel already disconnected");
            return Ok(());
        }

        if let Err(e) = self.transport.disconnect().await {
            tracing::warn!(error = %e, "Transport disconnect reported an error");
        }

        self.state.send_replace(RealtimeConnectionState::Disconnected);
        tracing::info!("Realtime channel disconnected");
        Ok(())
    }

    pub fn state(&self) -> RealtimeConnectionState {
        *self.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == RealtimeConnectionState::Connected
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RealtimeConnectionState> {
        self.state.subscribe()
    }

    /// Take the inbound event stream. Only the first caller gets it.
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<SignalingEvent>> {
        self.events_rx.lock().take()
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.lock().take() {
            pump.abort();
        }
    }
}

impl fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("transport", &"<realtime transport>")
            .field("state", &self.state())
            .finish()
    }
}
