use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::device::DeviceDescriptor;
use crate::mercury::RealtimeConnectionState;

/// Derived connectivity of a phone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhoneStatus {
    /// A device descriptor is present
    pub registered: bool,
    /// The realtime channel is connected
    pub connected: bool,
}

impl PhoneStatus {
    /// Both halves are up; inbound calls may be announced
    pub fn is_ready(&self) -> bool {
        self.registered && self.connected
    }
}

/// Read-only view over the registry and channel state
#[derive(Clone)]
pub(crate) struct StatusWatch {
    device: watch::Receiver<Option<DeviceDescriptor>>,
    channel: watch::Receiver<RealtimeConnectionState>,
}

impl StatusWatch {
    pub(crate) fn new(
        device: watch::Receiver<Option<DeviceDescriptor>>,
        channel: watch::Receiver<RealtimeConnectionState>,
    ) -> Self {
        Self { device, channel }
    }

    pub(crate) fn current(&self) -> PhoneStatus {
        PhoneStatus {
            registered: self.device.borrow().is_some(),
            connected: *self.channel.borrow() == RealtimeConnectionState::Connected,
        }
    }

    pub(crate) fn device(&self) -> Option<DeviceDescriptor> {
        self.device.borrow().clone()
    }
}
