//! Call signaling API boundary and realtime payloads
//!
//! Request/response calls (create, answer, decline, leave, list) go through
//! [`CallSignaling`]. Pushes from the backend arrive as
//! [`SignalingEvent`]s whose payloads decode into [`CallInvite`] or
//! [`CallUpdate`].

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::device::DeviceDescriptor;
use crate::error::{PhoneError, PhoneResult};
use crate::locus::Locus;
use crate::mercury::{SignalingEvent, SignalingEventType};
use crate::sdp::SessionDescription;
use crate::target::ResolvedTarget;

/// A call ringing the local user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallInvite {
    pub locus: Locus,
    pub offer: SessionDescription,
}

/// A change to an existing call, optionally carrying the remote answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallUpdate {
    pub locus: Locus,
    #[serde(default)]
    pub answer: Option<SessionDescription>,
}

impl CallInvite {
    pub fn into_event(self) -> PhoneResult<SignalingEvent> {
        let session_id = self.locus.url.clone();
        let payload = serde_json::to_value(&self).map_err(|e| PhoneError::internal_error(e.to_string()))?;
        Ok(SignalingEvent {
            event_type: SignalingEventType::CallInvite,
            session_id,
            payload,
        })
    }

    pub fn from_event(event: &SignalingEvent) -> PhoneResult<Self> {
        serde_json::from_value(event.payload.clone())
            .map_err(|e| PhoneError::signaling_failed(format!("malformed call invite: {}", e)))
    }
}

impl CallUpdate {
    pub fn into_event(self, event_type: SignalingEventType) -> PhoneResult<SignalingEvent> {
        let session_id = self.locus.url.clone();
        let payload = serde_json::to_value(&self).map_err(|e| PhoneError::internal_error(e.to_string()))?;
        Ok(SignalingEvent {
            event_type,
            session_id,
            payload,
        })
    }

    pub fn from_event(event: &SignalingEvent) -> PhoneResult<Self> {
        serde_json::from_value(event.payload.clone())
            .map_err(|e| PhoneError::signaling_failed(format!("malformed call update: {}", e)))
    }
}

/// External call signaling boundary (the backend's HTTP API)
#[async_trait]
pub trait CallSignaling: Send + Sync {
    /// Create a call to `target` carrying the local offer
    async fn create_call(
        &self,
        device: &DeviceDescriptor,
        target: &ResolvedTarget,
        offer: &SessionDescription,
    ) -> anyhow::Result<Locus>;

    /// Join an existing call with the local answer
    async fn answer_call(
        &self,
        device: &DeviceDescriptor,
        locus_url: &str,
        answer: &SessionDescription,
    ) -> anyhow::Result<Locus>;

    async fn decline_call(&self, device: &DeviceDescriptor, locus_url: &str) -> anyhow::Result<Locus>;

    async fn leave_call(&self, locus_url: &str) -> anyhow::Result<Locus>;

    /// Calls currently ringing or active for the registered device's user
    async fn list_active_calls(&self, device: &DeviceDescriptor) -> anyhow::Result<Vec<CallInvite>>;
}
