use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{PhoneError, PhoneResult};
use crate::media::{FacingMode, MediaConstraints};

/// Configuration for a [`Phone`](crate::phone::Phone) instance
///
/// Passed once at construction; nothing in the crate reads ambient
/// global defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoneConfig {
    /// Human readable device name announced to the directory service
    pub device_name: String,
    /// Camera applied to video requests that do not name one
    pub default_facing_mode: FacingMode,
    /// Constraints used by `dial`/`answer` when the caller gives none
    pub default_constraints: MediaConstraints,
    /// Ceiling on an offer/answer exchange before it is treated as stalled
    pub negotiation_timeout: Duration,
    /// Ceiling on teardown signaling during hangup
    pub teardown_timeout: Duration,
    /// Capacity of the broadcast channels carrying phone and call events
    pub event_channel_capacity: usize,
    /// Ask the signaling service for calls already ringing this user on register
    pub fetch_active_calls_on_register: bool,
}

impl PhoneConfig {
    /// Create a new phone configuration with defaults
    pub fn new() -> Self {
        Self {
            device_name: format!("phone-core/{}", crate::VERSION),
            default_facing_mode: FacingMode::User,
            default_constraints: MediaConstraints::audio_video(),
            negotiation_timeout: Duration::from_secs(30),
            teardown_timeout: Duration::from_secs(5),
            event_channel_capacity: 100,
            fetch_active_calls_on_register: true,
        }
    }

    /// Set device name
    pub fn with_device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Set the default camera facing mode
    pub fn with_default_facing_mode(mut self, facing_mode: FacingMode) -> Self {
        self.default_facing_mode = facing_mode;
        self
    }

    /// Set default media constraints
    pub fn with_default_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.default_constraints = constraints;
        self
    }

    /// Set negotiation timeout
    pub fn with_negotiation_timeout(mut self, timeout: Duration) -> Self {
        self.negotiation_timeout = timeout;
        self
    }

    /// Set teardown timeout
    pub fn with_teardown_timeout(mut self, timeout: Duration) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    /// Set event channel capacity
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity;
        self
    }

    /// Enable or disable fetching active calls during register
    pub fn with_fetch_active_calls(mut self, enabled: bool) -> Self {
        self.fetch_active_calls_on_register = enabled;
        self
    }

    /// Reject values the orchestrator cannot run with
    pub fn validate(&self) -> PhoneResult<()> {
        if self.negotiation_timeout.is_zero() {
            return Err(PhoneError::invalid_configuration(
                "negotiation_timeout",
                "must be greater than zero",
            ));
        }
        if self.teardown_timeout.is_zero() {
            return Err(PhoneError::invalid_configuration(
                "teardown_timeout",
                "must be greater than zero",
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(PhoneError::invalid_configuration(
                "event_channel_capacity",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl Default for PhoneConfig {
    fn default() -> Self {
        Self::new()
    }
}
