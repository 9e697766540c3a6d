//! Error types and handling for the phone-core library
//!
//! Every public operation returns [`PhoneResult`]. Errors are grouped so
//! that callers can pick a recovery strategy without string matching:
//!
//! - **Registration errors** - the directory exchange failed; nothing was stored
//! - **Connection errors** - the realtime handshake failed; `connected()` stays false
//! - **Target errors** - a dial identifier could not be classified or resolved
//! - **Media errors** - capture was denied or no common media could be negotiated
//! - **State errors** - the operation is not valid for the session's current state
//!
//! # Error Handling Guide
//!
//! ```rust,ignore
//! match phone.register().await {
//!     Ok(()) => {}
//!     Err(PhoneError::ConnectionFailed { reason }) => {
//!         // The device is registered; only the realtime channel is down.
//!         // Calling register() again reconnects without re-registering.
//!         warn!(%reason, "realtime channel unavailable");
//!     }
//!     Err(e) if e.is_recoverable() => { /* back off and retry */ }
//!     Err(e) => return Err(e),
//! }
//! ```
//!
//! Idempotent operations (`register`, `deregister`, a redundant `hangup`)
//! never return an error just because they were invoked twice.

use thiserror::Error;
use uuid::Uuid;

use crate::call::CallState;

/// Result type alias for phone-core operations
pub type PhoneResult<T> = Result<T, PhoneError>;

/// Error taxonomy for device registration, the realtime channel and calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PhoneError {
    /// Registration related errors
    #[error("Registration failed: {reason}")]
    RegistrationFailed { reason: String },

    #[error("Not registered with the directory service")]
    NotRegistered,

    /// Realtime channel errors
    #[error("Realtime connection failed: {reason}")]
    ConnectionFailed { reason: String },

    /// Dial target errors
    #[error("Could not resolve call target '{target}': {reason}")]
    TargetResolutionFailed { target: String, reason: String },

    /// Media related errors
    #[error("Media acquisition failed: {reason}")]
    MediaAcquisitionFailed { reason: String },

    #[error("Negotiation failed: {reason}")]
    NegotiationFailed { reason: String },

    #[error("No common media capability between offer and answer")]
    NoCommonMedia,

    /// Call related errors
    #[error("Call not found: {call_id}")]
    CallNotFound { call_id: Uuid },

    #[error("Invalid call state for call {call_id}: current state is {current_state:?}")]
    InvalidCallState {
        call_id: Uuid,
        current_state: CallState,
    },

    #[error("Signaling request failed: {reason}")]
    SignalingFailed { reason: String },

    /// Configuration errors
    #[error("Invalid configuration: {field} - {reason}")]
    InvalidConfiguration { field: String, reason: String },

    /// Generic errors
    #[error("Operation timeout after {duration_ms}ms")]
    OperationTimeout { duration_ms: u64 },

    #[error("Internal error: {message}")]
    InternalError { message: String },
}

impl PhoneError {
    /// Create a registration failed error
    pub fn registration_failed(reason: impl Into<String>) -> Self {
        Self::RegistrationFailed { reason: reason.into() }
    }

    /// Create a realtime connection failed error
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::ConnectionFailed { reason: reason.into() }
    }

    /// Create a target resolution error
    pub fn target_resolution_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TargetResolutionFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a media acquisition error
    pub fn media_acquisition_failed(reason: impl Into<String>) -> Self {
        Self::MediaAcquisitionFailed { reason: reason.into() }
    }

    /// Create a negotiation failed error
    pub fn negotiation_failed(reason: impl Into<String>) -> Self {
        Self::NegotiationFailed { reason: reason.into() }
    }

    /// Create a signaling error
    pub fn signaling_failed(reason: impl Into<String>) -> Self {
        Self::SignalingFailed { reason: reason.into() }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an internal error
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError { message: message.into() }
    }

    /// Check if this error is worth retrying
    pub fn is_recoverable(&self) -> bool {
        match self {
            PhoneError::RegistrationFailed { .. }
            | PhoneError::ConnectionFailed { .. }
            | PhoneError::SignalingFailed { .. }
            | PhoneError::OperationTimeout { .. } => true,

            PhoneError::InvalidConfiguration { .. }
            | PhoneError::TargetResolutionFailed { .. }
            | PhoneError::NoCommonMedia
            | PhoneError::InvalidCallState { .. } => false,

            _ => false,
        }
    }

    /// Check if the error ends the call session it occurred in
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            PhoneError::MediaAcquisitionFailed { .. }
                | PhoneError::NegotiationFailed { .. }
                | PhoneError::NoCommonMedia
                | PhoneError::TargetResolutionFailed { .. }
                | PhoneError::OperationTimeout { .. }
                | PhoneError::SignalingFailed { .. }
        )
    }

    /// Get error category for metrics/logging
    pub fn category(&self) -> &'static str {
        match self {
            PhoneError::RegistrationFailed { .. } | PhoneError::NotRegistered => "registration",

            PhoneError::ConnectionFailed { .. } => "connection",

            PhoneError::TargetResolutionFailed { .. } => "target",

            PhoneError::MediaAcquisitionFailed { .. } => "media",

            PhoneError::NegotiationFailed { .. } | PhoneError::NoCommonMedia => "negotiation",

            PhoneError::CallNotFound { .. }
            | PhoneError::InvalidCallState { .. }
            | PhoneError::SignalingFailed { .. } => "call",

            PhoneError::InvalidConfiguration { .. } => "configuration",

            PhoneError::OperationTimeout { .. } | PhoneError::InternalError { .. } => "system",
        }
    }
}
