use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a call session
pub type CallId = Uuid;

/// Lifecycle state of a call session
///
/// ```text
/// Idle -> Negotiating -> Connected -> Terminating -> Terminated
///   \________\______________\____________\--------> Errored
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallState {
    /// Created, nothing exchanged yet
    Idle,
    /// Offer/answer exchange in flight (or ringing, for inbound calls)
    Negotiating,
    /// Media established on both sides
    Connected,
    /// Teardown signaling in flight
    Terminating,
    /// Call has ended
    Terminated,
    /// Call failed; terminal
    Errored,
}

impl CallState {
    /// Check if the call is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Terminated | CallState::Errored)
    }

    pub fn is_active(&self) -> bool {
        matches!(self, CallState::Connected)
    }

    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        match (self, next) {
            (Idle, Negotiating) | (Idle, Terminating) => true,
            (Negotiating, Connected) | (Negotiating, Terminating) => true,
            (Connected, Terminating) => true,
            (Terminating, Terminated) => true,
            (current, Errored) => !current.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallState::Idle => "idle",
            CallState::Negotiating => "negotiating",
            CallState::Connected => "connected",
            CallState::Terminating => "terminating",
            CallState::Terminated => "terminated",
            CallState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Direction of a call from the local user's perspective
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallDirection {
    /// Received through an invite
    Inbound,
    /// Created by `dial()`
    Outbound,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Inbound => f.write_str("inbound"),
            CallDirection::Outbound => f.write_str("outbound"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let path = [
            CallState::Idle,
            CallState::Negotiating,
            CallState::Connected,
            CallState::Terminating,
            CallState::Terminated,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_errored_reachable_from_non_terminal_only() {
        for state in [
            CallState::Idle,
            CallState::Negotiating,
            CallState::Connected,
            CallState::Terminating,
        ] {
            assert!(state.can_transition_to(CallState::Errored));
        }
        assert!(!CallState::Terminated.can_transition_to(CallState::Errored));
        assert!(!CallState::Errored.can_transition_to(CallState::Errored));
    }

    #[test]
    fn test_no_shortcuts() {
        assert!(!CallState::Idle.can_transition_to(CallState::Connected));
        assert!(!CallState::Negotiating.can_transition_to(CallState::Terminated));
        assert!(!CallState::Terminated.can_transition_to(CallState::Negotiating));
        assert!(!CallState::Connected.can_transition_to(CallState::Negotiating));
    }
}
