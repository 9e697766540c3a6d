//! Locus: the backend's shared record of a call
//!
//! Every participant's client mirrors the same locus. Updates arrive over
//! the realtime channel or as responses to signaling requests and carry a
//! monotonically increasing sequence number; an update is only applied if
//! it is newer than what the session already holds.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LocusState {
    Active,
    Terminating,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParticipantState {
    /// Invited, no device has been alerted yet
    Idle,
    /// A device is alerting
    Notified,
    Joined,
    Left,
    Declined,
}

impl ParticipantState {
    pub fn is_gone(&self) -> bool {
        matches!(self, ParticipantState::Left | ParticipantState::Declined)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocusParticipant {
    /// User identity (email or user id)
    pub id: String,
    pub state: ParticipantState,
    /// Device the participant joined from, once joined
    #[serde(default)]
    pub device_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locus {
    pub url: String,
    pub sequence: u64,
    pub state: LocusState,
    /// Identity of the participant that created the call
    pub host: String,
    pub participants: Vec<LocusParticipant>,
}

impl Locus {
    pub fn participant(&self, id: &str) -> Option<&LocusParticipant> {
        self.participants.iter().find(|p| p.id.eq_ignore_ascii_case(id))
    }

    pub fn remote_participants<'a>(&'a self, local_id: &'a str) -> impl Iterator<Item = &'a LocusParticipant> + 'a {
        self.participants
            .iter()
            .filter(move |p| !p.id.eq_ignore_ascii_case(local_id))
    }

    pub fn is_newer_than(&self, other: &Locus) -> bool {
        self.sequence > other.sequence
    }

    /// Local participant joined and at least one remote joined
    pub fn is_established_for(&self, local_id: &str) -> bool {
        self.state == LocusState::Active
            && self
                .participant(local_id)
                .map_or(false, |p| p.state == ParticipantState::Joined)
            && self
                .remote_participants(local_id)
                .any(|p| p.state == ParticipantState::Joined)
    }

    /// The call is over from the local participant's point of view
    pub fn is_ended_for(&self, local_id: &str) -> bool {
        if self.state == LocusState::Inactive {
            return true;
        }
        if self.participant(local_id).map_or(false, |p| p.state.is_gone()) {
            return true;
        }
        let mut remotes = self.remote_participants(local_id).peekable();
        remotes.peek().is_some() && remotes.all(|p| p.state.is_gone())
    }

    /// The local participant has an unanswered invite in this locus
    pub fn is_ringing_for(&self, local_id: &str) -> bool {
        self.state == LocusState::Active
            && self.participant(local_id).map_or(false, |p| {
                matches!(p.state, ParticipantState::Idle | ParticipantState::Notified)
            })
    }
}
