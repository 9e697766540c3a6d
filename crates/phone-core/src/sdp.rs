//! Typed session descriptions for the offer/answer exchange
//!
//! The peer-connection engine and the SDP text grammar live outside this
//! crate. What the orchestrator needs is the media-line level view: which
//! kinds of media are negotiated and in which direction. That is what these
//! types carry across the signaling boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PhoneError, PhoneResult};
use crate::media::{MediaConstraints, MediaKind, OfferOptions};

/// Direction attribute of a media line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn from_flags(send: bool, recv: bool) -> Self {
        match (send, recv) {
            (true, true) => MediaDirection::SendRecv,
            (true, false) => MediaDirection::SendOnly,
            (false, true) => MediaDirection::RecvOnly,
            (false, false) => MediaDirection::Inactive,
        }
    }

    pub fn sends(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::SendOnly)
    }

    pub fn receives(&self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::RecvOnly)
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        };
        f.write_str(s)
    }
}

/// One `m=` line worth of negotiated state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaLine {
    pub mid: String,
    pub kind: MediaKind,
    pub direction: MediaDirection,
    pub codecs: Vec<String>,
}

impl MediaLine {
    /// A rejected line keeps its slot but carries nothing
    pub fn is_rejected(&self) -> bool {
        self.codecs.is_empty() || self.direction == MediaDirection::Inactive
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    pub kind: DescriptionKind,
    pub session_id: String,
    pub media: Vec<MediaLine>,
}

impl SessionDescription {
    pub fn media_line(&self, kind: MediaKind) -> Option<&MediaLine> {
        self.media.iter().find(|line| line.kind == kind)
    }

    pub fn has_media(&self, kind: MediaKind) -> bool {
        self.media_line(kind).is_some()
    }

    /// Kinds this side will actually send
    pub fn sending_kinds(&self) -> Vec<MediaKind> {
        self.media
            .iter()
            .filter(|line| !line.is_rejected() && line.direction.sends())
            .map(|line| line.kind)
            .collect()
    }
}

impl fmt::Display for SessionDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}[", self.kind)?;
        for (i, line) in self.media.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}:{}", line.kind, line.direction)?;
        }
        f.write_str("]")
    }
}

/// Codecs this client can offer, in preference order
pub fn supported_codecs(kind: MediaKind) -> Vec<String> {
    let names: &[&str] = match kind {
        MediaKind::Audio => &["opus", "PCMU", "PCMA"],
        MediaKind::Video => &["H264", "VP8"],
    };
    names.iter().map(|s| s.to_string()).collect()
}

const MEDIA_ORDER: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Video];

/// Build a local offer.
///
/// Per media kind: a `true` constraint is negotiated `sendrecv`; a `false`
/// constraint with the matching receive option becomes `recvonly`; a
/// `false` constraint without it is left out of the offer entirely.
pub fn create_offer(constraints: &MediaConstraints, options: &OfferOptions) -> PhoneResult<SessionDescription> {
    let mut media = Vec::new();

    for kind in MEDIA_ORDER {
        let send = constraints.allows(kind);
        let recv = send || options.receives(kind);
        if !send && !recv {
            continue;
        }
        media.push(MediaLine {
            mid: media.len().to_string(),
            kind,
            direction: MediaDirection::from_flags(send, recv),
            codecs: supported_codecs(kind),
        });
    }

    if media.is_empty() {
        return Err(PhoneError::negotiation_failed(
            "offer would contain no media lines; enable a constraint or a receive option",
        ));
    }

    Ok(SessionDescription {
        kind: DescriptionKind::Offer,
        session_id: Uuid::new_v4().to_string(),
        media,
    })
}

/// Build an answer to a remote offer, sending only what `constraints` allow.
pub fn create_answer(offer: &SessionDescription, constraints: &MediaConstraints) -> PhoneResult<SessionDescription> {
    if offer.kind != DescriptionKind::Offer {
        return Err(PhoneError::negotiation_failed("remote description is not an offer"));
    }

    let media: Vec<MediaLine> = offer
        .media
        .iter()
        .map(|offered| {
            let local = supported_codecs(offered.kind);
            let codecs: Vec<String> = offered
                .codecs
                .iter()
                .filter(|c| local.iter().any(|l| l.eq_ignore_ascii_case(c)))
                .cloned()
                .collect();

            let send = constraints.allows(offered.kind) && offered.direction.receives();
            let recv = offered.direction.sends();
            let direction = if codecs.is_empty() {
                MediaDirection::Inactive
            } else {
                MediaDirection::from_flags(send, recv)
            };

            MediaLine {
                mid: offered.mid.clone(),
                kind: offered.kind,
                direction,
                codecs,
            }
        })
        .collect();

    if media.iter().all(MediaLine::is_rejected) {
        return Err(PhoneError::NoCommonMedia);
    }

    Ok(SessionDescription {
        kind: DescriptionKind::Answer,
        session_id: offer.session_id.clone(),
        media,
    })
}

/// Check a remote answer against the offer it claims to answer.
pub fn validate_answer(offer: &SessionDescription, answer: &SessionDescription) -> PhoneResult<()> {
    if answer.kind != DescriptionKind::Answer {
        return Err(PhoneError::negotiation_failed("remote description is not an answer"));
    }

    for line in &answer.media {
        let offered = offer.media_line(line.kind).ok_or_else(|| {
            PhoneError::negotiation_failed(format!("answer contains {} line that was never offered", line.kind))
        })?;
        if line.is_rejected() {
            continue;
        }
        if line.direction.sends() && !offered.direction.receives() {
            return Err(PhoneError::negotiation_failed(format!(
                "answer sends {} but the offer is {}",
                line.kind, offered.direction
            )));
        }
        if line.direction.receives() && !offered.direction.sends() {
            return Err(PhoneError::negotiation_failed(format!(
                "answer receives {} but the offer is {}",
                line.kind, offered.direction
            )));
        }
    }

    if answer.media.iter().all(MediaLine::is_rejected) {
        return Err(PhoneError::NoCommonMedia);
    }

    Ok(())
}
