//! Dial target classification and resolution
//!
//! `dial()` accepts a free-form identifier. Classifying it is synchronous
//! and happens before any session exists; turning the classified target
//! into a session-addressable endpoint is an async lookup performed by a
//! [`TargetResolver`].

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PhoneError;

/// A classified dial identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CallTarget {
    Email(String),
    /// Room identifier or room URL
    Room(String),
    UserId(Uuid),
    SipUri(String),
    /// Dial string, normalized to `+` and digits
    Pstn(String),
}

impl CallTarget {
    /// Classify a raw identifier
    pub fn parse(identifier: &str) -> Result<Self, PhoneError> {
        let raw = identifier.trim();
        if raw.is_empty() {
            return Err(PhoneError::target_resolution_failed(identifier, "empty identifier"));
        }

        let lower = raw.to_ascii_lowercase();

        if lower.starts_with("sip:") || lower.starts_with("sips:") {
            let rest = raw.splitn(2, ':').nth(1).unwrap_or_default();
            if rest.is_empty() {
                return Err(PhoneError::target_resolution_failed(identifier, "SIP URI has no user part"));
            }
            return Ok(CallTarget::SipUri(raw.to_string()));
        }

        if let Some(number) = lower.strip_prefix("tel:") {
            return normalize_dial_string(number)
                .map(CallTarget::Pstn)
                .ok_or_else(|| PhoneError::target_resolution_failed(identifier, "invalid tel URI"));
        }

        if let Some(room) = raw.strip_prefix("room:") {
            if room.is_empty() {
                return Err(PhoneError::target_resolution_failed(identifier, "room identifier is empty"));
            }
            return Ok(CallTarget::Room(room.to_string()));
        }

        if (lower.starts_with("https://") || lower.starts_with("http://"))
            && (lower.contains("/rooms/") || lower.contains("/conversations/"))
        {
            return Ok(CallTarget::Room(raw.to_string()));
        }

        if let Ok(id) = Uuid::parse_str(raw) {
            return Ok(CallTarget::UserId(id));
        }

        if is_email(raw) {
            return Ok(CallTarget::Email(lower));
        }

        if let Some(number) = normalize_dial_string(raw) {
            return Ok(CallTarget::Pstn(number));
        }

        Err(PhoneError::target_resolution_failed(identifier, "unrecognized identifier"))
    }

    /// Stable key used to detect a second dial to the same party
    pub fn key(&self) -> String {
        match self {
            CallTarget::Email(email) => format!("email:{}", email),
            CallTarget::Room(room) => format!("room:{}", room),
            CallTarget::UserId(id) => format!("user:{}", id),
            CallTarget::SipUri(uri) => format!("sip:{}", uri.to_ascii_lowercase()),
            CallTarget::Pstn(number) => format!("tel:{}", number),
        }
    }
}

impl FromStr for CallTarget {
    type Err = PhoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CallTarget::parse(s)
    }
}

impl fmt::Display for CallTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallTarget::Email(email) => write!(f, "{}", email),
            CallTarget::Room(room) => write!(f, "room:{}", room),
            CallTarget::UserId(id) => write!(f, "{}", id),
            CallTarget::SipUri(uri) => write!(f, "{}", uri),
            CallTarget::Pstn(number) => write!(f, "tel:{}", number),
        }
    }
}

fn is_email(s: &str) -> bool {
    let mut parts = s.splitn(2, '@');
    let (local, domain) = match (parts.next(), parts.next()) {
        (Some(l), Some(d)) => (l, d),
        _ => return false,
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !s.chars().any(char::is_whitespace)
}

fn normalize_dial_string(s: &str) -> Option<String> {
    let mut out = String::new();
    for (i, c) in s.chars().enumerate() {
        match c {
            '+' if i == 0 => out.push(c),
            '0'..='9' => out.push(c),
            ' ' | '-' | '.' | '(' | ')' => {}
            _ => return None,
        }
    }
    let digits = out.chars().filter(char::is_ascii_digit).count();
    if digits >= 3 {
        Some(out)
    } else {
        None
    }
}

/// A target resolved to an endpoint the signaling service can address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedTarget {
    pub target: CallTarget,
    /// Session-addressable endpoint (for example a locus or user URL)
    pub address: String,
}

/// Resolves a classified target through the backend API
#[async_trait]
pub trait TargetResolver: Send + Sync {
    async fn resolve(&self, target: &CallTarget) -> anyhow::Result<ResolvedTarget>;
}
