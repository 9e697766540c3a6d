//! Local and remote media stream handles
//!
//! Capturing audio/video is the job of an external [`MediaStreamAcquirer`].
//! This module wraps it with the phone's defaults and defines the opaque
//! stream handles that call sessions hold on to.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PhoneError, PhoneResult};

/// Camera selection for video capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FacingMode {
    /// Front camera, facing the user
    User,
    /// Rear camera
    Environment,
}

impl fmt::Display for FacingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FacingMode::User => write!(f, "user"),
            FacingMode::Environment => write!(f, "environment"),
        }
    }
}

/// Kind of media carried by a track or media line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Audio,
    Video,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => write!(f, "audio"),
            MediaKind::Video => write!(f, "video"),
        }
    }
}

/// Which media the local side wants to send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub audio: bool,
    pub video: bool,
    /// Camera to use; `None` lets the phone apply its configured default
    #[serde(default)]
    pub facing_mode: Option<FacingMode>,
}

impl MediaConstraints {
    pub fn new(audio: bool, video: bool) -> Self {
        Self {
            audio,
            video,
            facing_mode: None,
        }
    }

    pub fn audio_video() -> Self {
        Self::new(true, true)
    }

    pub fn audio_only() -> Self {
        Self::new(true, false)
    }

    pub fn video_only() -> Self {
        Self::new(false, true)
    }

    /// Send nothing; combine with [`OfferOptions`] for a receive-only call
    pub fn none() -> Self {
        Self::new(false, false)
    }

    pub fn with_facing_mode(mut self, facing_mode: FacingMode) -> Self {
        self.facing_mode = Some(facing_mode);
        self
    }

    /// True when at least one kind of media would be captured
    pub fn requests_media(&self) -> bool {
        self.audio || self.video
    }

    pub fn allows(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.audio,
            MediaKind::Video => self.video,
        }
    }
}

impl Default for MediaConstraints {
    fn default() -> Self {
        Self::audio_video()
    }
}

/// Receive preferences applied when building an offer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferOptions {
    pub offer_to_receive_audio: bool,
    pub offer_to_receive_video: bool,
}

impl OfferOptions {
    pub fn receive_all() -> Self {
        Self {
            offer_to_receive_audio: true,
            offer_to_receive_video: true,
        }
    }

    pub fn receives(&self, kind: MediaKind) -> bool {
        match kind {
            MediaKind::Audio => self.offer_to_receive_audio,
            MediaKind::Video => self.offer_to_receive_video,
        }
    }
}

/// A single live capture track
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaTrack {
    pub id: String,
    pub kind: MediaKind,
    pub label: String,
}

impl MediaTrack {
    pub fn new(kind: MediaKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
        }
    }
}

type StopHook = Box<dyn Fn(&[MediaTrack]) + Send + Sync>;

struct LocalStreamInner {
    id: Uuid,
    tracks: Vec<MediaTrack>,
    facing_mode: Option<FacingMode>,
    stopped: AtomicBool,
    on_stop: Option<StopHook>,
}

/// Handle to live local audio/video tracks
///
/// Cloning the handle shares the same underlying capture; use
/// [`LocalMediaStream::ptr_eq`] to test identity.
#[derive(Clone)]
pub struct LocalMediaStream {
    inner: Arc<LocalStreamInner>,
}

impl LocalMediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self::build(tracks, None, None)
    }

    /// Create a stream whose capture is released through `on_stop`
    pub fn with_stop_hook<F>(tracks: Vec<MediaTrack>, on_stop: F) -> Self
    where
        F: Fn(&[MediaTrack]) + Send + Sync + 'static,
    {
        Self::build(tracks, None, Some(Box::new(on_stop)))
    }

    pub fn with_facing_mode(self, facing_mode: FacingMode) -> Self {
        match Arc::try_unwrap(self.inner) {
            Ok(inner) => Self::build(inner.tracks, Some(facing_mode), inner.on_stop),
            Err(inner) => {
                // Already shared; the facing mode is informational only.
                Self { inner }
            }
        }
    }

    fn build(tracks: Vec<MediaTrack>, facing_mode: Option<FacingMode>, on_stop: Option<StopHook>) -> Self {
        Self {
            inner: Arc::new(LocalStreamInner {
                id: Uuid::new_v4(),
                tracks,
                facing_mode,
                stopped: AtomicBool::new(false),
                on_stop,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.inner.tracks
    }

    pub fn facing_mode(&self) -> Option<FacingMode> {
        self.inner.facing_mode
    }

    pub fn has_audio(&self) -> bool {
        self.inner.tracks.iter().any(|t| t.kind == MediaKind::Audio)
    }

    pub fn has_video(&self) -> bool {
        self.inner.tracks.iter().any(|t| t.kind == MediaKind::Video)
    }

    pub fn is_active(&self) -> bool {
        !self.inner.stopped.load(Ordering::Acquire)
    }

    /// Stop all tracks. Only the first call reaches the stop hook.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(stream_id = %self.inner.id, tracks = self.inner.tracks.len(), "Stopping local media stream");
        if let Some(hook) = &self.inner.on_stop {
            hook(&self.inner.tracks);
        }
    }

    /// Reference identity, not structural equality
    pub fn ptr_eq(&self, other: &LocalMediaStream) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for LocalMediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMediaStream")
            .field("id", &self.inner.id)
            .field("tracks", &self.inner.tracks)
            .field("facing_mode", &self.inner.facing_mode)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Media received from the remote party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteMediaStream {
    pub id: String,
    pub kinds: Vec<MediaKind>,
}

/// External capture boundary (camera/microphone access)
#[async_trait]
pub trait MediaStreamAcquirer: Send + Sync {
    async fn acquire(&self, constraints: &MediaConstraints) -> anyhow::Result<LocalMediaStream>;
}

/// Applies phone defaults on top of a [`MediaStreamAcquirer`]
#[derive(Clone)]
pub struct MediaAcquirer {
    backend: Arc<dyn MediaStreamAcquirer>,
    default_facing_mode: FacingMode,
}

impl MediaAcquirer {
    pub fn new(backend: Arc<dyn MediaStreamAcquirer>, default_facing_mode: FacingMode) -> Self {
        Self {
            backend,
            default_facing_mode,
        }
    }

    /// Constraints actually handed to the backend
    pub fn effective_constraints(&self, constraints: &MediaConstraints) -> MediaConstraints {
        let mut effective = *constraints;
        if effective.video && effective.facing_mode.is_none() {
            effective.facing_mode = Some(self.default_facing_mode);
        }
        effective
    }

    pub async fn acquire(&self, constraints: &MediaConstraints) -> PhoneResult<LocalMediaStream> {
        if !constraints.requests_media() {
            return Err(PhoneError::media_acquisition_failed("constraints request no media"));
        }

        let effective = self.effective_constraints(constraints);
        tracing::debug!(
            audio = effective.audio,
            video = effective.video,
            facing_mode = ?effective.facing_mode,
            "Acquiring local media"
        );

        self.backend
            .acquire(&effective)
            .await
            .map_err(|e| PhoneError::media_acquisition_failed(e.to_string()))
    }
}

impl fmt::Debug for MediaAcquirer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaAcquirer")
            .field("backend", &"<media backend>")
            .field("default_facing_mode", &self.default_facing_mode)
            .finish()
    }
}
