//! phone-core: calling client coordination layer
//!
//! Registers a device with a directory service, keeps a realtime signaling
//! channel open and runs call sessions on top of them. The backends
//! (directory, realtime transport, call signaling API, target lookup and
//! camera/microphone capture) are consumed through narrow async traits so
//! they can be swapped for real clients or in-memory fakes.
//!
//! # Quick start
//!
//! ```rust,ignore
//! use phone_core::{AnswerOptions, Credentials, DialOptions, PhoneBuilder, PhoneEvent};
//!
//! let phone = PhoneBuilder::new()
//!     .credentials(Credentials::new("kirk@example.com", token))
//!     .directory(directory)
//!     .transport(transport)
//!     .media(media)
//!     .resolver(resolver)
//!     .signaling(signaling)
//!     .build()
//!     .await?;
//!
//! phone.register().await?;
//!
//! let mut events = phone.subscribe_events();
//! while let Ok(event) = events.recv().await {
//!     if let PhoneEvent::IncomingCall { call } = event {
//!         call.answer(AnswerOptions::new()).await?;
//!     }
//! }
//! ```
//!
//! Incoming calls are only announced while the phone is both registered
//! and connected; events that arrive earlier wait in a queue.

pub mod call;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod locus;
pub mod logging;
pub mod media;
pub mod mercury;
pub mod phone;
pub mod sdp;
pub mod signaling;
pub mod target;

pub use call::{AnswerOptions, CallDirection, CallHandle, CallId, CallSession, CallState};
pub use config::PhoneConfig;
pub use device::{Credentials, DeviceDescriptor, DeviceRegistry, DirectoryService};
pub use error::{PhoneError, PhoneResult};
pub use events::{CallEvent, EventEmitter, PhoneEvent, PhoneEventHandler};
pub use locus::{Locus, LocusParticipant, LocusState, ParticipantState};
pub use logging::{setup_logging, LoggingConfig};
pub use media::{
    FacingMode, LocalMediaStream, MediaAcquirer, MediaConstraints, MediaKind, MediaStreamAcquirer, MediaTrack,
    OfferOptions, RemoteMediaStream,
};
pub use mercury::{RealtimeChannel, RealtimeConnectionState, RealtimeTransport, SignalingEvent, SignalingEventType};
pub use phone::recovery::{retry_with_backoff, with_timeout, RetryConfig};
pub use phone::{DialOptions, Phone, PhoneBuilder, PhoneStats, PhoneStatus};
pub use sdp::{DescriptionKind, MediaDirection, MediaLine, SessionDescription};
pub use signaling::{CallInvite, CallSignaling, CallUpdate};
pub use target::{CallTarget, ResolvedTarget, TargetResolver};

/// phone-core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
