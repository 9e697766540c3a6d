//! Call sessions
//!
//! A [`CallSession`] is one negotiated media session. Sessions are owned by
//! the phone's registry; callers only ever hold a [`CallHandle`], which
//! refers to the session weakly.

mod handle;
mod session;
mod state;

pub use handle::CallHandle;
pub use session::{AnswerOptions, CallSession};
pub use state::{CallDirection, CallId, CallState};

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::media::{MediaAcquirer, MediaConstraints};
use crate::phone::registry::CallRegistry;
use crate::phone::status::StatusWatch;
use crate::signaling::CallSignaling;
use crate::target::TargetResolver;

/// Collaborators and settings shared by every session of one phone
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub(crate) signaling: Arc<dyn CallSignaling>,
    pub(crate) resolver: Arc<dyn TargetResolver>,
    pub(crate) media: MediaAcquirer,
    pub(crate) status: StatusWatch,
    pub(crate) registry: Weak<CallRegistry>,
    pub(crate) notices: mpsc::UnboundedSender<SessionNotice>,
    /// Identity of the local user as it appears in locus participants
    pub(crate) local_id: String,
    pub(crate) default_constraints: MediaConstraints,
    pub(crate) negotiation_timeout: Duration,
    pub(crate) teardown_timeout: Duration,
    pub(crate) event_capacity: usize,
}

/// Session-to-phone notifications consumed by the dispatcher
#[derive(Debug, Clone)]
pub(crate) enum SessionNotice {
    LocusBound {
        call_id: CallId,
        locus_url: String,
    },
    StateChanged {
        call_id: CallId,
        previous: CallState,
        state: CallState,
    },
}
