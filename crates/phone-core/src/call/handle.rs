use std::fmt;
use std::sync::{Arc, Weak};

use tokio::sync::{broadcast, watch};

use super::{AnswerOptions, CallDirection, CallId, CallSession, CallState};
use crate::error::{PhoneError, PhoneResult};
use crate::events::CallEvent;
use crate::locus::Locus;
use crate::media::{LocalMediaStream, RemoteMediaStream};
use crate::sdp::SessionDescription;

/// Caller-facing reference to a call session
///
/// The phone's registry owns the session and drops it once the call ends.
/// The handle keeps observing the last state after that; operations that
/// need the live session return [`PhoneError::CallNotFound`], except
/// [`CallHandle::hangup`], which is a no-op on an ended call.
#[derive(Clone)]
pub struct CallHandle {
    id: CallId,
    direction: CallDirection,
    session: Weak<CallSession>,
    state: watch::Receiver<CallState>,
}

impl CallHandle {
    pub(crate) fn new(session: &Arc<CallSession>) -> Self {
        Self {
            id: session.id(),
            direction: session.direction(),
            session: Arc::downgrade(session),
            state: session.subscribe_state(),
        }
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Current state; the final state once the session is gone
    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    /// The live session, if the call has not been released yet
    pub fn session(&self) -> Option<Arc<CallSession>> {
        self.session.upgrade()
    }

    pub fn is_alive(&self) -> bool {
        self.session.strong_count() > 0
    }

    pub fn remote_identity(&self) -> Option<String> {
        self.session().map(|s| s.remote_identity().to_string())
    }

    pub fn local_media_stream(&self) -> Option<LocalMediaStream> {
        self.session().and_then(|s| s.local_media_stream())
    }

    pub fn remote_media_stream(&self) -> Option<RemoteMediaStream> {
        self.session().and_then(|s| s.remote_media_stream())
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.session().and_then(|s| s.local_description())
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.session().and_then(|s| s.remote_description())
    }

    pub fn locus(&self) -> Option<Locus> {
        self.session().and_then(|s| s.locus())
    }

    pub fn subscribe(&self) -> PhoneResult<broadcast::Receiver<CallEvent>> {
        Ok(self.live()?.subscribe())
    }

    pub async fn answer(&self, options: AnswerOptions) -> PhoneResult<()> {
        self.live()?.answer(options).await
    }

    pub async fn decline(&self) -> PhoneResult<()> {
        self.live()?.decline().await
    }

    pub async fn hangup(&self) -> PhoneResult<()> {
        match self.session() {
            Some(session) => session.hangup().await,
            None => Ok(()),
        }
    }

    /// Wait until the call is in `target`; fails if it ends in another state
    pub async fn wait_for_state(&self, target: CallState) -> PhoneResult<()> {
        let mut rx = self.state.clone();
        let waited = rx.wait_for(|s| *s == target || s.is_terminal()).await.map(|s| *s);
        let reached = match waited {
            Ok(state) => state,
            // session dropped; its last state is final
            Err(_) => *rx.borrow(),
        };

        if reached == target {
            Ok(())
        } else {
            Err(PhoneError::InvalidCallState {
                call_id: self.id,
                current_state: reached,
            })
        }
    }

    pub async fn wait_for_locus(&self) -> PhoneResult<Locus> {
        self.live()?.wait_for_locus().await
    }

    pub async fn wait_for_locus_change(&self) -> PhoneResult<Locus> {
        self.live()?.wait_for_locus_change().await
    }

    fn live(&self) -> PhoneResult<Arc<CallSession>> {
        self.session().ok_or(PhoneError::CallNotFound { call_id: self.id })
    }
}

impl fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallHandle")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("state", &self.state())
            .field("alive", &self.is_alive())
            .finish()
    }
}
