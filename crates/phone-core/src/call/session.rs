use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;

use super::{CallDirection, CallHandle, CallId, CallState, SessionContext, SessionNotice};
use crate::device::DeviceDescriptor;
use crate::error::{PhoneError, PhoneResult};
use crate::events::CallEvent;
use crate::locus::Locus;
use crate::media::{LocalMediaStream, MediaConstraints, MediaKind, OfferOptions, RemoteMediaStream};
use crate::phone::recovery::with_timeout;
use crate::sdp::{self, SessionDescription};
use crate::signaling::{CallInvite, CallUpdate};
use crate::target::{CallTarget, ResolvedTarget};

/// Options for answering an inbound call
#[derive(Debug, Clone, Default)]
pub struct AnswerOptions {
    /// Overrides the phone's default constraints
    pub constraints: Option<MediaConstraints>,
    /// Caller-owned stream to attach instead of acquiring one
    pub local_media_stream: Option<LocalMediaStream>,
}

impl AnswerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_local_media_stream(mut self, stream: LocalMediaStream) -> Self {
        self.local_media_stream = Some(stream);
        self
    }
}

#[derive(Default)]
struct MediaState {
    local_stream: Option<LocalMediaStream>,
    /// The caller owns `local_stream` and is responsible for stopping it
    externally_supplied: bool,
    remote_stream: Option<RemoteMediaStream>,
    local_description: Option<SessionDescription>,
    remote_description: Option<SessionDescription>,
}

/// One negotiated media session
///
/// State changes go through [`CallState::can_transition_to`]; a rejected
/// transition is a no-op, so concurrent teardown paths (local hangup,
/// remote termination, failure) settle on whichever got there first.
pub struct CallSession {
    id: CallId,
    direction: CallDirection,
    target: Option<CallTarget>,
    remote_identity: String,
    constraints: MediaConstraints,
    offer_options: OfferOptions,
    created_at: DateTime<Utc>,
    state: watch::Sender<CallState>,
    locus: watch::Sender<Option<Locus>>,
    media: Mutex<MediaState>,
    events: broadcast::Sender<CallEvent>,
    cancel: CancellationToken,
    answering: AtomicBool,
    /// A create request is in flight on the backend
    creating: watch::Sender<bool>,
    ctx: SessionContext,
}

impl CallSession {
    pub(crate) fn outbound(
        ctx: SessionContext,
        target: CallTarget,
        constraints: MediaConstraints,
        offer_options: OfferOptions,
        local_stream: Option<LocalMediaStream>,
    ) -> Arc<Self> {
        let mut media = MediaState::default();
        if let Some(stream) = local_stream {
            media.local_stream = Some(stream);
            media.externally_supplied = true;
        }
        let remote_identity = target.to_string();
        Arc::new(Self::build(
            ctx,
            CallDirection::Outbound,
            Some(target),
            remote_identity,
            constraints,
            offer_options,
            CallState::Idle,
            None,
            media,
        ))
    }

    /// Build a ringing inbound session from an invite
    pub(crate) fn inbound(ctx: SessionContext, invite: CallInvite) -> Arc<Self> {
        let media = MediaState {
            remote_description: Some(invite.offer),
            ..MediaState::default()
        };
        let constraints = ctx.default_constraints;
        Arc::new(Self::build(
            ctx,
            CallDirection::Inbound,
            None,
            invite.locus.host.clone(),
            constraints,
            OfferOptions::default(),
            CallState::Negotiating,
            Some(invite.locus),
            media,
        ))
    }

    fn build(
        ctx: SessionContext,
        direction: CallDirection,
        target: Option<CallTarget>,
        remote_identity: String,
        constraints: MediaConstraints,
        offer_options: OfferOptions,
        initial_state: CallState,
        locus: Option<Locus>,
        media: MediaState,
    ) -> Self {
        let (state, _) = watch::channel(initial_state);
        let (locus, _) = watch::channel(locus);
        let (events, _) = broadcast::channel(ctx.event_capacity.max(1));
        let (creating, _) = watch::channel(false);
        Self {
            id: CallId::new_v4(),
            direction,
            target,
            remote_identity,
            constraints,
            offer_options,
            created_at: Utc::now(),
            state,
            locus,
            media: Mutex::new(media),
            events,
            cancel: CancellationToken::new(),
            answering: AtomicBool::new(false),
            creating,
            ctx,
        }
    }

    pub fn handle(self: &Arc<Self>) -> CallHandle {
        CallHandle::new(self)
    }

    pub fn id(&self) -> CallId {
        self.id
    }

    pub fn direction(&self) -> CallDirection {
        self.direction
    }

    /// Dialed target; `None` for inbound calls
    pub fn target(&self) -> Option<&CallTarget> {
        self.target.as_ref()
    }

    /// The dialed target for outbound calls, the caller's identity for inbound
    pub fn remote_identity(&self) -> &str {
        &self.remote_identity
    }

    pub fn constraints(&self) -> MediaConstraints {
        self.constraints
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> CallState {
        *self.state.borrow()
    }

    pub fn local_media_stream(&self) -> Option<LocalMediaStream> {
        self.media.lock().local_stream.clone()
    }

    /// Whether the attached local stream belongs to the caller
    pub fn is_local_media_external(&self) -> bool {
        self.media.lock().externally_supplied
    }

    pub fn remote_media_stream(&self) -> Option<RemoteMediaStream> {
        self.media.lock().remote_stream.clone()
    }

    pub fn local_description(&self) -> Option<SessionDescription> {
        self.media.lock().local_description.clone()
    }

    pub fn remote_description(&self) -> Option<SessionDescription> {
        self.media.lock().remote_description.clone()
    }

    pub fn locus(&self) -> Option<Locus> {
        self.locus.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CallEvent> {
        self.events.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<CallState> {
        self.state.subscribe()
    }

    /// Answer an inbound call that is still ringing
    pub async fn answer(&self, options: AnswerOptions) -> PhoneResult<()> {
        if self.direction != CallDirection::Inbound
            || self.state() != CallState::Negotiating
            || self.answering.swap(true, Ordering::AcqRel)
        {
            return Err(self.invalid_state());
        }

        tracing::info!(call_id = %self.id, caller = %self.remote_identity, "Answering call");

        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => Err(self.invalid_state()),
            outcome = with_timeout("call_answer", self.ctx.negotiation_timeout, self.negotiate_inbound(options)) => outcome,
        };

        if let Err(error) = &outcome {
            if error.is_session_fatal() {
                self.fail(error.clone());
            } else {
                self.answering.store(false, Ordering::Release);
            }
        }
        outcome
    }

    /// Reject a ringing inbound call
    pub async fn decline(&self) -> PhoneResult<()> {
        if self.direction != CallDirection::Inbound
            || self.state() != CallState::Negotiating
            || self.answering.load(Ordering::Acquire)
        {
            return Err(self.invalid_state());
        }
        self.hangup().await
    }

    /// End the call from any non-terminal state.
    ///
    /// Always leaves the session `Terminated`. A teardown signaling failure
    /// is returned after the local state has been cleaned up.
    pub async fn hangup(&self) -> PhoneResult<()> {
        if self.state().is_terminal() {
            tracing::debug!(call_id = %self.id, "Hangup on an ended call is a no-op");
            return Ok(());
        }

        if !self.transition(CallState::Terminating) {
            // another teardown owns the session
            self.wait_for_terminal().await;
            return Ok(());
        }

        self.cancel.cancel();
        self.wait_for_pending_create().await;
        let outcome = self.send_teardown().await;
        self.release_media();
        self.transition(CallState::Terminated);

        if let Err(error) = &outcome {
            tracing::warn!(call_id = %self.id, error = %error, "Teardown signaling failed");
            let _ = self.events.send(CallEvent::Error { error: error.clone() });
        }
        outcome
    }

    /// Wait until the session is in `target`, or fail once it ends elsewhere
    pub async fn wait_for_state(&self, target: CallState) -> PhoneResult<()> {
        let mut rx = self.state.subscribe();
        let reached = rx
            .wait_for(|s| *s == target || s.is_terminal())
            .await
            .map(|s| *s)
            .map_err(|_| PhoneError::internal_error("call state channel closed"))?;

        if reached == target {
            Ok(())
        } else {
            Err(PhoneError::InvalidCallState {
                call_id: self.id,
                current_state: reached,
            })
        }
    }

    /// Resolve with the locus as soon as one is known
    pub async fn wait_for_locus(&self) -> PhoneResult<Locus> {
        let mut rx = self.locus.subscribe();
        let locus = rx
            .wait_for(Option::is_some)
            .await
            .map(|l| l.clone())
            .map_err(|_| PhoneError::internal_error("locus channel closed"))?;
        locus.ok_or_else(|| PhoneError::internal_error("locus missing after update"))
    }

    /// Resolve with the next locus update applied after this call
    pub async fn wait_for_locus_change(&self) -> PhoneResult<Locus> {
        let mut rx = self.locus.subscribe();
        rx.changed()
            .await
            .map_err(|_| PhoneError::internal_error("locus channel closed"))?;
        let locus = rx.borrow_and_update().clone();
        locus.ok_or_else(|| PhoneError::internal_error("locus cleared"))
    }

    pub(crate) fn begin_negotiation(&self) {
        self.transition(CallState::Negotiating);
    }

    /// Drive an outbound call until it connects, fails or is cancelled
    pub(crate) async fn run_outbound(self: Arc<Self>) {
        let timeout = self.ctx.negotiation_timeout;
        let outcome = tokio::select! {
            _ = self.cancel.cancelled() => {
                tracing::debug!(call_id = %self.id, "Outbound negotiation cancelled");
                return;
            }
            outcome = with_timeout("call_negotiation", timeout, self.negotiate_outbound()) => outcome,
        };

        if let Err(error) = outcome {
            let error = match error {
                PhoneError::OperationTimeout { duration_ms } => {
                    PhoneError::negotiation_failed(format!("no answer within {} ms", duration_ms))
                }
                other => other,
            };
            self.fail(error);
        }
    }

    async fn negotiate_outbound(self: &Arc<Self>) -> PhoneResult<()> {
        let target = self
            .target
            .clone()
            .ok_or_else(|| PhoneError::internal_error("outbound call without a target"))?;

        let resolved = self
            .ctx
            .resolver
            .resolve(&target)
            .await
            .map_err(|e| PhoneError::target_resolution_failed(target.to_string(), e.to_string()))?;
        tracing::debug!(call_id = %self.id, address = %resolved.address, "Call target resolved");

        self.ensure_local_media(&self.constraints).await?;

        let offer = sdp::create_offer(&self.constraints, &self.offer_options)?;
        tracing::debug!(call_id = %self.id, offer = %offer, "Local offer created");
        self.media.lock().local_description = Some(offer.clone());

        let device = self.ctx.status.device().ok_or(PhoneError::NotRegistered)?;
        self.create_call(device, resolved, offer).await?;
        self.evaluate_locus();

        let mut state = self.state.subscribe();
        state
            .wait_for(|s| *s != CallState::Negotiating)
            .await
            .map(|_| ())
            .map_err(|_| PhoneError::internal_error("call state channel closed"))
    }

    /// Place the call on the backend.
    ///
    /// The request runs on its own task so cancelling negotiation never
    /// drops it halfway. `hangup()` waits for it before sending teardown.
    async fn create_call(
        self: &Arc<Self>,
        device: DeviceDescriptor,
        resolved: ResolvedTarget,
        offer: SessionDescription,
    ) -> PhoneResult<()> {
        let session = self.clone();
        self.creating.send_replace(true);

        let request = tokio::spawn(async move {
            let created = session.ctx.signaling.create_call(&device, &resolved, &offer).await;
            let outcome = match created {
                Ok(locus) => {
                    session.adopt_created_locus(locus);
                    Ok(())
                }
                Err(e) => Err(PhoneError::signaling_failed(e.to_string())),
            };
            session.creating.send_replace(false);
            outcome
        });

        request
            .await
            .map_err(|e| PhoneError::internal_error(format!("create call task failed: {}", e)))?
    }

    fn adopt_created_locus(&self, locus: Locus) {
        if self.state().is_terminal() {
            tracing::info!(call_id = %self.id, locus_url = %locus.url, "Call created after teardown, leaving it");
            self.spawn_leave(locus.url);
            return;
        }
        self.bind_locus(&locus.url);
        self.record_locus(locus);
    }

    async fn wait_for_pending_create(&self) {
        let mut rx = self.creating.subscribe();
        let settled = matches!(
            tokio::time::timeout(self.ctx.teardown_timeout, rx.wait_for(|creating| !*creating)).await,
            Ok(Ok(_))
        );
        if !settled {
            tracing::warn!(call_id = %self.id, "Create request still pending at teardown");
        }
    }

    async fn negotiate_inbound(&self, options: AnswerOptions) -> PhoneResult<()> {
        let constraints = options.constraints.unwrap_or(self.constraints);
        if let Some(stream) = options.local_media_stream {
            let mut media = self.media.lock();
            media.local_stream = Some(stream);
            media.externally_supplied = true;
        }
        self.ensure_local_media(&constraints).await?;

        let offer = self
            .remote_description()
            .ok_or_else(|| PhoneError::negotiation_failed("no remote offer to answer"))?;
        let answer = sdp::create_answer(&offer, &constraints)?;
        tracing::debug!(call_id = %self.id, answer = %answer, "Local answer created");
        {
            let mut media = self.media.lock();
            media.remote_stream = remote_stream(&offer, &answer);
            media.local_description = Some(answer.clone());
        }

        let device = self.ctx.status.device().ok_or(PhoneError::NotRegistered)?;
        let locus_url = self
            .locus_url()
            .ok_or_else(|| PhoneError::internal_error("inbound call without a locus"))?;
        let locus = self
            .ctx
            .signaling
            .answer_call(&device, &locus_url, &answer)
            .await
            .map_err(|e| PhoneError::signaling_failed(e.to_string()))?;

        self.apply_locus(locus);
        Ok(())
    }

    async fn ensure_local_media(&self, constraints: &MediaConstraints) -> PhoneResult<()> {
        let attached = self.media.lock().local_stream.is_some();
        if attached {
            tracing::debug!(call_id = %self.id, "Using attached local media stream");
            return Ok(());
        }
        if !constraints.requests_media() {
            return Ok(());
        }

        let stream = self.ctx.media.acquire(constraints).await?;

        let mut media = self.media.lock();
        if self.cancel.is_cancelled() {
            stream.stop();
            return Err(self.invalid_state());
        }
        media.local_stream = Some(stream);
        media.externally_supplied = false;
        Ok(())
    }

    async fn send_teardown(&self) -> PhoneResult<()> {
        let Some(locus_url) = self.locus_url() else {
            return Ok(());
        };
        let unanswered =
            self.direction == CallDirection::Inbound && self.media.lock().local_description.is_none();
        let device = self.ctx.status.device();
        let signaling = self.ctx.signaling.clone();

        let locus = with_timeout("call_teardown", self.ctx.teardown_timeout, async {
            let response = match (unanswered, device) {
                (true, Some(device)) => signaling.decline_call(&device, &locus_url).await,
                _ => signaling.leave_call(&locus_url).await,
            };
            response.map_err(|e| PhoneError::signaling_failed(e.to_string()))
        })
        .await?;

        self.record_locus(locus);
        Ok(())
    }

    /// Apply a realtime update for this call
    pub(crate) fn apply_update(&self, update: CallUpdate) {
        if let Some(answer) = update.answer {
            if let Err(error) = self.accept_answer(answer) {
                self.fail(error);
                return;
            }
        }
        self.apply_locus(update.locus);
    }

    fn accept_answer(&self, answer: SessionDescription) -> PhoneResult<()> {
        if self.direction != CallDirection::Outbound {
            tracing::debug!(call_id = %self.id, "Ignoring answer delivered to an inbound call");
            return Ok(());
        }

        let mut media = self.media.lock();
        if media.remote_description.is_some() {
            return Ok(());
        }
        let offer = media
            .local_description
            .as_ref()
            .ok_or_else(|| PhoneError::negotiation_failed("answer received before an offer was sent"))?;
        sdp::validate_answer(offer, &answer)?;

        tracing::debug!(call_id = %self.id, answer = %answer, "Remote answer accepted");
        media.remote_stream = remote_stream(&answer, offer);
        media.remote_description = Some(answer);
        Ok(())
    }

    /// Mirror a newer locus and advance the state machine from it
    pub(crate) fn apply_locus(&self, locus: Locus) {
        if self.record_locus(locus) {
            self.evaluate_locus();
        }
    }

    fn evaluate_locus(&self) {
        if self.state().is_terminal() {
            return;
        }

        let ended = self
            .locus
            .borrow()
            .as_ref()
            .map_or(false, |l| l.is_ended_for(&self.ctx.local_id));
        if ended {
            self.terminate_remotely();
        } else {
            self.try_connect();
        }
    }

    /// Re-check the Connected condition after the phone became ready
    pub(crate) fn reevaluate(&self) {
        self.try_connect();
    }

    fn record_locus(&self, locus: Locus) -> bool {
        let sequence = locus.sequence;
        let event_locus = locus.clone();
        let applied = self.locus.send_if_modified(move |current| {
            let newer = current.as_ref().map_or(true, |held| locus.is_newer_than(held));
            if newer {
                *current = Some(locus);
            }
            newer
        });

        if applied {
            tracing::debug!(call_id = %self.id, sequence, state = ?event_locus.state, "Locus updated");
            let _ = self.events.send(CallEvent::LocusChanged { locus: event_locus });
        } else {
            tracing::trace!(call_id = %self.id, sequence, "Ignoring stale locus");
        }
        applied
    }

    fn try_connect(&self) {
        if self.state() != CallState::Negotiating {
            return;
        }

        let negotiated = {
            let media = self.media.lock();
            media.local_description.is_some() && media.remote_description.is_some()
        };
        let established = self
            .locus
            .borrow()
            .as_ref()
            .map_or(false, |l| l.is_established_for(&self.ctx.local_id));
        if !negotiated || !established {
            return;
        }

        if !self.ctx.status.current().is_ready() {
            tracing::debug!(call_id = %self.id, "Call established, waiting for registered and connected");
            return;
        }

        self.transition(CallState::Connected);
    }

    fn terminate_remotely(&self) {
        if !self.transition(CallState::Terminating) {
            return;
        }
        tracing::info!(call_id = %self.id, "Call ended by the remote side");
        self.cancel.cancel();
        self.release_media();
        self.transition(CallState::Terminated);
    }

    fn fail(&self, error: PhoneError) {
        if self.state().is_terminal() {
            return;
        }

        tracing::warn!(call_id = %self.id, error = %error, category = error.category(), "Call failed");
        let _ = self.events.send(CallEvent::Error { error });
        if !self.transition(CallState::Errored) {
            return;
        }
        self.cancel.cancel();
        self.release_media();

        if let Some(locus_url) = self.locus_url() {
            self.spawn_leave(locus_url);
        }
    }

    /// Best-effort leave for a session that already reached a terminal state
    fn spawn_leave(&self, locus_url: String) {
        let signaling = self.ctx.signaling.clone();
        let timeout = self.ctx.teardown_timeout;
        let call_id = self.id;
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, signaling.leave_call(&locus_url)).await {
                Ok(Ok(_)) => tracing::debug!(%call_id, "Left call"),
                Ok(Err(e)) => tracing::debug!(%call_id, error = %e, "Leave was rejected"),
                Err(_) => tracing::debug!(%call_id, "Leave timed out"),
            }
        });
    }

    /// Stop self-acquired media; caller-supplied streams stay live
    fn release_media(&self) {
        let media = self.media.lock();
        match (&media.local_stream, media.externally_supplied) {
            (Some(stream), false) => stream.stop(),
            (Some(_), true) => {
                tracing::debug!(call_id = %self.id, "Leaving caller-owned media stream running")
            }
            (None, _) => {}
        }
    }

    fn transition(&self, next: CallState) -> bool {
        let mut previous = None;
        self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                previous = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });

        let Some(previous) = previous else {
            tracing::trace!(call_id = %self.id, state = %self.state(), rejected = %next, "Ignoring state transition");
            return false;
        };

        tracing::info!(
            call_id = %self.id,
            direction = %self.direction,
            from = %previous,
            to = %next,
            "Call state changed"
        );

        if next.is_terminal() {
            if let Some(registry) = self.ctx.registry.upgrade() {
                registry.remove(&self.id);
            }
        }

        let _ = self.events.send(CallEvent::StateChanged { previous, state: next });
        let _ = self.ctx.notices.send(SessionNotice::StateChanged {
            call_id: self.id,
            previous,
            state: next,
        });
        true
    }

    fn bind_locus(&self, locus_url: &str) {
        if let Some(registry) = self.ctx.registry.upgrade() {
            registry.bind_locus(locus_url, self.id);
        }
        let _ = self.ctx.notices.send(SessionNotice::LocusBound {
            call_id: self.id,
            locus_url: locus_url.to_string(),
        });
    }

    fn locus_url(&self) -> Option<String> {
        self.locus.borrow().as_ref().map(|l| l.url.clone())
    }

    async fn wait_for_terminal(&self) -> CallState {
        let mut rx = self.state.subscribe();
        let reached = rx.wait_for(CallState::is_terminal).await.map(|s| *s);
        reached.unwrap_or_else(|_| self.state())
    }

    fn invalid_state(&self) -> PhoneError {
        PhoneError::InvalidCallState {
            call_id: self.id,
            current_state: self.state(),
        }
    }
}

/// Media the remote side sends that the local description accepts
fn remote_stream(remote: &SessionDescription, local: &SessionDescription) -> Option<RemoteMediaStream> {
    let kinds: Vec<MediaKind> = remote
        .sending_kinds()
        .into_iter()
        .filter(|kind| local.media_line(*kind).map_or(false, |line| line.direction.receives()))
        .collect();

    if kinds.is_empty() {
        None
    } else {
        Some(RemoteMediaStream {
            id: remote.session_id.clone(),
            kinds,
        })
    }
}

impl fmt::Debug for CallSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallSession")
            .field("id", &self.id)
            .field("direction", &self.direction)
            .field("remote_identity", &self.remote_identity)
            .field("state", &self.state())
            .finish()
    }
}
