//! Inbound signaling dispatch
//!
//! One task per phone consumes realtime events, fetched invites, session
//! notices and status changes. Signaling is queued in arrival order and
//! only delivered while the phone is registered *and* connected; the check
//! is made at delivery time, so a slow registration delays an incoming
//! call notification but never drops it.
//!
//! Handlers subscribed with [`Phone::subscribe`](super::Phone::subscribe)
//! run on this task. A handler that blocks on a later event of the same
//! phone stalls delivery until it returns.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use super::registry::CallRegistry;
use super::status::PhoneStatus;
use crate::call::{CallId, CallSession, SessionContext, SessionNotice};
use crate::device::DeviceDescriptor;
use crate::error::PhoneResult;
use crate::events::{EventEmitter, PhoneEvent};
use crate::mercury::{RealtimeConnectionState, SignalingEvent, SignalingEventType};
use crate::signaling::{CallInvite, CallUpdate};

/// A signaling message waiting for delivery
#[derive(Debug, Clone)]
pub(crate) enum InboundSignal {
    Invite(CallInvite),
    Update(CallUpdate),
}

impl InboundSignal {
    fn from_event(event: &SignalingEvent) -> PhoneResult<Self> {
        match event.event_type {
            SignalingEventType::CallInvite => CallInvite::from_event(event).map(InboundSignal::Invite),
            SignalingEventType::CallUpdate | SignalingEventType::ParticipantChange => {
                CallUpdate::from_event(event).map(InboundSignal::Update)
            }
        }
    }
}

pub(crate) struct DispatchInputs {
    pub(crate) notices: mpsc::UnboundedReceiver<SessionNotice>,
    pub(crate) events: mpsc::UnboundedReceiver<SignalingEvent>,
    pub(crate) inbox: mpsc::UnboundedReceiver<InboundSignal>,
    pub(crate) device: watch::Receiver<Option<DeviceDescriptor>>,
    pub(crate) channel: watch::Receiver<RealtimeConnectionState>,
}

pub(crate) struct Dispatcher {
    registry: Arc<CallRegistry>,
    emitter: Arc<EventEmitter>,
    ctx: SessionContext,
    pending: VecDeque<InboundSignal>,
    /// Updates for loci no session has claimed yet (an outbound call whose
    /// create request has not returned)
    orphans: VecDeque<CallUpdate>,
    status: PhoneStatus,
}

impl Dispatcher {
    pub(crate) fn new(registry: Arc<CallRegistry>, emitter: Arc<EventEmitter>, ctx: SessionContext) -> Self {
        let status = ctx.status.current();
        Self {
            registry,
            emitter,
            ctx,
            pending: VecDeque::new(),
            orphans: VecDeque::new(),
            status,
        }
    }

    pub(crate) async fn run(mut self, mut inputs: DispatchInputs) {
        tracing::debug!(user_id = %self.ctx.local_id, "Call dispatcher started");

        loop {
            tokio::select! {
                biased;

                Some(notice) = inputs.notices.recv() => self.on_notice(notice).await,

                Ok(()) = inputs.device.changed() => {
                    inputs.device.borrow_and_update();
                    self.on_status_change().await;
                }

                Ok(()) = inputs.channel.changed() => {
                    inputs.channel.borrow_and_update();
                    self.on_status_change().await;
                }

                Some(event) = inputs.events.recv() => {
                    match InboundSignal::from_event(&event) {
                        Ok(signal) => self.pending.push_back(signal),
                        Err(e) => tracing::warn!(
                            event_type = ?event.event_type,
                            session_id = %event.session_id,
                            error = %e,
                            "Dropping undecodable signaling event"
                        ),
                    }
                    self.drain().await;
                }

                Some(signal) = inputs.inbox.recv() => {
                    self.pending.push_back(signal);
                    self.drain().await;
                }

                else => break,
            }
        }

        tracing::debug!(user_id = %self.ctx.local_id, "Call dispatcher stopped");
    }

    async fn on_notice(&mut self, notice: SessionNotice) {
        match notice {
            SessionNotice::LocusBound { call_id, locus_url } => self.replay_orphans(call_id, &locus_url),
            SessionNotice::StateChanged {
                call_id,
                previous,
                state,
            } => {
                self.emitter
                    .emit(PhoneEvent::CallStateChanged {
                        call_id,
                        previous,
                        state,
                    })
                    .await;
            }
        }
    }

    async fn on_status_change(&mut self) {
        let status = self.ctx.status.current();
        if status == self.status {
            return;
        }
        let previous = std::mem::replace(&mut self.status, status);

        tracing::debug!(
            registered = status.registered,
            connected = status.connected,
            "Phone status changed"
        );

        if status.registered != previous.registered {
            self.emitter
                .emit(PhoneEvent::RegistrationChanged {
                    registered: status.registered,
                })
                .await;
        }
        if status.connected != previous.connected {
            self.emitter
                .emit(PhoneEvent::ConnectionChanged {
                    connected: status.connected,
                })
                .await;
        }

        if status.is_ready() {
            for session in self.registry.all() {
                session.reevaluate();
            }
            self.drain().await;
        }
    }

    /// Deliver queued signaling while the phone is ready
    async fn drain(&mut self) {
        while !self.pending.is_empty() {
            if !self.ctx.status.current().is_ready() {
                tracing::debug!(
                    pending = self.pending.len(),
                    "Holding signaling until registered and connected"
                );
                return;
            }
            if let Some(signal) = self.pending.pop_front() {
                self.deliver(signal).await;
            }
        }
    }

    async fn deliver(&mut self, signal: InboundSignal) {
        match signal {
            InboundSignal::Invite(invite) => self.deliver_invite(invite).await,
            InboundSignal::Update(update) => self.deliver_update(update),
        }
    }

    async fn deliver_invite(&mut self, invite: CallInvite) {
        let locus_url = invite.locus.url.clone();

        if let Some(session) = self.registry.find_by_locus(&locus_url) {
            session.apply_locus(invite.locus);
            return;
        }

        if !invite.locus.is_ringing_for(&self.ctx.local_id) {
            tracing::debug!(%locus_url, "Invite does not ring this user, ignoring");
            return;
        }

        let session = CallSession::inbound(self.ctx.clone(), invite);
        self.registry.insert(session.clone());
        self.registry.bind_locus(&locus_url, session.id());

        tracing::info!(
            call_id = %session.id(),
            caller = %session.remote_identity(),
            %locus_url,
            "Incoming call"
        );
        self.emitter
            .emit(PhoneEvent::IncomingCall { call: session.handle() })
            .await;
    }

    fn deliver_update(&mut self, update: CallUpdate) {
        match self.registry.find_by_locus(&update.locus.url) {
            Some(session) => session.apply_update(update),
            None => {
                tracing::debug!(locus_url = %update.locus.url, "Update for an unknown call, holding it");
                if self.orphans.len() >= self.ctx.event_capacity {
                    self.orphans.pop_front();
                }
                self.orphans.push_back(update);
            }
        }
    }

    fn replay_orphans(&mut self, call_id: CallId, locus_url: &str) {
        let Some(session) = self.registry.get(&call_id) else {
            return;
        };

        let (matching, rest): (Vec<CallUpdate>, Vec<CallUpdate>) =
            self.orphans.drain(..).partition(|update| update.locus.url == locus_url);
        self.orphans = rest.into();

        for update in matching {
            tracing::debug!(%call_id, sequence = update.locus.sequence, "Replaying held update");
            session.apply_update(update);
        }
    }
}
