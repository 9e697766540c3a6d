//! Call operations for the phone

use super::Phone;
use crate::call::{CallHandle, CallId, CallSession};
use crate::error::PhoneResult;
use crate::media::{LocalMediaStream, MediaConstraints, OfferOptions};
use crate::target::CallTarget;

/// Options for [`Phone::dial`]
#[derive(Debug, Clone, Default)]
pub struct DialOptions {
    /// Media to send; defaults to the phone's configured constraints
    pub constraints: Option<MediaConstraints>,
    pub offer_options: OfferOptions,
    /// Caller-owned stream; when set no media is acquired
    pub local_media_stream: Option<LocalMediaStream>,
}

impl DialOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_constraints(mut self, constraints: MediaConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }

    pub fn with_offer_options(mut self, offer_options: OfferOptions) -> Self {
        self.offer_options = offer_options;
        self
    }

    pub fn with_local_media_stream(mut self, stream: LocalMediaStream) -> Self {
        self.local_media_stream = Some(stream);
        self
    }
}

impl Phone {
    /// Start an outbound call.
    ///
    /// Classifies `target` synchronously (an unrecognized identifier fails
    /// here, before any session exists), then returns a handle while
    /// resolution, media acquisition and the offer/answer exchange continue
    /// in the background. Dialing a target that already has a live outbound
    /// call returns that call.
    pub fn dial(&self, target: &str, options: DialOptions) -> PhoneResult<CallHandle> {
        let target = CallTarget::parse(target)?;
        let key = target.key();
        let constraints = options.constraints.unwrap_or(self.config.default_constraints);
        let target_display = target.to_string();

        let (session, created) = self.registry.claim_outbound(key, || {
            CallSession::outbound(
                self.ctx.clone(),
                target,
                constraints,
                options.offer_options,
                options.local_media_stream,
            )
        });

        if !created {
            tracing::info!(call_id = %session.id(), target = %target_display, "Target already has a live call, returning it");
            return Ok(session.handle());
        }

        tracing::info!(call_id = %session.id(), target = %target_display, "Dialing");
        session.begin_negotiation();
        tokio::spawn(session.clone().run_outbound());
        Ok(session.handle())
    }

    /// Acquire a caller-owned local stream, reusable across calls
    pub async fn create_local_media_stream(&self, constraints: MediaConstraints) -> PhoneResult<LocalMediaStream> {
        self.media.acquire(&constraints).await
    }

    pub fn active_calls(&self) -> Vec<CallHandle> {
        self.registry.all().iter().map(|s| s.handle()).collect()
    }

    pub fn call(&self, call_id: &CallId) -> Option<CallHandle> {
        self.registry.get(call_id).map(|s| s.handle())
    }
}
