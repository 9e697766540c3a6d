//! Registration operations for the phone
//!
//! `register()` composes device registration and the realtime handshake.
//! The two halves fail independently: when the handshake fails after the
//! device registered, `registered()` reads true and `connected()` false,
//! and calling `register()` again only retries the handshake.

use super::dispatch::InboundSignal;
use super::recovery::{retry_with_backoff, RetryConfig};
use super::Phone;
use crate::device::DeviceDescriptor;
use crate::error::{PhoneError, PhoneResult};

impl Phone {
    /// Register the device, connect the realtime channel and pick up calls
    /// that were already ringing.
    ///
    /// Succeeds once the device is registered and the channel connected.
    /// A failure to list ringing calls is logged and does not fail the call.
    pub async fn register(&self) -> PhoneResult<()> {
        let device = self.device.register().await?;
        self.channel.connect(Some(&device)).await?;

        if self.config.fetch_active_calls_on_register {
            if let Err(e) = self.fetch_active_calls(&device).await {
                tracing::warn!(user_id = %device.user_id, error = %e, "Fetching active calls failed");
            }
        }

        tracing::info!(user_id = %device.user_id, "Phone registered and connected");
        Ok(())
    }

    /// Disconnect the realtime channel, then deregister the device.
    ///
    /// Idempotent; local state is cleared even if the backend refuses.
    pub async fn deregister(&self) -> PhoneResult<()> {
        self.channel.disconnect().await?;
        self.device.deregister().await?;
        tracing::info!(user_id = %self.user_id(), "Phone deregistered");
        Ok(())
    }

    /// [`Phone::register`] retried with backoff on recoverable errors
    pub async fn register_with_retry(&self, config: RetryConfig) -> PhoneResult<()> {
        retry_with_backoff("register", config, || self.register()).await
    }

    /// Queue invites for calls that started before this device registered.
    ///
    /// They go through the same gate as realtime events, so a call dialed
    /// before registration finished is announced exactly once.
    async fn fetch_active_calls(&self, device: &DeviceDescriptor) -> PhoneResult<()> {
        let invites = self
            .signaling
            .list_active_calls(device)
            .await
            .map_err(|e| PhoneError::signaling_failed(format!("listing active calls: {}", e)))?;

        let mut queued = 0usize;
        for invite in invites {
            if self.registry.contains_locus(&invite.locus.url) {
                continue;
            }
            if self.inbox.send(InboundSignal::Invite(invite)).is_err() {
                return Err(PhoneError::internal_error("call dispatcher stopped"));
            }
            queued += 1;
        }

        tracing::debug!(queued, "Fetched active calls");
        Ok(())
    }
}
