//! Phone builder

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::dispatch::{DispatchInputs, Dispatcher};
use super::registry::CallRegistry;
use super::status::StatusWatch;
use super::Phone;
use crate::call::SessionContext;
use crate::config::PhoneConfig;
use crate::device::{Credentials, DeviceRegistry, DirectoryService};
use crate::error::{PhoneError, PhoneResult};
use crate::events::EventEmitter;
use crate::media::{MediaAcquirer, MediaStreamAcquirer};
use crate::mercury::{RealtimeChannel, RealtimeTransport};
use crate::signaling::CallSignaling;
use crate::target::TargetResolver;

/// Builder for creating a [`Phone`]
///
/// Every collaborator is required; the configuration defaults to
/// [`PhoneConfig::default`].
pub struct PhoneBuilder {
    config: PhoneConfig,
    credentials: Option<Credentials>,
    directory: Option<Arc<dyn DirectoryService>>,
    transport: Option<Arc<dyn RealtimeTransport>>,
    media: Option<Arc<dyn MediaStreamAcquirer>>,
    resolver: Option<Arc<dyn TargetResolver>>,
    signaling: Option<Arc<dyn CallSignaling>>,
}

impl PhoneBuilder {
    pub fn new() -> Self {
        Self {
            config: PhoneConfig::default(),
            credentials: None,
            directory: None,
            transport: None,
            media: None,
            resolver: None,
            signaling: None,
        }
    }

    pub fn config(mut self, config: PhoneConfig) -> Self {
        self.config = config;
        self
    }

    pub fn credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Set the directory service used for device registration
    pub fn directory(mut self, directory: Arc<dyn DirectoryService>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Set the realtime transport
    pub fn transport(mut self, transport: Arc<dyn RealtimeTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the camera/microphone backend
    pub fn media(mut self, media: Arc<dyn MediaStreamAcquirer>) -> Self {
        self.media = Some(media);
        self
    }

    pub fn resolver(mut self, resolver: Arc<dyn TargetResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn signaling(mut self, signaling: Arc<dyn CallSignaling>) -> Self {
        self.signaling = Some(signaling);
        self
    }

    /// Build the phone and start its dispatcher task
    pub async fn build(self) -> PhoneResult<Arc<Phone>> {
        self.config.validate()?;

        let credentials = required(self.credentials, "credentials")?;
        if credentials.user_id.trim().is_empty() {
            return Err(PhoneError::invalid_configuration("credentials.user_id", "must not be empty"));
        }
        let directory = required(self.directory, "directory")?;
        let transport = required(self.transport, "transport")?;
        let media = required(self.media, "media")?;
        let resolver = required(self.resolver, "resolver")?;
        let signaling = required(self.signaling, "signaling")?;

        let config = self.config;
        let local_id = credentials.user_id.clone();

        let device = DeviceRegistry::new(directory, credentials, config.device_name.clone());
        let channel = RealtimeChannel::new(transport);
        let media = MediaAcquirer::new(media, config.default_facing_mode);
        let emitter = Arc::new(EventEmitter::new(config.event_channel_capacity));
        let registry = Arc::new(CallRegistry::new());
        let events = channel
            .take_events()
            .ok_or_else(|| PhoneError::internal_error("realtime event stream already taken"))?;

        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();

        let ctx = SessionContext {
            signaling: signaling.clone(),
            resolver,
            media: media.clone(),
            status: StatusWatch::new(device.subscribe(), channel.subscribe_state()),
            registry: Arc::downgrade(&registry),
            notices: notices_tx,
            local_id: local_id.clone(),
            default_constraints: config.default_constraints,
            negotiation_timeout: config.negotiation_timeout,
            teardown_timeout: config.teardown_timeout,
            event_capacity: config.event_channel_capacity,
        };

        let inputs = DispatchInputs {
            notices: notices_rx,
            events,
            inbox: inbox_rx,
            device: device.subscribe(),
            channel: channel.subscribe_state(),
        };
        let dispatcher = Dispatcher::new(registry.clone(), emitter.clone(), ctx.clone());
        let task = tokio::spawn(dispatcher.run(inputs));

        tracing::info!(user_id = %local_id, device_name = %config.device_name, "Phone created");

        Ok(Arc::new(Phone {
            config,
            device,
            channel,
            media,
            signaling,
            emitter,
            registry,
            ctx,
            inbox: inbox_tx,
            dispatcher: Mutex::new(Some(task)),
        }))
    }
}

impl Default for PhoneBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn required<T>(value: Option<T>, field: &str) -> PhoneResult<T> {
    value.ok_or_else(|| PhoneError::invalid_configuration(field, "required"))
}
