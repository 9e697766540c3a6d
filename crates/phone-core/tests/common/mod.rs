//! In-memory loopback backend shared by the integration tests
//!
//! A [`Network`] plays the directory, realtime and call signaling services
//! for any number of users. Each phone gets its own [`LoopbackUser`]
//! adapter (implementing every backend trait) and a [`FakeCamera`].

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use url::Url;

use phone_core::{
    CallHandle, CallInvite, CallSignaling, CallTarget, CallUpdate, Credentials, DeviceDescriptor, DirectoryService,
    FacingMode, LocalMediaStream, Locus, LocusParticipant, LocusState, MediaConstraints, MediaKind,
    MediaStreamAcquirer, MediaTrack, ParticipantState, Phone, PhoneBuilder, PhoneConfig, PhoneEventHandler,
    RealtimeTransport, ResolvedTarget, SessionDescription, SignalingEvent, SignalingEventType, TargetResolver,
};

const USER_PREFIX: &str = "loopback://users/";

pub const ALICE: &str = "alice@loopback.test";
pub const BOB: &str = "bob@loopback.test";
pub const CAROL: &str = "carol@loopback.test";

struct Call {
    locus: Locus,
    offer: SessionDescription,
}

#[derive(Default)]
struct NetworkState {
    feeds: HashMap<String, mpsc::UnboundedSender<SignalingEvent>>,
    calls: HashMap<String, Call>,
}

/// Shared backend for every user in a test
#[derive(Default)]
pub struct Network {
    state: Mutex<NetworkState>,
    next_locus: AtomicU64,
}

impl Network {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn user(self: &Arc<Self>, user_id: &str) -> Arc<LoopbackUser> {
        Arc::new(LoopbackUser {
            network: self.clone(),
            user_id: user_id.to_string(),
            registrations: AtomicUsize::new(0),
            deregistrations: AtomicUsize::new(0),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            refuse_connects: AtomicUsize::new(0),
        })
    }

    pub fn locus(&self, url: &str) -> Option<Locus> {
        self.state.lock().calls.get(url).map(|call| call.locus.clone())
    }

    fn push(state: &NetworkState, user_id: &str, event: SignalingEvent) {
        if let Some(feed) = state.feeds.get(user_id) {
            let _ = feed.send(event);
        }
    }

    /// Bump the locus, then push an update to every participant except `actor`
    fn update<F>(&self, url: &str, actor: &str, answer: Option<SessionDescription>, mutate: F) -> anyhow::Result<Locus>
    where
        F: FnOnce(&mut Locus),
    {
        let mut state = self.state.lock();
        let call = state
            .calls
            .get_mut(url)
            .ok_or_else(|| anyhow::anyhow!("no such locus {}", url))?;
        mutate(&mut call.locus);
        call.locus.sequence += 1;
        let locus = call.locus.clone();

        let update = CallUpdate {
            locus: locus.clone(),
            answer,
        };
        let event = update.into_event(SignalingEventType::CallUpdate)?;
        for participant in locus.participants.iter().filter(|p| p.id != actor) {
            Self::push(&state, &participant.id, event.clone());
        }
        Ok(locus)
    }
}

/// Per-user view of the [`Network`], implementing every backend boundary
pub struct LoopbackUser {
    network: Arc<Network>,
    pub user_id: String,
    pub registrations: AtomicUsize,
    pub deregistrations: AtomicUsize,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    /// Number of upcoming handshakes to refuse
    pub refuse_connects: AtomicUsize,
}

impl LoopbackUser {
    fn set_participant(locus: &mut Locus, user_id: &str, state: ParticipantState) {
        if let Some(p) = locus.participants.iter_mut().find(|p| p.id == user_id) {
            p.state = state;
        }
    }
}

#[async_trait]
impl DirectoryService for LoopbackUser {
    async fn register(&self, credentials: &Credentials, device_name: &str) -> anyhow::Result<DeviceDescriptor> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Ok(DeviceDescriptor {
            device_url: Some(Url::parse(&format!(
                "https://wdm.loopback.test/devices/{}/{}",
                credentials.user_id, device_name
            ))?),
            user_id: credentials.user_id.clone(),
            registered_at: Utc::now(),
        })
    }

    async fn deregister(&self, _descriptor: &DeviceDescriptor) -> anyhow::Result<()> {
        self.deregistrations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl RealtimeTransport for LoopbackUser {
    async fn connect(&self, device: &DeviceDescriptor) -> anyhow::Result<BoxStream<'static, SignalingEvent>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let refused = self
            .refuse_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            anyhow::bail!("websocket handshake refused");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.network.state.lock().feeds.insert(device.user_id.clone(), tx);

        let stream = futures::stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) });
        Ok(stream.boxed())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        self.network.state.lock().feeds.remove(&self.user_id);
        Ok(())
    }
}

#[async_trait]
impl TargetResolver for LoopbackUser {
    async fn resolve(&self, target: &CallTarget) -> anyhow::Result<ResolvedTarget> {
        match target {
            CallTarget::Email(email) => Ok(ResolvedTarget {
                target: target.clone(),
                address: format!("{}{}", USER_PREFIX, email),
            }),
            other => anyhow::bail!("no route to {}", other),
        }
    }
}

#[async_trait]
impl CallSignaling for LoopbackUser {
    async fn create_call(
        &self,
        device: &DeviceDescriptor,
        target: &ResolvedTarget,
        offer: &SessionDescription,
    ) -> anyhow::Result<Locus> {
        let callee = target
            .address
            .strip_prefix(USER_PREFIX)
            .ok_or_else(|| anyhow::anyhow!("not a loopback address: {}", target.address))?
            .to_string();
        let n = self.network.next_locus.fetch_add(1, Ordering::SeqCst);

        let locus = Locus {
            url: format!("https://locus.loopback.test/loci/{}", n),
            sequence: 1,
            state: LocusState::Active,
            host: device.user_id.clone(),
            participants: vec![
                LocusParticipant {
                    id: device.user_id.clone(),
                    state: ParticipantState::Joined,
                    device_url: device.device_url.as_ref().map(|u| u.to_string()),
                },
                LocusParticipant {
                    id: callee.clone(),
                    state: ParticipantState::Notified,
                    device_url: None,
                },
            ],
        };

        let invite = CallInvite {
            locus: locus.clone(),
            offer: offer.clone(),
        };
        let event = invite.into_event()?;

        let mut state = self.network.state.lock();
        state.calls.insert(
            locus.url.clone(),
            Call {
                locus: locus.clone(),
                offer: offer.clone(),
            },
        );
        Network::push(&state, &callee, event);
        Ok(locus)
    }

    async fn answer_call(
        &self,
        device: &DeviceDescriptor,
        locus_url: &str,
        answer: &SessionDescription,
    ) -> anyhow::Result<Locus> {
        let device_url = device.device_url.as_ref().map(|u| u.to_string());
        self.network
            .update(locus_url, &device.user_id, Some(answer.clone()), |locus| {
                if let Some(p) = locus.participants.iter_mut().find(|p| p.id == device.user_id) {
                    p.state = ParticipantState::Joined;
                    p.device_url = device_url;
                }
            })
    }

    async fn decline_call(&self, device: &DeviceDescriptor, locus_url: &str) -> anyhow::Result<Locus> {
        self.network.update(locus_url, &device.user_id, None, |locus| {
            Self::set_participant(locus, &device.user_id, ParticipantState::Declined);
        })
    }

    async fn leave_call(&self, locus_url: &str) -> anyhow::Result<Locus> {
        let user_id = self.user_id.clone();
        self.network.update(locus_url, &self.user_id, None, |locus| {
            Self::set_participant(locus, &user_id, ParticipantState::Left);
            let joined = locus
                .participants
                .iter()
                .filter(|p| p.state == ParticipantState::Joined)
                .count();
            if joined < 2 {
                locus.state = LocusState::Inactive;
            }
        })
    }

    async fn list_active_calls(&self, device: &DeviceDescriptor) -> anyhow::Result<Vec<CallInvite>> {
        let state = self.network.state.lock();
        Ok(state
            .calls
            .values()
            .filter(|call| call.locus.is_ringing_for(&device.user_id))
            .map(|call| CallInvite {
                locus: call.locus.clone(),
                offer: call.offer.clone(),
            })
            .collect())
    }
}

/// Call signaling that delays, breaks or rewrites selected requests
/// before handing them to the loopback backend
pub struct ScriptedSignaling {
    inner: Arc<LoopbackUser>,
    create_delay: Option<Duration>,
    fail_listing: bool,
    answer_rewrite: Option<fn(SessionDescription) -> SessionDescription>,
}

impl ScriptedSignaling {
    pub fn new(inner: Arc<LoopbackUser>) -> Self {
        Self {
            inner,
            create_delay: None,
            fail_listing: false,
            answer_rewrite: None,
        }
    }

    /// Hold the create response after the backend already placed the call
    pub fn delay_create(mut self, delay: Duration) -> Self {
        self.create_delay = Some(delay);
        self
    }

    pub fn fail_listing(mut self) -> Self {
        self.fail_listing = true;
        self
    }

    pub fn rewrite_answer(mut self, rewrite: fn(SessionDescription) -> SessionDescription) -> Self {
        self.answer_rewrite = Some(rewrite);
        self
    }
}

#[async_trait]
impl CallSignaling for ScriptedSignaling {
    async fn create_call(
        &self,
        device: &DeviceDescriptor,
        target: &ResolvedTarget,
        offer: &SessionDescription,
    ) -> anyhow::Result<Locus> {
        let locus = self.inner.create_call(device, target, offer).await?;
        if let Some(delay) = self.create_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(locus)
    }

    async fn answer_call(
        &self,
        device: &DeviceDescriptor,
        locus_url: &str,
        answer: &SessionDescription,
    ) -> anyhow::Result<Locus> {
        match self.answer_rewrite {
            Some(rewrite) => self.inner.answer_call(device, locus_url, &rewrite(answer.clone())).await,
            None => self.inner.answer_call(device, locus_url, answer).await,
        }
    }

    async fn decline_call(&self, device: &DeviceDescriptor, locus_url: &str) -> anyhow::Result<Locus> {
        self.inner.decline_call(device, locus_url).await
    }

    async fn leave_call(&self, locus_url: &str) -> anyhow::Result<Locus> {
        self.inner.leave_call(locus_url).await
    }

    async fn list_active_calls(&self, device: &DeviceDescriptor) -> anyhow::Result<Vec<CallInvite>> {
        if self.fail_listing {
            anyhow::bail!("active call listing unavailable");
        }
        self.inner.list_active_calls(device).await
    }
}

/// Camera/microphone fake that counts acquisitions and releases
#[derive(Default)]
pub struct FakeCamera {
    pub acquisitions: AtomicUsize,
    pub stopped: Arc<AtomicUsize>,
    pub last_constraints: Mutex<Option<MediaConstraints>>,
}

#[async_trait]
impl MediaStreamAcquirer for FakeCamera {
    async fn acquire(&self, constraints: &MediaConstraints) -> anyhow::Result<LocalMediaStream> {
        self.acquisitions.fetch_add(1, Ordering::SeqCst);
        *self.last_constraints.lock() = Some(*constraints);

        let mut tracks = Vec::new();
        if constraints.audio {
            tracks.push(MediaTrack::new(MediaKind::Audio, "loopback microphone"));
        }
        if constraints.video {
            tracks.push(MediaTrack::new(MediaKind::Video, "loopback camera"));
        }

        let stopped = self.stopped.clone();
        let stream = LocalMediaStream::with_stop_hook(tracks, move |_| {
            stopped.fetch_add(1, Ordering::SeqCst);
        });
        Ok(match constraints.facing_mode {
            Some(facing_mode) => stream.with_facing_mode(facing_mode),
            None => stream,
        })
    }
}

pub struct TestPhone {
    pub phone: Arc<Phone>,
    pub backend: Arc<LoopbackUser>,
    pub camera: Arc<FakeCamera>,
}

pub fn test_config() -> PhoneConfig {
    PhoneConfig::new()
        .with_device_name("loopback")
        .with_negotiation_timeout(Duration::from_secs(5))
        .with_teardown_timeout(Duration::from_secs(1))
}

pub async fn phone(network: &Arc<Network>, user_id: &str) -> TestPhone {
    phone_with_config(network, user_id, test_config()).await
}

pub async fn phone_with_config(network: &Arc<Network>, user_id: &str, config: PhoneConfig) -> TestPhone {
    scripted_phone(network, user_id, config, |script| script).await
}

/// Build a phone whose call signaling goes through a [`ScriptedSignaling`]
pub async fn scripted_phone<F>(network: &Arc<Network>, user_id: &str, config: PhoneConfig, script: F) -> TestPhone
where
    F: FnOnce(ScriptedSignaling) -> ScriptedSignaling,
{
    let backend = network.user(user_id);
    let signaling = Arc::new(script(ScriptedSignaling::new(backend.clone())));
    let camera = Arc::new(FakeCamera::default());
    let phone = PhoneBuilder::new()
        .config(config)
        .credentials(Credentials::new(user_id, format!("token-{}", user_id)))
        .directory(backend.clone())
        .transport(backend.clone())
        .media(camera.clone())
        .resolver(backend.clone())
        .signaling(signaling)
        .build()
        .await
        .expect("phone builds");
    TestPhone { phone, backend, camera }
}

/// Records incoming calls together with the phone status seen by the handler
pub struct IncomingRecorder {
    phone: Weak<Phone>,
    pub seen: Mutex<Vec<(CallHandle, bool, bool)>>,
    tx: mpsc::UnboundedSender<CallHandle>,
}

impl IncomingRecorder {
    pub fn attach(phone: &Arc<Phone>) -> (Arc<Self>, mpsc::UnboundedReceiver<CallHandle>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Self {
            phone: Arc::downgrade(phone),
            seen: Mutex::new(Vec::new()),
            tx,
        });
        phone.subscribe(recorder.clone());
        (recorder, rx)
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl PhoneEventHandler for IncomingRecorder {
    async fn on_incoming_call(&self, call: CallHandle) {
        let (registered, connected) = match self.phone.upgrade() {
            Some(phone) => (phone.registered(), phone.connected()),
            None => (false, false),
        };
        self.seen.lock().push((call.clone(), registered, connected));
        let _ = self.tx.send(call);
    }
}

pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out waiting")
}

pub fn default_facing_config(facing_mode: FacingMode) -> PhoneConfig {
    test_config().with_default_facing_mode(facing_mode)
}
