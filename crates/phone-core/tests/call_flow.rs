//! Two phones calling each other over the loopback network

mod common;

use std::sync::atomic::Ordering;
use std::time::Duration;

use common::*;
use phone_core::{
    AnswerOptions, CallDirection, CallEvent, CallHandle, CallState, DialOptions, LocusState, MediaConstraints,
    MediaKind, PhoneError, PhoneEvent, SessionDescription,
};
use tracing_test::traced_test;

/// Errors published on a call's event stream so far
fn drain_errors(events: &mut tokio::sync::broadcast::Receiver<CallEvent>) -> Vec<PhoneError> {
    let mut errors = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let CallEvent::Error { error } = event {
            errors.push(error);
        }
    }
    errors
}

fn add_unoffered_video(mut answer: SessionDescription) -> SessionDescription {
    let mut video = answer.media[0].clone();
    video.mid = answer.media.len().to_string();
    video.kind = MediaKind::Video;
    video.codecs = vec!["VP8".to_string()];
    answer.media.push(video);
    answer
}

fn locus_url(call: &CallHandle) -> String {
    call.locus().expect("call has a locus").url
}

async fn assert_callee_released(ringing: &CallHandle, locus_url: &str, network: &Network) {
    within(ringing.wait_for_state(CallState::Terminated)).await.unwrap();
    assert_eq!(network.locus(locus_url).unwrap().state, LocusState::Inactive);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_dial_answer_connects_both_sides() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    let bob = phone(&network, BOB).await;
    let (recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    let outgoing = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    let ringing = within(incoming.recv()).await.unwrap();

    assert_eq!(ringing.direction(), CallDirection::Inbound);
    assert_eq!(ringing.state(), CallState::Negotiating);
    assert_eq!(ringing.remote_identity().as_deref(), Some(ALICE));
    assert!(ringing.remote_description().is_some());

    ringing.answer(AnswerOptions::new()).await.unwrap();
    assert_eq!(ringing.state(), CallState::Connected);
    within(outgoing.wait_for_state(CallState::Connected)).await.unwrap();

    assert!(outgoing.remote_media_stream().is_some());
    assert!(ringing.remote_media_stream().is_some());
    assert_eq!(recorder.count(), 1);

    let stats = bob.phone.stats();
    assert_eq!(stats.connected_calls, 1);
    assert_eq!(stats.inbound_calls, 1);

    outgoing.hangup().await.unwrap();
    within(ringing.wait_for_state(CallState::Terminated)).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_placed_before_registration_is_announced_once_ready() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    let bob = phone(&network, BOB).await;
    let (recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();

    let outgoing = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    within(outgoing.wait_for_locus()).await.unwrap();
    assert_eq!(recorder.count(), 0);

    bob.phone.register().await.unwrap();
    let ringing = within(incoming.recv()).await.unwrap();

    let seen = recorder.seen.lock();
    assert_eq!(seen.len(), 1);
    let (handle, registered, connected) = &seen[0];
    assert_eq!(handle.id(), ringing.id());
    assert!(*registered && *connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reregistering_does_not_announce_a_known_call_twice() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    let bob = phone(&network, BOB).await;
    let (recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    alice.phone.dial(BOB, DialOptions::new()).unwrap();
    let ringing = within(incoming.recv()).await.unwrap();

    bob.phone.deregister().await.unwrap();
    bob.phone.register().await.unwrap();
    // a later call flushes the dispatcher queue behind the refetch
    let carol = phone(&network, CAROL).await;
    carol.phone.register().await.unwrap();
    carol.phone.dial(BOB, DialOptions::new()).unwrap();
    let second = within(incoming.recv()).await.unwrap();

    assert_ne!(ringing.id(), second.id());
    assert_eq!(recorder.count(), 2);
    assert_eq!(bob.phone.active_calls().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_decline_terminates_the_caller() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    let bob = phone(&network, BOB).await;
    let (_recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    let outgoing = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    let ringing = within(incoming.recv()).await.unwrap();

    ringing.decline().await.unwrap();

    assert_eq!(ringing.state(), CallState::Terminated);
    within(outgoing.wait_for_state(CallState::Terminated)).await.unwrap();
    assert!(alice.phone.active_calls().is_empty());
    assert!(bob.phone.active_calls().is_empty());
    // no media was acquired for a declined call
    assert_eq!(bob.camera.acquisitions.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_remote_hangup_ends_the_other_side() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    let bob = phone(&network, BOB).await;
    let (_recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    let outgoing = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    let ringing = within(incoming.recv()).await.unwrap();
    ringing
        .answer(AnswerOptions::new().with_constraints(MediaConstraints::audio_only()))
        .await
        .unwrap();
    within(outgoing.wait_for_state(CallState::Connected)).await.unwrap();

    let local = ringing.local_media_stream().unwrap();
    assert!(local.has_audio() && !local.has_video());

    outgoing.hangup().await.unwrap();

    within(ringing.wait_for_state(CallState::Terminated)).await.unwrap();
    assert!(!local.is_active());
    assert_eq!(bob.camera.stopped.load(Ordering::SeqCst), 1);
    assert_eq!(alice.camera.stopped.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_call_state_changes_reach_phone_subscribers() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    alice.phone.register().await.unwrap();
    let mut events = alice.phone.subscribe_events();

    let call = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    call.hangup().await.unwrap();

    let mut states = Vec::new();
    while states.last() != Some(&CallState::Terminated) {
        if let PhoneEvent::CallStateChanged { call_id, state, .. } = within(events.recv()).await.unwrap() {
            assert_eq!(call_id, call.id());
            states.push(state);
        }
    }
    assert_eq!(
        states,
        vec![CallState::Negotiating, CallState::Terminating, CallState::Terminated]
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_hangup_waits_for_a_slow_create_response() {
    let network = Network::new();
    let alice = scripted_phone(&network, ALICE, test_config(), |script| {
        script.delay_create(Duration::from_millis(500))
    })
    .await;
    let bob = phone(&network, BOB).await;
    let (_recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    let outgoing = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    let ringing = within(incoming.recv()).await.unwrap();
    let url = locus_url(&ringing);
    // the backend placed the call but alice has no locus yet
    assert!(outgoing.locus().is_none());

    outgoing.hangup().await.unwrap();

    assert_eq!(outgoing.state(), CallState::Terminated);
    assert_callee_released(&ringing, &url, &network).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_response_after_teardown_leaves_the_call() {
    let network = Network::new();
    // longer than the one second teardown timeout
    let alice = scripted_phone(&network, ALICE, test_config(), |script| {
        script.delay_create(Duration::from_millis(1500))
    })
    .await;
    let bob = phone(&network, BOB).await;
    let (_recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    let outgoing = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    let ringing = within(incoming.recv()).await.unwrap();
    let url = locus_url(&ringing);

    outgoing.hangup().await.unwrap();
    assert_eq!(outgoing.state(), CallState::Terminated);

    assert_callee_released(&ringing, &url, &network).await;
    assert!(alice.phone.active_calls().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unanswered_call_errors_at_the_negotiation_ceiling() {
    let network = Network::new();
    let config = test_config().with_negotiation_timeout(Duration::from_millis(300));
    let alice = phone_with_config(&network, ALICE, config).await;
    let bob = phone(&network, BOB).await;
    let (_recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    let outgoing = alice.phone.dial(BOB, DialOptions::new()).unwrap();
    let mut events = outgoing.subscribe().unwrap();
    let ringing = within(incoming.recv()).await.unwrap();
    let url = locus_url(&ringing);

    within(outgoing.wait_for_state(CallState::Errored)).await.unwrap();

    let errors = drain_errors(&mut events);
    assert!(
        matches!(errors.as_slice(), [PhoneError::NegotiationFailed { .. }]),
        "unexpected errors {:?}",
        errors
    );
    assert!(alice.phone.call(&outgoing.id()).is_none());
    assert_eq!(alice.camera.stopped.load(Ordering::SeqCst), 1);
    assert_callee_released(&ringing, &url, &network).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conflicting_answer_errors_the_caller() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    let bob = scripted_phone(&network, BOB, test_config(), |script| {
        script.rewrite_answer(add_unoffered_video)
    })
    .await;
    let (_recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    let outgoing = alice
        .phone
        .dial(BOB, DialOptions::new().with_constraints(MediaConstraints::audio_only()))
        .unwrap();
    let mut events = outgoing.subscribe().unwrap();
    let ringing = within(incoming.recv()).await.unwrap();

    ringing.answer(AnswerOptions::new()).await.unwrap();

    within(outgoing.wait_for_state(CallState::Errored)).await.unwrap();
    let errors = drain_errors(&mut events);
    assert!(
        matches!(errors.as_slice(), [PhoneError::NegotiationFailed { .. }]),
        "unexpected errors {:?}",
        errors
    );
    assert!(alice.phone.active_calls().is_empty());
    // the caller leaves, which ends the call for bob too
    within(ringing.wait_for_state(CallState::Terminated)).await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn test_incoming_call_is_logged() {
    let network = Network::new();
    let alice = phone(&network, ALICE).await;
    let bob = phone(&network, BOB).await;
    let (_recorder, mut incoming) = IncomingRecorder::attach(&bob.phone);
    alice.phone.register().await.unwrap();
    bob.phone.register().await.unwrap();

    alice.phone.dial(BOB, DialOptions::new()).unwrap();
    within(incoming.recv()).await.unwrap();

    assert!(logs_contain("Incoming call"));
    assert!(logs_contain("Dialing"));
}
