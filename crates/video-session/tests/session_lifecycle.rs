//! Session lifecycle integration tests.
//!
//! Drive the orchestrator through its handle against the simulated provider:
//! idempotent joins, room switching, concurrent join rejection, teardown and
//! recovery from errors.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::time::Duration;
use tokio::sync::broadcast;
use video_session::config::SessionSettings;
use video_session::engine::SimulatedProviderFactory;
use video_session::errors::ProviderFailure;
use video_session::normalizer::RecoveryAction;
use video_session::session::SessionPhase;
use vs_test_utils::{fast_settings, SessionHarness, SnapshotRecorder, TestRoom};

async fn wait_for_phase(phases: &mut broadcast::Receiver<SessionPhase>, target: SessionPhase) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if phases.recv().await.unwrap() == target {
                return;
            }
        }
    })
    .await
    .expect("phase not reached");
}

fn drain_phases(phases: &mut broadcast::Receiver<SessionPhase>) -> Vec<SessionPhase> {
    let mut seen = Vec::new();
    while let Ok(phase) = phases.try_recv() {
        seen.push(phase);
    }
    seen
}

#[tokio::test]
async fn test_join_same_room_twice_connects_once() {
    let harness = SessionHarness::new();
    let room = TestRoom::new("standup");

    harness.handle().join(room.join_request().build()).await.unwrap();
    harness.handle().join(room.join_request().build()).await.unwrap();

    assert_eq!(harness.control().join_calls(), 1);
    assert_eq!(harness.control().active_connections(), 1);
    let status = harness.handle().status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Joined);
    assert_eq!(status.room, Some(room.url()));
}

#[tokio::test]
async fn test_join_normalizes_room_spelling() {
    let harness = SessionHarness::new();
    let room = TestRoom::new("standup");
    let shouty = video_session::engine::JoinRequest::new(
        common::types::RoomUrl::parse("HTTPS://VIDEO.EXAMPLE.COM/standup/").unwrap(),
        "Ada",
    );

    harness.handle().join(room.join_request().build()).await.unwrap();
    harness.handle().join(shouty).await.unwrap();

    assert_eq!(harness.control().join_calls(), 1);
}

#[tokio::test]
async fn test_switch_room_leaves_then_joins() {
    let harness = SessionHarness::new();
    let first = TestRoom::new("first");
    let second = TestRoom::new("second");

    harness.handle().join(first.join_request().build()).await.unwrap();
    let mut phases = harness.handle().phase_changes();

    harness.handle().join(second.join_request().build()).await.unwrap();

    assert_eq!(
        drain_phases(&mut phases),
        vec![
            SessionPhase::Leaving,
            SessionPhase::Idle,
            SessionPhase::Joining,
            SessionPhase::Joined
        ]
    );
    assert_eq!(harness.control().active_connections(), 1);
    assert_eq!(harness.control().leave_calls(), 1);
    assert_eq!(harness.control().joined_rooms(), vec![first.url(), second.url()]);
    let status = harness.handle().status().await.unwrap();
    assert_eq!(status.room, Some(second.url()));
}

#[tokio::test]
async fn test_concurrent_join_is_rejected() {
    let harness = SessionHarness::new();
    harness.control().set_join_delay(Duration::from_millis(200));
    let mut phases = harness.handle().phase_changes();

    let first = TestRoom::new("first");
    let in_flight = {
        let handle = harness.handle().clone();
        let request = first.join_request().build();
        tokio::spawn(async move { handle.join(request).await })
    };
    wait_for_phase(&mut phases, SessionPhase::Joining).await;

    let err = harness
        .handle()
        .join(TestRoom::new("second").join_request().build())
        .await
        .unwrap_err();
    assert_eq!(err.code, "join-in-progress");
    assert!(err.recoverable);

    // Leaving mid-join is rejected the same way
    let err = harness.handle().leave().await.unwrap_err();
    assert_eq!(err.code, "join-in-progress");

    in_flight.await.unwrap().unwrap();
    let status = harness.handle().status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Joined);
    assert_eq!(status.room, Some(first.url()));
    assert_eq!(harness.control().join_calls(), 1);
}

#[tokio::test]
async fn test_destroy_then_join_starts_fresh() {
    let harness = SessionHarness::new();
    let mut recorder = SnapshotRecorder::attach(harness.handle()).await;

    harness
        .handle()
        .join(TestRoom::new("first").join_request().build())
        .await
        .unwrap();
    harness.provider().add_remote("Grace").unwrap();
    while recorder.next().await.participant_count() < 2 {}

    harness.handle().destroy().await.unwrap();

    let state = harness.handle().media_state().await.unwrap();
    assert!(state.participants.is_empty());
    assert!(state.local_session_id.is_none());
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Idle);
    assert_eq!(harness.control().active_connections(), 0);
    assert_eq!(harness.control().destroy_calls(), 1);

    harness
        .handle()
        .join(TestRoom::new("second").join_request().build())
        .await
        .unwrap();

    assert_eq!(harness.control().providers_created(), 2);
    let state = harness.handle().media_state().await.unwrap();
    assert_eq!(state.participant_count(), 1);
    assert!(state.local_participant().is_some());
    // The recorder registered before destroy saw the reset
    recorder.drain();
    assert!(recorder.received().iter().any(|snapshot| snapshot.is_empty()));
}

#[tokio::test]
async fn test_destroy_when_idle_is_harmless() {
    let harness = SessionHarness::new();

    harness.handle().destroy().await.unwrap();
    harness.handle().destroy().await.unwrap();

    assert_eq!(harness.control().providers_created(), 0);
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Idle);
}

#[tokio::test]
async fn test_destroy_fails_in_flight_join() {
    let harness = SessionHarness::new();
    harness.control().set_join_delay(Duration::from_millis(200));
    let mut phases = harness.handle().phase_changes();

    let in_flight = {
        let handle = harness.handle().clone();
        let request = TestRoom::new("first").join_request().build();
        tokio::spawn(async move { handle.join(request).await })
    };
    wait_for_phase(&mut phases, SessionPhase::Joining).await;

    harness.handle().destroy().await.unwrap();

    let err = in_flight.await.unwrap().unwrap_err();
    assert_eq!(err.code, "session-destroyed");
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Idle);
}

#[tokio::test]
async fn test_actions_before_join_are_normalized() {
    let harness = SessionHarness::new();

    let err = harness.handle().toggle_video().await.unwrap_err();
    assert_eq!(err.code, "not-joined");
    assert_eq!(err.action, RecoveryAction::Rejoin);

    let err = harness
        .handle()
        .mute_participant(common::types::ParticipantSessionId::random())
        .await
        .unwrap_err();
    assert_eq!(err.code, "not-joined");

    let log = harness.handle().recent_errors().await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].context.as_deref(), Some("toggle-video"));
    assert_eq!(log[1].context.as_deref(), Some("mute-participant"));
}

#[tokio::test]
async fn test_recoverable_join_failure_then_rejoin() {
    let harness = SessionHarness::new();
    harness
        .control()
        .fail_next_join(ProviderFailure::Network("wifi dropped".to_string()));
    let room = TestRoom::new("standup");

    let err = harness.handle().join(room.join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "network-error");
    assert_eq!(err.action, RecoveryAction::Retry);

    let status = harness.handle().status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Error);
    assert_eq!(status.last_error.unwrap().code, "network-error");
    assert!(harness.handle().media_state().await.unwrap().is_empty());

    harness.handle().join(room.join_request().build()).await.unwrap();
    let status = harness.handle().status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Joined);
    assert!(status.last_error.is_none());
}

#[tokio::test]
async fn test_fatal_join_failure_allows_rejoin_by_default() {
    let harness = SessionHarness::new();
    harness.control().fail_next_join(ProviderFailure::MeetingEnded);
    let room = TestRoom::new("standup");

    let err = harness.handle().join(room.join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "meeting-ended");
    assert!(!err.recoverable);

    harness.handle().join(room.join_request().build()).await.unwrap();
}

#[tokio::test]
async fn test_fatal_join_failure_blocks_rejoin_when_configured() {
    let harness = SessionHarness::with_settings(SessionSettings {
        allow_rejoin_after_fatal: false,
        ..fast_settings()
    });
    harness.control().fail_next_join(ProviderFailure::MeetingEnded);
    let room = TestRoom::new("standup");

    harness.handle().join(room.join_request().build()).await.unwrap_err();

    let err = harness.handle().join(room.join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "rejoin-blocked");
    assert_eq!(err.action, RecoveryAction::ContactSupport);
    assert_eq!(harness.control().join_calls(), 1);

    // An explicit leave clears the error
    harness.handle().leave().await.unwrap();
    harness.handle().join(room.join_request().build()).await.unwrap();
    assert_eq!(harness.control().join_calls(), 2);
}

#[tokio::test]
async fn test_init_failure_is_not_sticky() {
    let factory = SimulatedProviderFactory::new();
    factory
        .control()
        .fail_init(ProviderFailure::Internal("sdk bundle missing".to_string()));
    let harness = SessionHarness::with_factory(factory, fast_settings());
    let room = TestRoom::new("standup");

    let err = harness.handle().join(room.join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "init-failed");
    assert_eq!(err.action, RecoveryAction::Refresh);

    harness.handle().join(room.join_request().build()).await.unwrap();
    assert_eq!(harness.control().providers_created(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_join_timeout() {
    let harness = SessionHarness::new();
    harness.control().set_join_delay(Duration::from_secs(60));

    let err = harness
        .handle()
        .join(TestRoom::new("slow").join_request().build())
        .await
        .unwrap_err();

    assert_eq!(err.code, "timeout");
    assert_eq!(err.action, RecoveryAction::Retry);
    assert_eq!(harness.control().active_connections(), 0);
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Error);
}

#[tokio::test(start_paused = true)]
async fn test_join_acknowledged_after_timeout_is_left() {
    let harness = SessionHarness::new();
    harness.control().set_join_ack_delay(Duration::from_secs(60));
    let room = TestRoom::new("slow");

    let err = harness.handle().join(room.join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "timeout");
    assert_eq!(harness.control().active_connections(), 0);

    harness.control().set_join_ack_delay(Duration::ZERO);
    harness.handle().join(room.join_request().build()).await.unwrap();
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Joined);
    assert_eq!(harness.control().active_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_join_while_leaving_waits_for_leave() {
    let harness = SessionHarness::new();
    let room = TestRoom::new("standup");
    harness.handle().join(room.join_request().build()).await.unwrap();
    harness.control().set_leave_delay(Duration::from_millis(100));
    let mut phases = harness.handle().phase_changes();

    let leaving = {
        let handle = harness.handle().clone();
        tokio::spawn(async move { handle.leave().await })
    };
    wait_for_phase(&mut phases, SessionPhase::Leaving).await;

    harness.handle().join(room.join_request().build()).await.unwrap();
    leaving.await.unwrap().unwrap();

    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Joined);
    assert_eq!(harness.control().join_calls(), 2);
    assert_eq!(harness.control().active_connections(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_join_while_leaving_times_out() {
    let harness = SessionHarness::new();
    let room = TestRoom::new("standup");
    harness.handle().join(room.join_request().build()).await.unwrap();
    // Longer than the settle window in fast_settings
    harness.control().set_leave_delay(Duration::from_secs(2));
    let mut phases = harness.handle().phase_changes();

    let leaving = {
        let handle = harness.handle().clone();
        tokio::spawn(async move { handle.leave().await })
    };
    wait_for_phase(&mut phases, SessionPhase::Leaving).await;

    let err = harness.handle().join(room.join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "leave-timeout");
    assert_eq!(err.action, RecoveryAction::Retry);

    leaving.await.unwrap().unwrap();
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Idle);
    assert_eq!(harness.control().join_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_second_join_while_leaving_is_rejected() {
    let harness = SessionHarness::new();
    let room = TestRoom::new("standup");
    harness.handle().join(room.join_request().build()).await.unwrap();
    harness.control().set_leave_delay(Duration::from_millis(100));
    let mut phases = harness.handle().phase_changes();

    let leaving = {
        let handle = harness.handle().clone();
        tokio::spawn(async move { handle.leave().await })
    };
    wait_for_phase(&mut phases, SessionPhase::Leaving).await;

    let queued = {
        let handle = harness.handle().clone();
        let request = room.join_request().build();
        tokio::spawn(async move { handle.join(request).await })
    };
    tokio::task::yield_now().await;
    // Round trip through the actor so the queued join is registered first
    harness.handle().status().await.unwrap();

    let err = harness.handle().join(room.join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "join-in-progress");

    leaving.await.unwrap().unwrap();
    queued.await.unwrap().unwrap();
    assert_eq!(harness.control().join_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_leave_cancels_join_queued_behind_leave() {
    let harness = SessionHarness::new();
    let room = TestRoom::new("standup");
    harness.handle().join(room.join_request().build()).await.unwrap();
    harness.control().set_leave_delay(Duration::from_millis(200));
    let mut phases = harness.handle().phase_changes();

    let first_leave = {
        let handle = harness.handle().clone();
        tokio::spawn(async move { handle.leave().await })
    };
    wait_for_phase(&mut phases, SessionPhase::Leaving).await;

    let queued = {
        let handle = harness.handle().clone();
        let request = room.join_request().build();
        tokio::spawn(async move { handle.join(request).await })
    };
    tokio::task::yield_now().await;
    harness.handle().status().await.unwrap();

    harness.handle().leave().await.unwrap();
    first_leave.await.unwrap().unwrap();

    let err = queued.await.unwrap().unwrap_err();
    assert_eq!(err.code, "join-cancelled");
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Idle);
    assert_eq!(harness.control().join_calls(), 1);
}

#[tokio::test]
async fn test_leave_failure_enters_error() {
    let harness = SessionHarness::new();
    harness
        .handle()
        .join(TestRoom::new("standup").join_request().build())
        .await
        .unwrap();
    harness
        .control()
        .fail_next_leave(ProviderFailure::Timeout("bye timed out".to_string()));

    let err = harness.handle().leave().await.unwrap_err();
    assert_eq!(err.code, "timeout");
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Error);
    // The half-left connection is released rather than leaked
    assert_eq!(harness.control().active_connections(), 0);

    harness.handle().leave().await.unwrap();
    let status = harness.handle().status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Idle);
    assert_eq!(status.participant_count, 0);
    assert_eq!(harness.control().active_connections(), 0);

    harness
        .handle()
        .join(TestRoom::new("other").join_request().build())
        .await
        .unwrap();
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Joined);
    assert_eq!(harness.control().active_connections(), 1);
    assert_eq!(harness.control().providers_created(), 2);
}

#[tokio::test]
async fn test_leave_failure_during_switch_allows_rejoin() {
    let harness = SessionHarness::new();
    harness
        .handle()
        .join(TestRoom::new("first").join_request().build())
        .await
        .unwrap();
    harness
        .control()
        .fail_next_leave(ProviderFailure::Network("bye lost".to_string()));

    let err = harness
        .handle()
        .join(TestRoom::new("second").join_request().build())
        .await
        .unwrap_err();
    assert_eq!(err.code, "network-error");
    assert_eq!(harness.control().active_connections(), 0);

    // Joining from the error state recovers directly
    harness
        .handle()
        .join(TestRoom::new("second").join_request().build())
        .await
        .unwrap();
    assert_eq!(harness.handle().status().await.unwrap().phase, SessionPhase::Joined);
    assert_eq!(harness.control().active_connections(), 1);
}

#[tokio::test]
async fn test_error_log_is_bounded_and_exportable() {
    let harness = SessionHarness::with_settings(SessionSettings {
        error_log_capacity: 3,
        ..fast_settings()
    });

    for _ in 0..5 {
        harness.handle().toggle_audio().await.unwrap_err();
    }
    harness.handle().send_chat_message("hi").await.unwrap_err();

    let log = harness.handle().recent_errors().await.unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log[2].context.as_deref(), Some("send-chat-message"));

    let json: serde_json::Value =
        serde_json::from_str(&harness.handle().export_error_log().await.unwrap()).unwrap();
    assert_eq!(json.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_shutdown_releases_connection() {
    let harness = SessionHarness::new();
    harness
        .handle()
        .join(TestRoom::new("standup").join_request().build())
        .await
        .unwrap();
    let control = harness.control().clone();
    let handle = harness.handle().clone();

    harness.shutdown().await;

    assert_eq!(control.active_connections(), 0);
    let err = handle.join(TestRoom::new("standup").join_request().build()).await.unwrap_err();
    assert_eq!(err.code, "session-unavailable");
}
