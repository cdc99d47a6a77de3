//! Throttled views and the session registry.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use video_session::engine::SimulatedProviderFactory;
use video_session::session::{SessionOrchestrator, SessionPhase};
use video_session::subscription::{MemoizedViews, SessionRegistry, ThrottledView};
use vs_test_utils::{fast_settings, SessionHarness, TestRoom};

const INTERVAL: Duration = Duration::from_millis(250);

#[tokio::test(start_paused = true)]
async fn test_burst_is_rate_limited_and_last_wins() {
    let harness = SessionHarness::new();
    harness
        .handle()
        .join(TestRoom::new("standup").join_request().build())
        .await
        .unwrap();
    let view = ThrottledView::attach(harness.handle(), INTERVAL).await.unwrap();
    let mut receiver = view.subscribe();

    let deliveries = tokio::spawn(async move {
        let mut seen = Vec::new();
        while receiver.changed().await.is_ok() {
            let count = receiver.borrow_and_update().participant_count();
            seen.push((Instant::now(), count));
        }
        seen
    });

    // Ten remotes, each producing three events, far faster than the interval
    let provider = harness.provider();
    for i in 0..10 {
        provider.add_remote(&format!("remote-{i}")).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tokio::time::sleep(INTERVAL * 4).await;

    let final_state = harness.handle().media_state().await.unwrap();
    assert_eq!(final_state.participant_count(), 11);
    assert!(Arc::ptr_eq(&view.latest(), &final_state));

    drop(view);
    let seen = deliveries.await.unwrap();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[1].0 - pair[0].0 >= INTERVAL, "deliveries too close: {pair:?}");
    }
    assert_eq!(seen.last().unwrap().1, 11);
    // Thirty raw snapshots, at most one per interval delivered
    assert!(seen.len() <= 3);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_session_delivers_immediately() {
    let harness = SessionHarness::new();
    harness
        .handle()
        .join(TestRoom::new("standup").join_request().build())
        .await
        .unwrap();
    tokio::time::sleep(INTERVAL * 2).await;
    let view = ThrottledView::attach(harness.handle(), INTERVAL).await.unwrap();
    let mut receiver = view.subscribe();
    let started = Instant::now();

    harness.handle().toggle_audio().await.unwrap();
    receiver.changed().await.unwrap();

    assert!(Instant::now() - started < INTERVAL);
    assert!(!receiver.borrow().is_audio_enabled);
}

#[tokio::test]
async fn test_dropping_view_keeps_session() {
    let harness = SessionHarness::new();
    harness
        .handle()
        .join(TestRoom::new("standup").join_request().build())
        .await
        .unwrap();

    let view = ThrottledView::attach(harness.handle(), INTERVAL).await.unwrap();
    drop(view);

    let status = harness.handle().status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Joined);
    assert_eq!(harness.control().active_connections(), 1);
    assert_eq!(harness.control().leave_calls(), 0);

    // A remounted view starts from the live state
    let remounted = ThrottledView::attach(harness.handle(), INTERVAL).await.unwrap();
    assert_eq!(remounted.latest().participant_count(), 1);
    assert!(remounted.latest().local_participant().is_some());
}

#[tokio::test]
async fn test_view_survives_leave_and_rejoin() {
    let harness = SessionHarness::new();
    let room = TestRoom::new("standup");
    let view = ThrottledView::attach(harness.handle(), Duration::from_millis(20))
        .await
        .unwrap();

    harness.handle().join(room.join_request().build()).await.unwrap();
    harness.handle().leave().await.unwrap();
    harness.handle().join(room.join_request().build()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(view.is_active());
    assert_eq!(view.latest().participant_count(), 1);
}

#[tokio::test]
async fn test_registry_concurrent_first_use_creates_one_session() {
    let registry = Arc::new(SessionRegistry::new());
    let inits = Arc::new(AtomicUsize::new(0));
    let factory = SimulatedProviderFactory::new();

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        let inits = Arc::clone(&inits);
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            registry.get_or_create("shared", || {
                inits.fetch_add(1, Ordering::SeqCst);
                SessionOrchestrator::spawn(
                    "shared",
                    Arc::new(factory),
                    fast_settings(),
                    CancellationToken::new(),
                )
                .0
            })
        }));
    }
    let mut handles = Vec::new();
    for task in tasks {
        handles.push(task.await.unwrap());
    }

    assert_eq!(inits.load(Ordering::SeqCst), 1);
    assert!(handles.iter().all(|h| h.scope() == "shared"));

    // All handles drive the same session
    handles[0]
        .join(TestRoom::new("standup").join_request().build())
        .await
        .unwrap();
    let status = handles[7].status().await.unwrap();
    assert_eq!(status.phase, SessionPhase::Joined);
    assert_eq!(factory.control().join_calls(), 1);
}

#[tokio::test]
async fn test_registry_replaces_closed_session() {
    let registry = SessionRegistry::new();
    let factory = SimulatedProviderFactory::new();
    let spawn = || {
        SessionOrchestrator::spawn(
            "scope",
            Arc::new(factory.clone()),
            fast_settings(),
            CancellationToken::new(),
        )
    };

    let (first, task) = spawn();
    let first = registry.get_or_create("scope", || first);
    first.cancel();
    task.await.unwrap();
    assert!(registry.get("scope").is_none());

    let second = registry.get_or_create("scope", || spawn().0);
    assert!(!second.is_closed());
    assert!(second.status().await.is_ok());
}

#[tokio::test]
async fn test_global_registry_is_shared() {
    let a = SessionRegistry::global();
    let b = SessionRegistry::global();
    assert!(std::ptr::eq(a, b));
}

#[tokio::test]
async fn test_memoized_views_follow_session() {
    let harness = SessionHarness::new();
    harness
        .handle()
        .join(TestRoom::new("standup").join_request().user_name("Zoe").build())
        .await
        .unwrap();
    harness.provider().add_remote("Ann").unwrap();
    harness.handle().toggle_audio().await.unwrap();

    let snapshot = harness.handle().media_state().await.unwrap();
    let mut memo = MemoizedViews::new();
    let views = memo.views(&snapshot);
    let names: Vec<&str> = views
        .participants
        .iter()
        .map(|p| p.display_name.as_str())
        .collect();
    assert_eq!(names, vec!["Zoe", "Ann"]);
    assert_eq!(views.remotes.len(), 1);

    // Same pointer, no recomputation
    memo.views(&harness.handle().media_state().await.unwrap());
    assert_eq!(memo.recomputations(), 1);
}
