//! Video Session Simulator
//!
//! Drives one session against the in-process simulated provider and logs what
//! a UI observer would see.
//!
//! # Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize tracing (plain or JSON)
//! 3. Register the session in the global registry
//! 4. Join, simulate remote churn, toggle local media
//! 5. Leave, destroy, print the diagnostic error log

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use video_session::config::Config;
use video_session::engine::{JoinRequest, SimulatedProviderFactory, TrackKind};
use video_session::session::SessionOrchestrator;
use video_session::subscription::{MemoizedViews, SessionRegistry, ThrottledView};
use video_session::ui_config::UiConfigStore;

/// Gap between simulated remote events; shorter than the throttle interval so
/// coalescing is visible.
const CHURN_STEP: Duration = Duration::from_millis(40);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "video_session=debug,vs=debug,info".into());
    let (json_layer, text_layer) = if config.log_json {
        (Some(tracing_subscriber::fmt::layer().json()), None)
    } else {
        (None, Some(tracing_subscriber::fmt::layer()))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    info!(?config, "Starting video session simulator");

    let factory = SimulatedProviderFactory::new();
    let control = factory.control().clone();
    let shutdown = CancellationToken::new();
    let session = SessionRegistry::global().get_or_create(&config.session_scope, || {
        SessionOrchestrator::spawn(
            config.session_scope.clone(),
            Arc::new(factory.clone()),
            config.session_settings(),
            shutdown.child_token(),
        )
        .0
    });

    let view = ThrottledView::attach(&session, config.throttle_interval())
        .await
        .map_err(|e| anyhow!("attach failed: {}", e.message))?;
    let mut snapshots = view.subscribe();
    let observer = tokio::spawn(async move {
        let mut memo = MemoizedViews::new();
        while snapshots.changed().await.is_ok() {
            let snapshot = Arc::clone(&snapshots.borrow_and_update());
            let views = memo.views(&snapshot);
            let names: Vec<&str> = views
                .participants
                .iter()
                .map(|p| p.display_name.as_str())
                .collect();
            info!(
                participants = ?names,
                audio = snapshot.is_audio_enabled,
                video = snapshot.is_video_enabled,
                screen = snapshot.is_screen_sharing,
                "Snapshot delivered"
            );
        }
    });

    let ui = UiConfigStore::new();
    let mut request = JoinRequest::new(config.room_url.clone(), config.user_name.clone())
        .with_behavior(&ui.behavior());
    if let Some(token) = config.room_token.clone() {
        request = request.with_token(token);
    }

    session
        .join(request)
        .await
        .map_err(|e| anyhow!("join failed: {} ({})", e.user_message, e.code))?;

    let provider = control
        .provider()
        .ok_or_else(|| anyhow!("provider missing after join"))?;
    let mut remotes = Vec::new();
    for name in ["Grace", "Linus", "Barbara"] {
        if let Some(id) = provider.add_remote(name) {
            remotes.push(id);
        }
        tokio::time::sleep(CHURN_STEP).await;
    }
    if let Some(first) = remotes.first() {
        provider.stop_remote_track(first, TrackKind::Video);
        provider.send_remote_message(first, "hello from the simulator");
        tokio::time::sleep(CHURN_STEP).await;
        provider.start_remote_track(first, TrackKind::Video);
    }

    if let Err(e) = session.toggle_audio().await {
        warn!(code = %e.code, "Audio toggle failed");
    }
    if let Err(e) = session.toggle_screen_share().await {
        warn!(code = %e.code, "Screen share toggle failed");
    }
    if let Err(e) = session.send_chat_message("hi everyone").await {
        warn!(code = %e.code, "Chat failed");
    }
    if let Some(last) = remotes.last() {
        if let Err(e) = session.mute_participant(last.clone()).await {
            warn!(code = %e.code, "Mute failed");
        }
    }

    tokio::time::sleep(config.throttle_interval() * 2).await;
    let status = session
        .status()
        .await
        .map_err(|e| anyhow!("status failed: {}", e.message))?;
    info!(
        phase = %status.phase,
        participants = status.participant_count,
        "Session status"
    );

    if let Err(e) = session.leave().await {
        warn!(code = %e.code, "Leave failed");
    }
    session
        .destroy()
        .await
        .map_err(|e| anyhow!("destroy failed: {}", e.message))?;

    let log = session
        .export_error_log()
        .await
        .map_err(|e| anyhow!("error log export failed: {}", e.message))?;
    info!(error_log = %log, "Diagnostic error log");

    drop(view);
    observer.abort();
    SessionRegistry::global().remove(&config.session_scope);
    shutdown.cancel();
    info!("Video session simulator finished");
    Ok(())
}
