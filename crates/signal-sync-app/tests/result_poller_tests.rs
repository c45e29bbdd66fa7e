//! Integration tests for the background result poller lifecycle.

use std::sync::Arc;
use std::time::Duration;

use signal_sync_app::{PollOutcome, ResultPoller, SyncConfig, SyncCoordinator, SyncState};
use signal_sync_core::ImageResolver;
use signal_sync_transport::TransportError;
use signal_sync_ui::{StatusLight, UiState};

mod common;

use common::{ScriptedBackend, coordinator, failed_result, result_at};

fn poller(backend: &Arc<ScriptedBackend>) -> (ResultPoller, Arc<SyncState>) {
    let resolver = ImageResolver::new("http://detector.test:5000/").expect("valid base");
    let state = Arc::new(SyncState::new(resolver, UiState::new("v0.1.0", 6)));
    (
        ResultPoller::new(backend.clone(), Arc::clone(&state)),
        state,
    )
}

#[tokio::test(start_paused = true)]
async fn result_poller_tests_fetches_immediately_then_every_interval() {
    let backend = ScriptedBackend::new();
    let coordinator = coordinator(&backend);

    assert!(coordinator.start());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(backend.poll_calls(), 1);

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    assert_eq!(backend.poll_calls(), 2);

    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn result_poller_tests_each_tick_sends_a_fresh_cache_token() {
    let backend = ScriptedBackend::new();
    let coordinator = coordinator(&backend);

    coordinator.start();
    tokio::time::sleep(Duration::from_millis(4_100)).await;
    coordinator.shutdown();

    let tokens = backend.poll_tokens();
    assert_eq!(tokens.len(), 3);
    assert!(
        tokens.windows(2).all(|pair| pair[0] < pair[1]),
        "tokens must strictly increase: {tokens:?}"
    );
}

#[tokio::test(start_paused = true)]
async fn result_poller_tests_three_failures_stay_invisible() {
    let backend = ScriptedBackend::new();
    backend.push_poll(Err(TransportError::Network("connection refused".to_string())));
    backend.push_poll(Err(TransportError::Status {
        status: 404,
        detail: None,
    }));
    backend.push_poll(Err(TransportError::Timeout));
    let coordinator = coordinator(&backend);
    let mut ui = coordinator.subscribe_ui();
    ui.borrow_and_update();

    coordinator.start();
    tokio::time::sleep(Duration::from_millis(4_100)).await;

    assert_eq!(backend.poll_calls(), 3);
    assert!(!ui.has_changed().expect("ui sender should be alive"));
    let snapshot = coordinator.ui_snapshot();
    assert_eq!(snapshot.error_message, None);
    assert_eq!(snapshot.status, StatusLight::Ready);
    assert!(snapshot.view.is_none());
    assert_eq!(coordinator.last_applied_timestamp(), 0);
}

#[tokio::test(start_paused = true)]
async fn result_poller_tests_applies_newer_shared_result() {
    let backend = ScriptedBackend::new();
    backend.push_poll(Ok(None));
    backend.push_poll(Ok(Some(result_at(42, &[1, 2, 3, 4, 5, 6]))));
    let coordinator = coordinator(&backend);

    coordinator.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coordinator.ui_snapshot().view.is_none());

    tokio::time::sleep(Duration::from_millis(2_000)).await;
    let ui = coordinator.ui_snapshot();
    let view = ui.view.expect("shared result should be applied");
    assert_eq!(view.timestamp, Some(42));
    assert_eq!(view.total_count, 21);
    assert_eq!(ui.class_cells[5], Some(6));
    assert_eq!(coordinator.last_applied_timestamp(), 42);

    coordinator.shutdown();
}

#[tokio::test(start_paused = true)]
async fn result_poller_tests_start_and_stop_are_idempotent() {
    let backend = ScriptedBackend::new();
    let (poller, _state) = poller(&backend);

    assert!(!poller.stop());
    assert!(poller.start(Duration::from_millis(2_000)));
    assert!(!poller.start(Duration::from_millis(500)));
    assert!(poller.is_running());

    tokio::time::sleep(Duration::from_millis(2_100)).await;
    assert_eq!(backend.poll_calls(), 2);

    assert!(poller.stop());
    assert!(!poller.stop());
    assert!(!poller.is_running());

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.poll_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn result_poller_tests_dropping_coordinator_cancels_polling() {
    let backend = ScriptedBackend::new();
    let coordinator = coordinator(&backend);
    coordinator.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(coordinator.is_polling());

    drop(coordinator);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(backend.poll_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn result_poller_tests_kill_switch_keeps_poller_off() {
    let backend = ScriptedBackend::new();
    let config = SyncConfig {
        base_url: "http://detector.test:5000/".to_string(),
        polling_enabled: false,
        ..SyncConfig::default()
    };
    let coordinator =
        SyncCoordinator::new(config, backend.clone()).expect("coordinator should build");

    assert!(!coordinator.start());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!coordinator.is_polling());
    assert_eq!(backend.poll_calls(), 0);
}

#[tokio::test]
async fn result_poller_tests_discards_error_and_untimed_payloads() {
    let backend = ScriptedBackend::new();
    backend.push_poll(Ok(Some(failed_result("camera offline"))));
    backend.push_poll(Ok(Some(result_at(0, &[9]))));
    backend.push_poll(Ok(Some(result_at(7, &[1]))));
    backend.push_poll(Ok(Some(result_at(7, &[2]))));
    let (poller, state) = poller(&backend);

    assert_eq!(poller.poll_once().await, PollOutcome::Rejected);
    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Stale { last_applied: 0 }
    );
    assert!(state.ui_snapshot().view.is_none());

    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Applied { timestamp: 7 }
    );
    assert_eq!(
        poller.poll_once().await,
        PollOutcome::Stale { last_applied: 7 }
    );
    assert_eq!(poller.poll_once().await, PollOutcome::FetchFailed);

    let view = state.ui_snapshot().view.expect("view should be applied");
    assert_eq!(view.class_counts, Some(vec![1]));
}
