//! Integration tests for the update state machine.
//!
//! Every flow is driven through the bridge, the same way the UI surface
//! drives the host; state is observed through the watch projection and the
//! emitted event stream.

mod common;

use std::time::Duration;

use hivenote::bridge::HostEvent;
use hivenote::update::UpdateStatus;
use hivenote::update::source::FixtureReleaseSource;

use common::{
    RUNNING_VERSION, collect_until, feed, progress_percents, spawn_updater, started_count,
    test_config,
};

// =============================================================================
// Check: available / up-to-date / timeout / failure
// =============================================================================

#[tokio::test]
async fn check_reports_newer_version_as_available() {
    let (bridge, status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.7")));

    let response = bridge.check().await;
    assert!(response.available);
    assert_eq!(response.version.as_deref(), Some("1.0.7"));
    assert!(response.download_url.is_some());
    assert!(response.error.is_none());
    assert_eq!(*status.borrow(), UpdateStatus::Available);
}

#[tokio::test]
async fn check_reports_equal_and_older_versions_as_not_available() {
    for version in ["1.0.5", "1.0.3"] {
        let (bridge, status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed(version)));

        let response = bridge.check().await;
        assert!(!response.available, "feed {version} vs running {RUNNING_VERSION}");
        assert!(response.message.is_some());
        assert_eq!(*status.borrow(), UpdateStatus::Idle);
    }
}

#[tokio::test]
async fn check_timeout_is_not_available_and_returns_to_idle() {
    let mut config = test_config();
    config.check_timeout_ms = 50;
    let source =
        FixtureReleaseSource::new(feed("1.0.7")).with_latency(Duration::from_millis(500));
    let (bridge, status) = spawn_updater(config, source);

    let response = bridge.check().await;
    assert!(!response.available);
    assert!(response.message.as_deref().unwrap_or_default().contains("timed out"));
    assert!(response.error.is_none(), "a timeout is an outcome, not an error");
    assert_eq!(*status.borrow(), UpdateStatus::Idle);
}

#[tokio::test]
async fn check_failure_carries_the_cause_and_returns_to_idle() {
    let (bridge, status) =
        spawn_updater(test_config(), FixtureReleaseSource::broken("feed unreachable"));

    let response = bridge.check().await;
    assert!(!response.available);
    assert!(response.error.as_deref().unwrap_or_default().contains("feed unreachable"));
    assert_eq!(*status.borrow(), UpdateStatus::Idle);

    // The failure is not sticky: the next check works.
    let (bridge, status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.7")));
    assert!(bridge.check().await.available);
    assert_eq!(*status.borrow(), UpdateStatus::Available);
}

// =============================================================================
// State graph: Downloading only from Available, ReadyToInstall only from
// Downloading
// =============================================================================

#[tokio::test]
async fn download_is_rejected_while_idle() {
    let (bridge, status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.7")));
    let mut events = bridge.subscribe();

    let ack = bridge.download().await;
    assert!(!ack.success);
    assert_eq!(*status.borrow(), UpdateStatus::Idle);
    assert!(events.try_recv().is_err(), "no events for a rejected download");
}

#[tokio::test]
async fn download_is_rejected_after_up_to_date_check() {
    let (bridge, status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.5")));

    assert!(!bridge.check().await.available);
    let ack = bridge.download().await;
    assert!(!ack.success);
    assert_eq!(*status.borrow(), UpdateStatus::Idle);
}

#[tokio::test]
async fn install_is_rejected_unless_ready() {
    let (bridge, _status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.7")));

    assert!(!bridge.install().await.success);
    bridge.check().await;
    assert!(!bridge.install().await.success, "Available is not ReadyToInstall");
}

// =============================================================================
// Download: happy path, monotonic progress, terminal complete at 100
// =============================================================================

#[tokio::test]
async fn download_completes_with_monotonic_progress() {
    let (bridge, status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.7")));

    assert!(bridge.check().await.available);
    let mut events = bridge.subscribe();

    let ack = bridge.download().await;
    assert!(ack.success);

    let seen =
        collect_until(&mut events, |e| matches!(e, HostEvent::DownloadComplete { .. })).await;

    assert_eq!(started_count(&seen), 1);
    match seen.first() {
        Some(HostEvent::DownloadStarted) => {}
        other => panic!("expected download-started first, got {other:?}"),
    }

    let percents = progress_percents(&seen);
    assert!(!percents.is_empty());
    assert!(percents.windows(2).all(|w| w[0] <= w[1]), "progress must not decrease: {percents:?}");
    assert_eq!(percents.last().copied(), Some(100.0));

    match seen.last() {
        Some(HostEvent::DownloadComplete { version }) => assert_eq!(version, "1.0.7"),
        other => panic!("expected download-complete last, got {other:?}"),
    }
    assert_eq!(*status.borrow(), UpdateStatus::ReadyToInstall);
}

#[tokio::test]
async fn duplicate_download_request_starts_one_session() {
    let source =
        FixtureReleaseSource::new(feed("1.0.7")).with_steps(10, Duration::from_millis(30));
    let (bridge, _status) = spawn_updater(test_config(), source);

    assert!(bridge.check().await.available);
    let mut events = bridge.subscribe();

    let first = bridge.download().await;
    let second = bridge.download().await;
    assert!(first.success);
    assert!(second.success, "duplicate request is an idempotent no-op");
    assert!(second.message.as_deref().unwrap_or_default().contains("already"));

    let seen =
        collect_until(&mut events, |e| matches!(e, HostEvent::DownloadComplete { .. })).await;
    assert_eq!(started_count(&seen), 1, "exactly one download-started: {seen:?}");
}

#[tokio::test]
async fn check_during_download_reports_the_known_release() {
    let source =
        FixtureReleaseSource::new(feed("1.0.7")).with_steps(10, Duration::from_millis(30));
    let (bridge, _status) = spawn_updater(test_config(), source);

    assert!(bridge.check().await.available);
    let mut events = bridge.subscribe();
    assert!(bridge.download().await.success);

    // Re-querying mid-download answers from owned state, without another
    // feed round-trip.
    let response = bridge.check().await;
    assert!(response.available);
    assert_eq!(response.version.as_deref(), Some("1.0.7"));

    collect_until(&mut events, |e| matches!(e, HostEvent::DownloadComplete { .. })).await;
}

// =============================================================================
// Download failure: update-error, back to Available, fresh retry from 0%
// =============================================================================

#[tokio::test]
async fn failed_download_reverts_to_available_and_retry_starts_fresh() {
    let source = FixtureReleaseSource::new(feed("1.0.7"))
        .with_steps(4, Duration::from_millis(10))
        .fail_once_after(2);
    let (bridge, status) = spawn_updater(test_config(), source);

    assert!(bridge.check().await.available);
    let mut events = bridge.subscribe();

    assert!(bridge.download().await.success);
    let first_session =
        collect_until(&mut events, |e| matches!(e, HostEvent::UpdateError { .. })).await;

    let first_percents = progress_percents(&first_session);
    assert!(!first_percents.is_empty());
    assert!(first_percents.last().copied() < Some(100.0), "a failed session never reaches 100");
    assert_eq!(*status.borrow(), UpdateStatus::Available);

    // Retry: a brand-new session, progress starting over.
    assert!(bridge.download().await.success);
    let second_session =
        collect_until(&mut events, |e| matches!(e, HostEvent::DownloadComplete { .. })).await;

    assert_eq!(started_count(&second_session), 1);
    let second_percents = progress_percents(&second_session);
    assert!(
        second_percents.first() < first_percents.last(),
        "retry restarts from scratch: {second_percents:?} after {first_percents:?}"
    );
    assert_eq!(second_percents.last().copied(), Some(100.0));
    assert_eq!(*status.borrow(), UpdateStatus::ReadyToInstall);
}

#[tokio::test]
async fn download_timeout_is_retryable() {
    let mut config = test_config();
    config.download_timeout_ms = 100;
    let source =
        FixtureReleaseSource::new(feed("1.0.7")).with_steps(50, Duration::from_millis(100));
    let (bridge, status) = spawn_updater(config, source);

    assert!(bridge.check().await.available);
    let mut events = bridge.subscribe();
    assert!(bridge.download().await.success);

    let seen = collect_until(&mut events, |e| matches!(e, HostEvent::UpdateError { .. })).await;
    match seen.last() {
        Some(HostEvent::UpdateError { message }) => {
            assert!(message.contains("timed out"), "got: {message}");
        }
        other => panic!("expected update-error, got {other:?}"),
    }
    assert_eq!(*status.borrow(), UpdateStatus::Available);
}

// =============================================================================
// Install
// =============================================================================

#[tokio::test]
async fn install_is_simulated_in_development_mode() {
    let (bridge, status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.7")));

    assert!(bridge.check().await.available);
    let mut events = bridge.subscribe();
    assert!(bridge.download().await.success);
    collect_until(&mut events, |e| matches!(e, HostEvent::DownloadComplete { .. })).await;

    let ack = bridge.install().await;
    assert!(ack.success);
    assert!(ack.message.as_deref().unwrap_or_default().contains("simulated"));
    assert_eq!(*status.borrow(), UpdateStatus::ReadyToInstall);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn install_error_surfaces_and_app_keeps_running() {
    // Production mode on a platform without an installer: the command fails,
    // an update-error is emitted, and the machine stays ReadyToInstall.
    let mut config = test_config();
    config.is_development_mode = false;
    let (bridge, status) = spawn_updater(config, FixtureReleaseSource::new(feed("1.0.7")));

    assert!(bridge.check().await.available);
    let mut events = bridge.subscribe();
    assert!(bridge.download().await.success);
    collect_until(&mut events, |e| matches!(e, HostEvent::DownloadComplete { .. })).await;

    let ack = bridge.install().await;
    assert!(!ack.success);
    assert!(ack.error.is_some());

    let seen = collect_until(&mut events, |e| matches!(e, HostEvent::UpdateError { .. })).await;
    assert!(!seen.is_empty());
    assert_eq!(*status.borrow(), UpdateStatus::ReadyToInstall);

    // Still alive and answering.
    let response = bridge.check().await;
    assert!(response.available);
}

// =============================================================================
// Misc
// =============================================================================

#[tokio::test]
async fn app_version_query_reports_the_running_version() {
    let (bridge, _status) = spawn_updater(test_config(), FixtureReleaseSource::new(feed("1.0.7")));
    assert_eq!(bridge.app_version().await, RUNNING_VERSION);
}
