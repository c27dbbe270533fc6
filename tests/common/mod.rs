//! Shared fixtures for host-runtime integration tests.
//!
//! No network access needed — update flows run against
//! `FixtureReleaseSource` and asset-server tests serve from a temp dir.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};

use hivenote::bridge::{self, HostEvent, UpdateBridge};
use hivenote::config::HostConfig;
use hivenote::update::source::{FeedAsset, FixtureReleaseSource, ReleaseFeed, ReleaseSource};
use hivenote::update::{UpdateStatus, Updater};

/// The version the updater believes it is running.
pub const RUNNING_VERSION: &str = "1.0.5";

/// Config tuned for tests: development mode (no automatic checks), tight
/// timeouts.
pub fn test_config() -> HostConfig {
    HostConfig {
        is_development_mode: true,
        check_timeout_ms: 500,
        download_timeout_ms: 5_000,
        ..HostConfig::default()
    }
}

pub fn feed(version: &str) -> ReleaseFeed {
    ReleaseFeed {
        version: version.to_string(),
        release_date: "2026-08-01".to_string(),
        notes: "Test release".to_string(),
        assets: vec![FeedAsset {
            name: format!("hivenote-{version}-test.zip"),
            url: format!("https://releases.example.com/hivenote-{version}-test.zip"),
        }],
    }
}

fn download_dir() -> PathBuf {
    std::env::temp_dir().join(format!("hivenote-tests-{}", std::process::id()))
}

/// Spawn an updater over a fixture source; returns the UI-facing bridge and
/// the lifecycle-state projection.
pub fn spawn_updater(
    config: HostConfig,
    source: FixtureReleaseSource,
) -> (UpdateBridge, watch::Receiver<UpdateStatus>) {
    spawn_updater_arc(config, Arc::new(source))
}

pub fn spawn_updater_arc(
    config: HostConfig,
    source: Arc<dyn ReleaseSource>,
) -> (UpdateBridge, watch::Receiver<UpdateStatus>) {
    let (ui, host) = bridge::channel();
    // Restart requests are irrelevant here; the updater tolerates a closed
    // receiver.
    let (restart_tx, _restart_rx) = mpsc::channel(1);
    let updater = Updater::new(config, RUNNING_VERSION.to_string(), source, host, restart_tx)
        .with_download_dir(download_dir());
    let status = updater.status_watch();
    updater.spawn();
    (ui, status)
}

/// Receive events until `stop` matches; returns everything seen, matching
/// event included. Panics after 10 seconds so a missing event fails loudly.
pub async fn collect_until(
    rx: &mut broadcast::Receiver<HostEvent>,
    stop: impl Fn(&HostEvent) -> bool,
) -> Vec<HostEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for a host event")
            .expect("event channel closed");
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}

/// Percent values of every `download-progress` event in `events`.
pub fn progress_percents(events: &[HostEvent]) -> Vec<f64> {
    events
        .iter()
        .filter_map(|event| match event {
            HostEvent::DownloadProgress(p) => Some(p.percent),
            _ => None,
        })
        .collect()
}

/// Count of `download-started` events in `events`.
pub fn started_count(events: &[HostEvent]) -> usize {
    events.iter().filter(|event| matches!(event, HostEvent::DownloadStarted)).count()
}
