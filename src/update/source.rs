//! Release feed access and artifact download.
//!
//! The `ReleaseSource` capability has two implementations: the production
//! HTTP feed and a fixture that serves canned releases for tests and
//! development builds. The updater never branches on the mode itself — it
//! only sees the trait.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::bridge::DownloadProgress;
use crate::error::{Error, Result};

/// One downloadable file attached to a release.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedAsset {
    pub name: String,
    pub url: String,
}

/// Release feed wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseFeed {
    pub version: String,
    #[serde(default)]
    pub release_date: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub assets: Vec<FeedAsset>,
}

/// Metadata of the release chosen by a successful check. Replaced wholesale
/// on every check, never mutated in place.
#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseMetadata {
    pub version: String,
    pub release_date: String,
    pub notes: String,
    pub download_url: String,
}

/// Outcome of a release check. A timed-out check is an outcome, not an
/// error — the caller reports it and returns to idle.
#[derive(Debug, Clone)]
pub enum CheckOutcome {
    UpdateAvailable(ReleaseMetadata),
    UpToDate,
    TimedOut,
}

#[cfg(all(target_os = "macos", target_arch = "aarch64"))]
pub fn platform_asset_suffix() -> &'static str {
    "macos-arm64"
}
#[cfg(all(target_os = "macos", target_arch = "x86_64"))]
pub fn platform_asset_suffix() -> &'static str {
    "macos-x86_64"
}
#[cfg(target_os = "windows")]
pub fn platform_asset_suffix() -> &'static str {
    "windows-x64"
}
#[cfg(target_os = "linux")]
pub fn platform_asset_suffix() -> &'static str {
    "linux-x64"
}
#[cfg(not(any(target_os = "macos", target_os = "windows", target_os = "linux")))]
pub fn platform_asset_suffix() -> &'static str {
    "unknown"
}

/// Pick the asset for the running platform; falls back to the first asset
/// when nothing matches the platform suffix.
fn select_asset(assets: &[FeedAsset]) -> Option<&FeedAsset> {
    assets.iter().find(|a| a.name.contains(platform_asset_suffix())).or_else(|| assets.first())
}

/// Compare the feed against the running version. Only a strictly greater
/// feed version counts as an update.
pub fn resolve_check(feed: &ReleaseFeed, running_version: &str) -> Result<CheckOutcome> {
    let feed_version = feed.version.trim_start_matches('v');
    let remote = semver::Version::parse(feed_version)
        .map_err(|e| Error::Parse(format!("feed version {:?}: {e}", feed.version)))?;
    let local = semver::Version::parse(running_version)
        .map_err(|e| Error::Parse(format!("running version {running_version:?}: {e}")))?;

    if remote <= local {
        return Ok(CheckOutcome::UpToDate);
    }

    let Some(asset) = select_asset(&feed.assets) else {
        // Newer version with nothing to download: nothing actionable.
        log::warn!("release {} has no downloadable assets", feed.version);
        return Ok(CheckOutcome::UpToDate);
    };

    Ok(CheckOutcome::UpdateAvailable(ReleaseMetadata {
        version: feed_version.to_string(),
        release_date: feed.release_date.clone(),
        notes: feed.notes.clone(),
        download_url: asset.url.clone(),
    }))
}

/// Where releases come from.
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// Fetch the latest published release from the feed.
    async fn latest(&self) -> Result<ReleaseFeed>;

    /// Download the release artifact into `dest_dir`, reporting progress
    /// along the way. Returns the path of the completed file; a partial
    /// file is removed on failure.
    async fn fetch_artifact(
        &self,
        release: &ReleaseMetadata,
        dest_dir: &Path,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<PathBuf>;
}

/// Production source backed by the configured release feed.
pub struct HttpReleaseSource {
    client: reqwest::Client,
    feed_url: String,
}

impl HttpReleaseSource {
    pub fn new(feed_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(format!("Hivenote/{}", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client, feed_url: feed_url.into() })
    }
}

#[async_trait]
impl ReleaseSource for HttpReleaseSource {
    async fn latest(&self) -> Result<ReleaseFeed> {
        let resp = self.client.get(&self.feed_url).send().await?.error_for_status()?;
        let feed = resp.json::<ReleaseFeed>().await.map_err(|e| Error::Parse(e.to_string()))?;
        Ok(feed)
    }

    async fn fetch_artifact(
        &self,
        release: &ReleaseMetadata,
        dest_dir: &Path,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<PathBuf> {
        use futures::StreamExt as _;
        use std::io::Write as _;

        let resp = self.client.get(&release.download_url).send().await?.error_for_status()?;
        let total = resp.content_length().unwrap_or(0);

        std::fs::create_dir_all(dest_dir)?;
        let file_name = release
            .download_url
            .rsplit('/')
            .next()
            .filter(|name| !name.is_empty())
            .unwrap_or("hivenote-update.bin");
        let path = dest_dir.join(file_name);

        let mut file = std::fs::File::create(&path)?;
        let mut stream = resp.bytes_stream();
        let started = Instant::now();
        let mut transferred: u64 = 0;
        let mut last_percent: f64 = 0.0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = std::fs::remove_file(&path);
                    return Err(Error::Network(format!("download failed: {e}")));
                }
            };

            if let Err(e) = file.write_all(&chunk) {
                drop(file);
                let _ = std::fs::remove_file(&path);
                return Err(Error::FileSystem(e));
            }

            transferred += chunk.len() as u64;
            let percent = if total > 0 {
                ((transferred as f64 / total as f64) * 100.0).min(100.0)
            } else {
                // No Content-Length: cap below 100 until the stream ends.
                ((transferred / (1024 * 100)) as f64).min(99.0)
            };

            // Report at integer-percent granularity to keep the bridge quiet.
            if percent - last_percent >= 1.0 {
                last_percent = percent;
                let elapsed = started.elapsed().as_secs_f64().max(1e-3);
                let _ = progress
                    .send(DownloadProgress {
                        percent,
                        bytes_transferred: transferred,
                        bytes_total: total,
                        bytes_per_second: transferred as f64 / elapsed,
                    })
                    .await;
            }
        }

        // Completion always lands on exactly 100.
        if last_percent < 100.0 {
            let elapsed = started.elapsed().as_secs_f64().max(1e-3);
            let _ = progress
                .send(DownloadProgress {
                    percent: 100.0,
                    bytes_transferred: transferred,
                    bytes_total: if total > 0 { total } else { transferred },
                    bytes_per_second: transferred as f64 / elapsed,
                })
                .await;
        }

        Ok(path)
    }
}

#[derive(Debug, Clone, Copy)]
enum FailMode {
    Never,
    /// Fail the next transfer after `after_steps` progress reports, then
    /// succeed on retries.
    Once { after_steps: u32 },
    Always { after_steps: u32 },
}

/// Fixture source serving a canned feed and a synthesized download.
/// Used by tests and by development builds, where checking a production
/// feed would be noise.
pub struct FixtureReleaseSource {
    feed: std::result::Result<ReleaseFeed, String>,
    latency: Duration,
    steps: u32,
    step_delay: Duration,
    artifact_size: u64,
    fail: Mutex<FailMode>,
}

impl FixtureReleaseSource {
    pub fn new(feed: ReleaseFeed) -> Self {
        Self {
            feed: Ok(feed),
            latency: Duration::ZERO,
            steps: 4,
            step_delay: Duration::from_millis(5),
            artifact_size: 4096,
            fail: Mutex::new(FailMode::Never),
        }
    }

    /// A source whose feed request always fails with a network error.
    pub fn broken(message: impl Into<String>) -> Self {
        let mut fixture = Self::new(ReleaseFeed {
            version: "0.0.0".to_string(),
            release_date: String::new(),
            notes: String::new(),
            assets: Vec::new(),
        });
        fixture.feed = Err(message.into());
        fixture
    }

    /// Fixture used by development builds: one patch version ahead of the
    /// running build, so the whole pipeline is exercisable end to end.
    pub fn development(current_version: &str) -> Self {
        let next = semver::Version::parse(current_version)
            .map(|mut v| {
                v.patch += 1;
                v
            })
            .unwrap_or_else(|_| semver::Version::new(0, 1, 0));
        let name = format!("hivenote-{next}-{}.zip", platform_asset_suffix());
        let mut fixture = Self::new(ReleaseFeed {
            version: next.to_string(),
            release_date: chrono::Utc::now().format("%Y-%m-%d").to_string(),
            notes: "Simulated release for development builds.".to_string(),
            assets: vec![FeedAsset {
                url: format!("https://releases.hivenote.app/desktop/{name}"),
                name,
            }],
        });
        fixture.steps = 5;
        fixture.step_delay = Duration::from_millis(150);
        fixture.artifact_size = 1024 * 1024;
        fixture
    }

    /// Delay before `latest()` resolves (timeout tests).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_steps(mut self, steps: u32, step_delay: Duration) -> Self {
        self.steps = steps.max(1);
        self.step_delay = step_delay;
        self
    }

    /// Interrupt the next transfer after `after_steps` progress reports;
    /// later transfers succeed.
    pub fn fail_once_after(self, after_steps: u32) -> Self {
        *self.fail.lock().expect("fixture fail mode poisoned") = FailMode::Once { after_steps };
        self
    }

    /// Interrupt every transfer after `after_steps` progress reports.
    pub fn fail_always_after(self, after_steps: u32) -> Self {
        *self.fail.lock().expect("fixture fail mode poisoned") = FailMode::Always { after_steps };
        self
    }

    fn take_fail_threshold(&self) -> Option<u32> {
        let mut mode = self.fail.lock().expect("fixture fail mode poisoned");
        match *mode {
            FailMode::Never => None,
            FailMode::Once { after_steps } => {
                *mode = FailMode::Never;
                Some(after_steps)
            }
            FailMode::Always { after_steps } => Some(after_steps),
        }
    }
}

#[async_trait]
impl ReleaseSource for FixtureReleaseSource {
    async fn latest(&self) -> Result<ReleaseFeed> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        match &self.feed {
            Ok(feed) => Ok(feed.clone()),
            Err(message) => Err(Error::Network(message.clone())),
        }
    }

    async fn fetch_artifact(
        &self,
        release: &ReleaseMetadata,
        dest_dir: &Path,
        progress: mpsc::Sender<DownloadProgress>,
    ) -> Result<PathBuf> {
        let fail_after = self.take_fail_threshold();
        let total = self.artifact_size;

        for step in 1..=self.steps {
            tokio::time::sleep(self.step_delay).await;

            if fail_after.is_some_and(|threshold| step > threshold) {
                return Err(Error::Network("simulated transfer interruption".to_string()));
            }

            let transferred = total * u64::from(step) / u64::from(self.steps);
            let _ = progress
                .send(DownloadProgress {
                    percent: f64::from(step) * 100.0 / f64::from(self.steps),
                    bytes_transferred: transferred,
                    bytes_total: total,
                    bytes_per_second: transferred as f64
                        / (self.step_delay.as_secs_f64() * f64::from(step)).max(1e-3),
                })
                .await;
        }

        std::fs::create_dir_all(dest_dir)?;
        let path = dest_dir.join(format!("hivenote-{}.bin", release.version));
        std::fs::write(&path, vec![0u8; total as usize])?;
        Ok(path)
    }
}
