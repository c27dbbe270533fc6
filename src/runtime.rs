//! Host wiring: asset serving, the update lifecycle, and the UI bridge are
//! constructed here and handed out as explicit handles — no ambient
//! process-wide state.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bridge::{self, UpdateBridge};
use crate::config::HostConfig;
use crate::server::AssetServer;
use crate::update::Updater;
use crate::update::source::{FixtureReleaseSource, HttpReleaseSource, ReleaseSource};

/// Where the window shell should load the UI from.
#[derive(Debug, Clone)]
pub enum UiLocation {
    /// Served by the embedded asset server.
    Server(String),
    /// External development server.
    DevServer(String),
    /// Direct file load — the asset server could not bind any port.
    File(PathBuf),
}

impl fmt::Display for UiLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UiLocation::Server(url) => write!(f, "{url}"),
            UiLocation::DevServer(url) => write!(f, "{url} (dev server)"),
            UiLocation::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

pub struct HostRuntime {
    bridge: UpdateBridge,
    server: Option<AssetServer>,
    ui_location: UiLocation,
    updater: JoinHandle<()>,
    restart_rx: mpsc::Receiver<()>,
}

impl HostRuntime {
    /// Start the host services with the release source picked by
    /// configuration: fixture-backed in development mode, the HTTP feed
    /// otherwise.
    pub async fn start(config: HostConfig) -> anyhow::Result<HostRuntime> {
        let source: Arc<dyn ReleaseSource> = if config.is_development_mode {
            Arc::new(FixtureReleaseSource::development(env!("CARGO_PKG_VERSION")))
        } else {
            Arc::new(HttpReleaseSource::new(&config.feed_url)?)
        };
        Self::start_with_source(config, env!("CARGO_PKG_VERSION").to_string(), source).await
    }

    /// Start with an explicit source and running version.
    pub async fn start_with_source(
        config: HostConfig,
        app_version: String,
        source: Arc<dyn ReleaseSource>,
    ) -> anyhow::Result<HostRuntime> {
        let (server, ui_location) = if config.is_development_mode {
            // Development: the external dev server owns the UI, and no
            // ports are probed.
            (None, UiLocation::DevServer(config.dev_server_url.clone()))
        } else {
            match AssetServer::start(
                config.document_root.clone(),
                config.base_port,
                config.max_port_probes,
            )
            .await
            {
                Ok(server) => {
                    let url = server.binding().url();
                    (Some(server), UiLocation::Server(url))
                }
                Err(e) => {
                    // Startup must survive this: load the bundle straight
                    // from disk instead.
                    log::warn!("asset server unavailable ({e}); falling back to direct file load");
                    (None, UiLocation::File(config.index_path()))
                }
            }
        };

        let (ui_bridge, host) = bridge::channel();
        let (restart_tx, restart_rx) = mpsc::channel(1);
        let updater = Updater::new(config, app_version, source, host, restart_tx).spawn();

        Ok(HostRuntime { bridge: ui_bridge, server, ui_location, updater, restart_rx })
    }

    /// Handle the UI surface talks through.
    pub fn bridge(&self) -> UpdateBridge {
        self.bridge.clone()
    }

    pub fn ui_location(&self) -> &UiLocation {
        &self.ui_location
    }

    /// Resolves when a successful install asks the host to restart.
    pub async fn restart_requested(&mut self) {
        let _ = self.restart_rx.recv().await;
    }

    /// Close window-facing services. Idempotent: runs when all windows
    /// close and again on process exit.
    pub fn shutdown(&self) {
        if let Some(server) = &self.server {
            server.close();
        }
        self.updater.abort();
    }
}

impl Drop for HostRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}
