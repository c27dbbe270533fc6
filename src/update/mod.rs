//! Update lifecycle: check, download, install.
//!
//! A single task owns the update state and every transition. Resolver
//! results and download progress are produced on spawned tasks and
//! marshalled back onto the owner over channels, so no state mutation ever
//! happens off the updater task.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::bridge::{BridgeHost, CheckResponse, CommandAck, DownloadProgress, HostEvent, UiCommand};
use crate::config::HostConfig;
use crate::error::Error;
use crate::helpers::format::{format_bytes, format_rate};

pub mod source;

use source::{CheckOutcome, ReleaseMetadata, ReleaseSource, resolve_check};

/// Update lifecycle state. Exactly one instance exists per process, owned
/// by the updater task; it always starts at `Idle` and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateStatus {
    Idle,
    Checking,
    Available,
    Downloading,
    ReadyToInstall,
    /// Transient: emitted once with its cause, then the machine settles
    /// back in `Idle` within the same dispatch.
    Error,
}

/// Results of spawned work, delivered back to the updater task.
enum TaskMsg {
    CheckFinished(Result<CheckOutcome, Error>),
    DownloadProgress(DownloadProgress),
    DownloadFinished(Result<PathBuf, Error>),
}

/// The update state machine. Constructed with its collaborators injected;
/// `spawn` moves it onto its own task.
pub struct Updater {
    config: HostConfig,
    current_version: String,
    source: Arc<dyn ReleaseSource>,
    commands: mpsc::Receiver<UiCommand>,
    events: broadcast::Sender<HostEvent>,
    restart: mpsc::Sender<()>,
    tasks_tx: mpsc::Sender<TaskMsg>,
    tasks_rx: mpsc::Receiver<TaskMsg>,
    status: UpdateStatus,
    status_tx: watch::Sender<UpdateStatus>,
    /// Latest successful check result; replaced wholesale per check.
    release: Option<ReleaseMetadata>,
    /// Current download session, if any. At most one exists at a time.
    progress: Option<DownloadProgress>,
    artifact_path: Option<PathBuf>,
    pending_checks: Vec<oneshot::Sender<CheckResponse>>,
    download_dir: PathBuf,
}

impl Updater {
    pub fn new(
        config: HostConfig,
        current_version: String,
        source: Arc<dyn ReleaseSource>,
        host: BridgeHost,
        restart: mpsc::Sender<()>,
    ) -> Self {
        let (tasks_tx, tasks_rx) = mpsc::channel(64);
        let (status_tx, _) = watch::channel(UpdateStatus::Idle);
        Self {
            config,
            current_version,
            source,
            commands: host.commands,
            events: host.events,
            restart,
            tasks_tx,
            tasks_rx,
            status: UpdateStatus::Idle,
            status_tx,
            release: None,
            progress: None,
            artifact_path: None,
            pending_checks: Vec::new(),
            download_dir: crate::config::cache_dir(),
        }
    }

    /// Where downloaded artifacts land (tests point this at a temp dir).
    pub fn with_download_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.download_dir = dir.into();
        self
    }

    /// Read-only projection of the lifecycle state.
    pub fn status_watch(&self) -> watch::Receiver<UpdateStatus> {
        self.status_tx.subscribe()
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        // The interval's immediate first tick doubles as the startup check;
        // the whole arm is disabled in development mode.
        let mut periodic = tokio::time::interval(self.config.periodic_check_interval());

        enum Wake {
            Command(Option<UiCommand>),
            Task(TaskMsg),
            Tick,
        }

        loop {
            let wake = tokio::select! {
                cmd = self.commands.recv() => Wake::Command(cmd),
                Some(msg) = self.tasks_rx.recv() => Wake::Task(msg),
                _ = periodic.tick(), if !self.config.is_development_mode => Wake::Tick,
            };

            match wake {
                Wake::Command(Some(cmd)) => self.handle_command(cmd),
                // Bridge dropped: the host is shutting down.
                Wake::Command(None) => break,
                Wake::Task(msg) => self.handle_task(msg),
                Wake::Tick => self.periodic_check(),
            }
        }
    }

    fn handle_command(&mut self, cmd: UiCommand) {
        match cmd {
            UiCommand::Check { reply } => self.handle_check(reply),
            UiCommand::Download { reply } => {
                let ack = self.handle_download();
                let _ = reply.send(ack);
            }
            UiCommand::Install { reply } => {
                let ack = self.handle_install();
                let _ = reply.send(ack);
            }
            UiCommand::AppVersion { reply } => {
                let _ = reply.send(self.current_version.clone());
            }
        }
    }

    fn handle_task(&mut self, msg: TaskMsg) {
        match msg {
            TaskMsg::CheckFinished(result) => self.finish_check(result),
            TaskMsg::DownloadProgress(progress) => self.on_progress(progress),
            TaskMsg::DownloadFinished(result) => self.finish_download(result),
        }
    }

    fn set_status(&mut self, status: UpdateStatus) {
        log::debug!("update state: {:?} -> {:?}", self.status, status);
        self.status = status;
        let _ = self.status_tx.send(status);
    }

    fn emit(&self, event: HostEvent) {
        let _ = self.events.send(event);
    }

    // =========================================================================
    // Check
    // =========================================================================

    fn handle_check(&mut self, reply: oneshot::Sender<CheckResponse>) {
        match self.status {
            UpdateStatus::Idle | UpdateStatus::Error => {
                self.pending_checks.push(reply);
                self.begin_check();
            }
            // Attach to the in-flight check rather than starting a second one.
            UpdateStatus::Checking => self.pending_checks.push(reply),
            // A re-attached surface re-queries state this way: answer from
            // what we already know instead of hitting the feed again.
            UpdateStatus::Available
            | UpdateStatus::Downloading
            | UpdateStatus::ReadyToInstall => {
                let _ = reply.send(self.known_release_response());
            }
        }
    }

    fn known_release_response(&self) -> CheckResponse {
        match &self.release {
            Some(release) => available_response(release),
            None => CheckResponse::not_available("You are running the latest version"),
        }
    }

    fn begin_check(&mut self) {
        self.set_status(UpdateStatus::Checking);
        log::info!("checking for updates (running {})", self.current_version);

        let source = Arc::clone(&self.source);
        let timeout = self.config.check_timeout();
        let running_version = self.current_version.clone();
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(timeout, source.latest()).await {
                Err(_) => Ok(CheckOutcome::TimedOut),
                Ok(Err(e)) => Err(e),
                Ok(Ok(feed)) => resolve_check(&feed, &running_version),
            };
            let _ = tx.send(TaskMsg::CheckFinished(result)).await;
        });
    }

    fn finish_check(&mut self, result: Result<CheckOutcome, Error>) {
        if self.status != UpdateStatus::Checking {
            return;
        }

        let response = match result {
            Ok(CheckOutcome::UpdateAvailable(release)) => {
                log::info!("update available: {} -> {}", self.current_version, release.version);
                let response = available_response(&release);
                self.release = Some(release);
                self.set_status(UpdateStatus::Available);
                response
            }
            Ok(CheckOutcome::UpToDate) => {
                log::info!("already on the latest version ({})", self.current_version);
                self.release = None;
                self.set_status(UpdateStatus::Idle);
                CheckResponse::not_available("You are running the latest version")
            }
            Ok(CheckOutcome::TimedOut) => {
                log::warn!("update check timed out");
                self.release = None;
                self.set_status(UpdateStatus::Idle);
                CheckResponse::not_available("Update check timed out")
            }
            Err(e) => {
                log::warn!("update check failed: {e}");
                self.release = None;
                // Error is transient: pass through it, report the cause in
                // the response, and settle in Idle.
                self.set_status(UpdateStatus::Error);
                self.set_status(UpdateStatus::Idle);
                CheckResponse::failed(e.to_string())
            }
        };

        for reply in self.pending_checks.drain(..) {
            let _ = reply.send(response.clone());
        }
        self.emit(HostEvent::CheckResponse(response));
    }

    fn periodic_check(&mut self) {
        if self.status != UpdateStatus::Idle {
            log::debug!("periodic check suppressed while {:?}", self.status);
            return;
        }
        self.begin_check();
    }

    // =========================================================================
    // Download
    // =========================================================================

    fn handle_download(&mut self) -> CommandAck {
        match self.status {
            UpdateStatus::Available => {}
            // Idempotent: a second request must not start a second session.
            UpdateStatus::Downloading => return CommandAck::ok("download already in progress"),
            _ => return CommandAck::rejected("no update available to download"),
        }

        let Some(release) = self.release.clone() else {
            return CommandAck::rejected("no release metadata; check for updates first");
        };

        self.set_status(UpdateStatus::Downloading);
        self.emit(HostEvent::DownloadStarted);
        log::info!("downloading update {} from {}", release.version, release.download_url);

        let (progress_tx, mut progress_rx) = mpsc::channel::<DownloadProgress>(64);

        // Forward progress through the updater's own queue so every event
        // flows through the single owner, in order.
        let forward_tx = self.tasks_tx.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(progress) = progress_rx.recv().await {
                if forward_tx.send(TaskMsg::DownloadProgress(progress)).await.is_err() {
                    break;
                }
            }
        });

        let source = Arc::clone(&self.source);
        let dest_dir = self.download_dir.clone();
        let timeout = self.config.download_timeout();
        let tx = self.tasks_tx.clone();
        tokio::spawn(async move {
            let result = match tokio::time::timeout(
                timeout,
                source.fetch_artifact(&release, &dest_dir, progress_tx),
            )
            .await
            {
                // The transfer future is dropped here; the remote end is
                // abandoned best-effort.
                Err(_) => Err(Error::Timeout(
                    "download did not finish within the configured budget".to_string(),
                )),
                Ok(result) => result,
            };
            // Wait for the forwarder so completion never overtakes progress.
            let _ = forwarder.await;
            let _ = tx.send(TaskMsg::DownloadFinished(result)).await;
        });

        CommandAck::ok("download started")
    }

    fn on_progress(&mut self, progress: DownloadProgress) {
        if self.status != UpdateStatus::Downloading {
            return;
        }

        // Monotonic within the session.
        let progress = match &self.progress {
            Some(prev) if progress.percent < prev.percent => {
                DownloadProgress { percent: prev.percent, ..progress }
            }
            _ => progress,
        };
        self.progress = Some(progress);

        log::debug!(
            "download progress: {:.1}% ({} / {}, {})",
            progress.percent,
            format_bytes(progress.bytes_transferred),
            format_bytes(progress.bytes_total),
            format_rate(progress.bytes_per_second),
        );
        self.emit(HostEvent::DownloadProgress(progress));
    }

    fn finish_download(&mut self, result: Result<PathBuf, Error>) {
        if self.status != UpdateStatus::Downloading {
            return;
        }
        // The session object is discarded on completion and on error alike;
        // a retry starts over from zero.
        self.progress = None;

        match result {
            Ok(path) => {
                let version =
                    self.release.as_ref().map(|r| r.version.clone()).unwrap_or_default();
                log::info!("update {} downloaded to {}", version, path.display());
                self.artifact_path = Some(path);
                self.set_status(UpdateStatus::ReadyToInstall);
                self.emit(HostEvent::DownloadComplete { version });
            }
            Err(e) => {
                log::warn!("update download failed: {e}");
                self.artifact_path = None;
                // Back to Available so the user can retry.
                self.set_status(UpdateStatus::Available);
                self.emit(HostEvent::UpdateError { message: format!("Update download failed: {e}") });
            }
        }
    }

    // =========================================================================
    // Install
    // =========================================================================

    fn handle_install(&mut self) -> CommandAck {
        if self.status != UpdateStatus::ReadyToInstall {
            return CommandAck::rejected("no update ready to install");
        }

        let Some(path) = self.artifact_path.clone() else {
            return CommandAck::rejected("downloaded artifact is missing");
        };

        if self.config.is_development_mode {
            log::info!("development mode: install simulated, not restarting");
            return CommandAck::ok("development mode: install simulated");
        }

        match launch_installer(&path) {
            Ok(()) => {
                log::info!("installer launched, requesting restart");
                let _ = self.restart.try_send(());
                CommandAck::ok("installer launched; the application will restart")
            }
            Err(e) => {
                log::error!("{e}");
                // The application keeps running; the artifact stays in place
                // so install can be retried.
                self.emit(HostEvent::UpdateError { message: e.to_string() });
                CommandAck::rejected(e.to_string())
            }
        }
    }
}

fn available_response(release: &ReleaseMetadata) -> CheckResponse {
    CheckResponse {
        available: true,
        version: Some(release.version.clone()),
        release_date: Some(release.release_date.clone()),
        notes: Some(release.notes.clone()),
        download_url: Some(release.download_url.clone()),
        message: None,
        error: None,
    }
}

/// Hand the downloaded artifact to the platform installer.
fn launch_installer(path: &Path) -> Result<(), Error> {
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("msiexec")
            .args(["/i", &path.to_string_lossy(), "/passive"])
            .spawn()
            .map_err(|e| Error::Install(format!("failed to launch installer: {e}")))?;
        Ok(())
    }

    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open")
            .arg(path)
            .spawn()
            .map_err(|e| Error::Install(format!("failed to open installer: {e}")))?;
        Ok(())
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Err(Error::Install(format!(
            "automatic install is not supported on this platform; artifact saved at {}",
            path.display()
        )))
    }
}
