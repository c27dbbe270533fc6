//! Message catalog and channel plumbing between the host process and the UI
//! surface.
//!
//! The UI side holds an [`UpdateBridge`]: the catalogued commands plus an
//! event subscription, nothing else. All update state lives on the host side of
//! the channel; the UI only ever receives copies. Events are delivered
//! in emission order within a process lifetime and are not replayed across
//! restarts — a freshly attached surface re-issues `check-request` to learn
//! the current state.

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Wire payload of `check-response`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckResponse {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CheckResponse {
    pub fn not_available(message: impl Into<String>) -> Self {
        Self { available: false, message: Some(message.into()), ..Default::default() }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self { available: false, error: Some(error.into()), ..Default::default() }
    }
}

/// Wire payload acknowledging `download-request` / `install-request`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandAck {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandAck {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: Some(message.into()), error: None }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self { success: false, message: None, error: Some(error.into()) }
    }
}

/// Wire payload of `download-progress`. At most one download session exists
/// at a time; `percent` never decreases within a session and reaches 100
/// only on successful completion.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub percent: f64,
    pub bytes_transferred: u64,
    pub bytes_total: u64,
    pub bytes_per_second: f64,
}

/// Events emitted by the host for UI reactivity
#[derive(Debug, Clone)]
pub enum HostEvent {
    CheckResponse(CheckResponse),
    DownloadStarted,
    DownloadProgress(DownloadProgress),
    DownloadComplete { version: String },
    UpdateError { message: String },
}

impl HostEvent {
    /// Channel name the event is published under on the wire.
    pub fn channel_name(&self) -> &'static str {
        match self {
            HostEvent::CheckResponse(_) => "check-response",
            HostEvent::DownloadStarted => "download-started",
            HostEvent::DownloadProgress(_) => "download-progress",
            HostEvent::DownloadComplete { .. } => "download-complete",
            HostEvent::UpdateError { .. } => "update-error",
        }
    }
}

/// Commands the UI surface may issue, paired with their reply channels.
#[derive(Debug)]
pub enum UiCommand {
    Check { reply: oneshot::Sender<CheckResponse> },
    Download { reply: oneshot::Sender<CommandAck> },
    Install { reply: oneshot::Sender<CommandAck> },
    AppVersion { reply: oneshot::Sender<String> },
}

/// UI-facing handle: commands in, events out. Cloneable; every reply is
/// bounded and structured — a dead host yields an error payload instead of
/// a hung await or a panic crossing the process boundary.
#[derive(Clone)]
pub struct UpdateBridge {
    commands: mpsc::Sender<UiCommand>,
    events: broadcast::Sender<HostEvent>,
}

impl UpdateBridge {
    pub fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }

    /// `check-request`: resolves with the `check-response` payload.
    pub async fn check(&self) -> CheckResponse {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(UiCommand::Check { reply: tx }).await.is_err() {
            return CheckResponse::failed("update service is not running");
        }
        rx.await.unwrap_or_else(|_| CheckResponse::failed("update service dropped the request"))
    }

    /// `download-request`. A no-op outside the `Available` state.
    pub async fn download(&self) -> CommandAck {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(UiCommand::Download { reply: tx }).await.is_err() {
            return CommandAck::rejected("update service is not running");
        }
        rx.await.unwrap_or_else(|_| CommandAck::rejected("update service dropped the request"))
    }

    /// `install-request`. A no-op outside the `ReadyToInstall` state.
    pub async fn install(&self) -> CommandAck {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(UiCommand::Install { reply: tx }).await.is_err() {
            return CommandAck::rejected("update service is not running");
        }
        rx.await.unwrap_or_else(|_| CommandAck::rejected("update service dropped the request"))
    }

    /// `app-version`: the running application version.
    pub async fn app_version(&self) -> String {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(UiCommand::AppVersion { reply: tx }).await.is_err() {
            return env!("CARGO_PKG_VERSION").to_string();
        }
        rx.await.unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string())
    }
}

/// Host-side endpoints of the bridge, consumed by the updater task.
pub struct BridgeHost {
    pub(crate) commands: mpsc::Receiver<UiCommand>,
    pub(crate) events: broadcast::Sender<HostEvent>,
}

/// Create a connected bridge pair.
pub fn channel() -> (UpdateBridge, BridgeHost) {
    let (cmd_tx, cmd_rx) = mpsc::channel(32);
    let (event_tx, _) = broadcast::channel(256);
    let ui = UpdateBridge { commands: cmd_tx, events: event_tx.clone() };
    let host = BridgeHost { commands: cmd_rx, events: event_tx };
    (ui, host)
}
