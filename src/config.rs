// Configuration management for the host process

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

#[cfg(debug_assertions)]
const APP_NAME: &str = "hivenote-dev";

#[cfg(not(debug_assertions))]
const APP_NAME: &str = "hivenote";

/// Recognized host options. Serialized with the camelCase spelling the
/// desktop shell and its config files use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HostConfig {
    /// First port the asset server tries; probing walks upward from here.
    pub base_port: u16,
    pub check_timeout_ms: u64,
    pub download_timeout_ms: u64,
    pub periodic_check_interval_ms: u64,
    /// Development mode: no automatic checks, no port probing; the UI is
    /// served by an external dev server and releases come from a fixture.
    pub is_development_mode: bool,
    /// Release feed endpoint reporting the latest published version.
    pub feed_url: String,
    /// Directory holding the packaged UI bundle.
    pub document_root: PathBuf,
    pub dev_server_url: String,
    /// Attempt ceiling for port probing.
    pub max_port_probes: u16,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            base_port: 3000,
            check_timeout_ms: 10_000,
            download_timeout_ms: 600_000,
            periodic_check_interval_ms: 3_600_000,
            is_development_mode: false,
            feed_url: "https://releases.hivenote.app/desktop/latest.json".to_string(),
            document_root: PathBuf::from("dist/renderer"),
            dev_server_url: "http://localhost:3000".to_string(),
            max_port_probes: 16,
        }
    }
}

impl HostConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_millis(self.download_timeout_ms)
    }

    /// Periodic check interval; clamped to at least 1ms so a zeroed config
    /// file cannot produce a zero-period timer.
    pub fn periodic_check_interval(&self) -> Duration {
        Duration::from_millis(self.periodic_check_interval_ms.max(1))
    }

    /// The packaged index document, used for SPA fallback and for direct
    /// file loading when the asset server cannot start.
    pub fn index_path(&self) -> PathBuf {
        self.document_root.join("index.html")
    }
}

/// Directory for downloaded update artifacts.
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join(APP_NAME)
}

/// Manages the persistent host configuration file
#[derive(Clone)]
pub struct ConfigManager {
    config_dir: PathBuf,
}

impl ConfigManager {
    const CONFIG_FILE: &'static str = "host.json";

    /// Create a new ConfigManager, initializing the config directory if needed
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        }

        Ok(Self { config_dir })
    }

    /// Use an explicit directory instead of the platform default (tests).
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self { config_dir: config_dir.into() }
    }

    /// Get the platform-specific config directory
    fn get_config_dir() -> Result<PathBuf> {
        dirs::config_dir().map(|p| p.join(APP_NAME)).context("Could not determine config directory")
    }

    fn file_path(&self, filename: &str) -> PathBuf {
        self.config_dir.join(filename)
    }

    /// Load the host configuration; a missing file yields the defaults.
    pub fn load_config(&self) -> Result<HostConfig> {
        let path = self.file_path(Self::CONFIG_FILE);

        if !path.exists() {
            return Ok(HostConfig::default());
        }

        let data = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", Self::CONFIG_FILE))?;

        let config: HostConfig = serde_json::from_str(&data)
            .with_context(|| format!("Failed to deserialize {}", Self::CONFIG_FILE))?;

        Ok(config)
    }

    /// Save the host configuration (atomic via temp + rename).
    pub fn save_config(&self, config: &HostConfig) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).context("Failed to create config directory")?;
        }

        let path = self.file_path(Self::CONFIG_FILE);
        let json = serde_json::to_string_pretty(config)
            .with_context(|| format!("Failed to serialize {}", Self::CONFIG_FILE))?;

        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write {}", Self::CONFIG_FILE))?;

        Ok(())
    }
}

/// Write via a sibling temp file then rename, so readers never observe a
/// partially written config.
fn atomic_write(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)
}
