//! Console configuration
//!
//! Resolution order: built-in defaults, then `settings.json` in the platform
//! config directory, then `XSMARTKG_*` environment variables. The binary
//! applies command-line flags last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retry::RetryPolicy;
use crate::task::ProgressScale;

pub const ENV_BASE_URL: &str = "XSMARTKG_BASE_URL";
pub const ENV_USER_ID: &str = "XSMARTKG_USER_ID";

/// Polling fallback settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub enabled: bool,
    /// Delay between starting a task and the first poll
    pub initial_delay_ms: u64,
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            initial_delay_ms: 5_000,
            interval_ms: 3_000,
        }
    }
}

impl PollingConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

/// Client-side checks applied before an upload is sent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadLimits {
    pub max_file_bytes: u64,
    /// Lowercase, with leading dot
    pub allowed_extensions: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for UploadLimits {
    fn default() -> Self {
        Self {
            max_file_bytes: 50 * 1024 * 1024,
            allowed_extensions: [".txt", ".md", ".docx", ".pdf", ".xlsx", ".xls"]
                .into_iter()
                .map(String::from)
                .collect(),
            timeout_secs: 300,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend origin, e.g. `http://localhost:5670`
    pub base_url: String,
    pub user_id: Option<String>,
    /// Live channel path below the serve mount point
    pub live_path: String,
    pub retry: RetryPolicy,
    pub polling: PollingConfig,
    pub progress_scale: ProgressScale,
    pub upload: UploadLimits,
    pub history_page_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5670".to_string(),
            user_id: None,
            live_path: "/ws/task".to_string(),
            retry: RetryPolicy::default(),
            polling: PollingConfig::default(),
            progress_scale: ProgressScale::default(),
            upload: UploadLimits::default(),
            history_page_size: 10,
        }
    }
}

impl Config {
    /// `~/.config/xsmartkg/settings.json` (platform equivalent)
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("xsmartkg")
            .join("settings.json")
    }

    /// Load configuration or use defaults
    pub fn load_or_default() -> Self {
        let mut config = Self::load(&Self::default_path());
        config.apply_env();
        config
    }

    /// Load from a settings file. A missing or unreadable file yields defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Invalid settings file, using defaults");
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to read settings file");
                Self::default()
            }
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `XSMARTKG_*` overrides from the given lookup.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.base_url = base_url;
        }
        if let Some(user_id) = lookup(ENV_USER_ID).filter(|v| !v.is_empty()) {
            self.user_id = Some(user_id);
        }
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload.timeout_secs)
    }
}
