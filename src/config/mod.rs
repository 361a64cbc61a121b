//! Configuration and credential storage

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::auth::StoredToken;

const DEFAULT_API_URL: &str = "http://localhost:5000/api/v1";
const DEFAULT_SOCKET_URL: &str = "http://localhost:5000";

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// REST API base URL (paths are appended verbatim)
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Message server base URL (socket.io v1 endpoint lives under it)
    #[serde(default = "default_socket_url")]
    pub socket_url: String,
    /// Signed-in user, written by `market-live init`
    pub identity: Option<Identity>,
    /// Bearer token for the REST API
    pub access_token: Option<StoredToken>,
    #[serde(default)]
    pub channel: ChannelSettings,
    #[serde(default)]
    pub timing: Timing,
}

/// Local identity used to scope channel names and classify authorship.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    #[serde(default = "default_role")]
    pub role: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Also emit sent messages under the older per-name event variants, for
    /// peers that have not moved to the scoped `chat-message` event yet.
    #[serde(default)]
    pub legacy_fanout: bool,
}

/// Timing and retention knobs for the reconcilers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    /// Max distance between a temporary message and its confirmation.
    pub confirm_window_ms: u64,
    /// Age after which an unconfirmed temporary message is dropped.
    pub temporary_ttl_ms: u64,
    pub sweep_interval_ms: u64,
    /// Delay before re-reading history after a send into a known chat.
    pub refetch_delay_ms: u64,
    /// Number of notification keys remembered for duplicate suppression.
    pub seen_capacity: usize,
    pub history_page_size: usize,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            confirm_window_ms: 5_000,
            temporary_ttl_ms: 10_000,
            sweep_interval_ms: 2_000,
            refetch_delay_ms: 300,
            seen_capacity: 512,
            history_page_size: 50,
        }
    }
}

impl Timing {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(100))
    }

    pub fn refetch_delay(&self) -> Duration {
        Duration::from_millis(self.refetch_delay_ms)
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.to_string()
}

fn default_socket_url() -> String {
    DEFAULT_SOCKET_URL.to_string()
}

fn default_role() -> String {
    "user".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            socket_url: default_socket_url(),
            identity: None,
            access_token: None,
            channel: ChannelSettings::default(),
            timing: Timing::default(),
        }
    }
}

impl Config {
    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.config_dir().to_path_buf())
    }

    /// Get config file path
    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Directory for the TUI log file.
    pub fn log_dir() -> Result<PathBuf> {
        Ok(project_dirs()?.cache_dir().to_path_buf())
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        Self::parse(&content)
    }

    fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        // Set restrictive permissions on config file (contains the token)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// The signed-in identity, or an error telling the user how to set one.
    pub fn require_identity(&self) -> Result<&Identity> {
        self.identity
            .as_ref()
            .context("No identity configured. Run `market-live init` first.")
    }

    pub fn set_access_token(&mut self, token: String, expires_in: Option<u64>) {
        self.access_token = Some(StoredToken::new(token, expires_in));
    }
}

fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("com", "market-live", "market-live")
        .context("Could not determine config directory")
}
