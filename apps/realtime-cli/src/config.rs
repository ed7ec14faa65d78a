//! Client configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `$XDG_CONFIG_HOME/realtime-link/client.toml`, falling back to
//!   `~/.config/realtime-link/client.toml`
//! - Windows: `%APPDATA%/realtime-link/client.toml`
//!
//! `REALTIME_TOKEN` and `REALTIME_URL` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use realtime_connection::{DEFAULT_URL, HeartbeatConfig, ManagerConfig, ReconnectConfig};
use realtime_protocol::constants::HISTORY_CAPACITY;

/// Environment variable holding the credential.
pub const TOKEN_ENV: &str = "REALTIME_TOKEN";
/// Environment variable holding the endpoint.
pub const URL_ENV: &str = "REALTIME_URL";

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket endpoint.
    #[serde(default = "default_url")]
    pub url: String,

    /// Credential sent in the handshake. Empty means not signed in.
    #[serde(default)]
    pub token: String,

    #[serde(default)]
    pub reconnect: ReconnectSection,

    #[serde(default)]
    pub heartbeat: HeartbeatSection,

    /// Number of messages kept in history.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

/// `[reconnect]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub jitter: bool,
}

/// `[heartbeat]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSection {
    pub interval_secs: u64,
    pub liveness_timeout_secs: u64,
}

fn default_url() -> String {
    DEFAULT_URL.into()
}

fn default_history_capacity() -> usize {
    HISTORY_CAPACITY
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            token: String::new(),
            reconnect: ReconnectSection::default(),
            heartbeat: HeartbeatSection::default(),
            history_capacity: default_history_capacity(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            base_delay_ms: duration_millis(defaults.base_delay),
            max_delay_ms: duration_millis(defaults.max_delay),
            max_attempts: defaults.max_attempts,
            jitter: defaults.jitter,
        }
    }
}

impl Default for HeartbeatSection {
    fn default() -> Self {
        let defaults = HeartbeatConfig::default();
        Self {
            interval_secs: defaults.interval.as_secs(),
            liveness_timeout_secs: defaults.liveness_timeout.as_secs(),
        }
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl ClientConfig {
    /// Loads configuration from the default location, creating it with
    /// defaults if not found, then applies environment overrides.
    pub fn load() -> anyhow::Result<Self> {
        let config = Self::load_from(&config_path()?)?;
        Ok(config.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Loads configuration from `path`, or writes a default there.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&content)?;
            tracing::debug!(path = %path.display(), "configuration loaded");
            Ok(config)
        } else {
            let config = ClientConfig::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix (may contain the credential).
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Applies `REALTIME_TOKEN` / `REALTIME_URL` from `lookup`. Empty
    /// values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(token) = lookup(TOKEN_ENV).filter(|v| !v.is_empty()) {
            self.token = token;
        }
        if let Some(url) = lookup(URL_ENV).filter(|v| !v.is_empty()) {
            self.url = url;
        }
        self
    }

    /// Credential, if one is configured.
    pub fn credential(&self) -> Option<String> {
        Some(self.token.trim())
            .filter(|t| !t.is_empty())
            .map(str::to_owned)
    }

    /// Manager settings. The credential is left out so it can be handed
    /// over through `set_credential`.
    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            url: self.url.clone(),
            token: None,
            reconnect: ReconnectConfig {
                base_delay: Duration::from_millis(self.reconnect.base_delay_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
                max_attempts: self.reconnect.max_attempts,
                jitter: self.reconnect.jitter,
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(self.heartbeat.interval_secs.max(1)),
                liveness_timeout: Duration::from_secs(self.heartbeat.liveness_timeout_secs.max(1)),
            },
            history_capacity: self.history_capacity,
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata = std::env::var("APPDATA")
            .map_err(|_| anyhow::anyhow!("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("realtime-link")
            .join("client.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let base = match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
                PathBuf::from(home).join(".config")
            }
        };
        Ok(base.join("realtime-link").join("client.toml"))
    }
}
