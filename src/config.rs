//! Layered configuration for retroboard.
//!
//! Values are resolved in order: built-in defaults, then `.retro/retro.toml`,
//! then `RETRO_*` environment variables, then CLI flags (applied by the
//! command layer).
//!
//! # Configuration File Format
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 4173
//! db_path = ".retro/retro.db"
//! dev_mode = false
//!
//! [feed]
//! channel_capacity = 256
//! ping_interval_secs = 30
//! pong_timeout_secs = 60
//!
//! [auth]
//! session_ttl_hours = 168
//! min_password_len = 6
//!
//! [client]
//! server_url = "http://127.0.0.1:4173"
//! request_timeout_secs = 15
//!
//! [logging]
//! json = false
//! log_dir = ".retro/logs"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_DIR: &str = ".retro";
pub const CONFIG_FILE: &str = "retro.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4173,
            db_path: PathBuf::from(".retro/retro.db"),
            dev_mode: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedSection {
    pub channel_capacity: usize,
    pub ping_interval_secs: u64,
    pub pong_timeout_secs: u64,
}

impl Default for FeedSection {
    fn default() -> Self {
        Self {
            channel_capacity: 256,
            ping_interval_secs: 30,
            pong_timeout_secs: 60,
        }
    }
}

impl FeedSection {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn pong_timeout(&self) -> Duration {
        Duration::from_secs(self.pong_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthSection {
    pub session_ttl_hours: i64,
    pub min_password_len: usize,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            session_ttl_hours: 24 * 7,
            min_password_len: crate::validate::DEFAULT_MIN_PASSWORD_LEN,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientSection {
    pub server_url: String,
    pub request_timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:4173".to_string(),
            request_timeout_secs: 15,
        }
    }
}

impl ClientSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub json: bool,
    pub log_dir: Option<PathBuf>,
}

/// Root of `retro.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigToml {
    pub server: ServerSection,
    pub feed: FeedSection,
    pub auth: AuthSection,
    pub client: ClientSection,
    pub logging: LoggingSection,
}

impl ConfigToml {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse retro.toml")
    }

    /// Load `<project_dir>/.retro/retro.toml`, or defaults if the file doesn't exist.
    pub fn load_or_default(project_dir: &Path) -> Result<Self> {
        let path = config_path(project_dir);
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize retro.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Apply `RETRO_*` overrides using the given lookup. Unparseable numeric
    /// values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RETRO_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("RETRO_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(path) = lookup("RETRO_DB_PATH") {
            self.server.db_path = PathBuf::from(path);
        }
        if let Some(ttl) = lookup("RETRO_SESSION_TTL_HOURS").and_then(|v| v.parse().ok()) {
            self.auth.session_ttl_hours = ttl;
        }
        if let Some(url) = lookup("RETRO_SERVER_URL") {
            self.client.server_url = url;
        }
    }

    /// Resolve the effective configuration for a project directory: file, then
    /// process environment.
    pub fn resolve(project_dir: &Path) -> Result<Self> {
        let mut config = Self::load_or_default(project_dir)?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Return human-readable warnings for suspicious settings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.server.port == 0 {
            warnings.push("server.port is 0; an ephemeral port will be chosen".to_string());
        }
        if self.feed.channel_capacity == 0 {
            warnings.push("feed.channel_capacity must be greater than 0".to_string());
        }
        if self.feed.pong_timeout_secs <= self.feed.ping_interval_secs {
            warnings.push(format!(
                "feed.pong_timeout_secs ({}) should exceed feed.ping_interval_secs ({})",
                self.feed.pong_timeout_secs, self.feed.ping_interval_secs
            ));
        }
        if self.auth.session_ttl_hours <= 0 {
            warnings.push("auth.session_ttl_hours must be positive".to_string());
        }
        if self.auth.min_password_len < crate::validate::DEFAULT_MIN_PASSWORD_LEN {
            warnings.push(format!(
                "auth.min_password_len below {} weakens login validation",
                crate::validate::DEFAULT_MIN_PASSWORD_LEN
            ));
        }
        if !self.client.server_url.starts_with("http://")
            && !self.client.server_url.starts_with("https://")
        {
            warnings.push(format!(
                "client.server_url '{}' is not an http(s) URL",
                self.client.server_url
            ));
        }
        warnings
    }
}

pub fn config_dir(project_dir: &Path) -> PathBuf {
    project_dir.join(CONFIG_DIR)
}

pub fn config_path(project_dir: &Path) -> PathBuf {
    config_dir(project_dir).join(CONFIG_FILE)
}
