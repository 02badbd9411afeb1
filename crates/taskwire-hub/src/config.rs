//! Client configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`--config` or a default path)
//! - Environment variables (`TASKWIRE_URL`, `TASKWIRE_TOKEN`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use taskwire_core::{DispatchConfig, RouterConfig};
use taskwire_protocol::codec::MAX_FRAME_SIZE;
use taskwire_protocol::Encoding;
use taskwire_transport::WebSocketConfig;

use crate::controller::ReconnectPolicy;
use crate::hub::HubOptions;

/// Default configuration file locations, in lookup order.
pub const DEFAULT_CONFIG_PATHS: &[&str] = &[
    "taskwire.toml",
    "/etc/taskwire/taskwire.toml",
    "~/.config/taskwire/taskwire.toml",
];

/// Client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Bearer credential for the session.
    #[serde(default)]
    pub token: Option<String>,

    /// Server connection.
    #[serde(default)]
    pub server: ServerConfig,

    /// Reconnection policy.
    #[serde(default)]
    pub reconnect: ReconnectConfig,

    /// Typing indicators.
    #[serde(default)]
    pub typing: TypingConfig,

    /// Dashboard cache.
    #[serde(default)]
    pub dashboard: DashboardConfig,

    /// Notification handling.
    #[serde(default)]
    pub notifications: NotificationsConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Server connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// WebSocket URL of the event server.
    #[serde(default = "default_url")]
    pub url: String,

    /// Outbound frame encoding.
    #[serde(default)]
    pub encoding: Encoding,

    /// Maximum inbound message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

/// Reconnection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectConfig {
    /// Consecutive failed attempts before giving up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay between attempts in milliseconds.
    #[serde(default = "default_delay")]
    pub delay_ms: u64,

    /// Timeout of a single attempt in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,
}

/// Typing indicator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypingConfig {
    /// How long a typing signal stays visible in milliseconds.
    #[serde(default = "default_typing_ttl")]
    pub ttl_ms: u64,
}

/// Dashboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Maximum activity feed length.
    #[serde(default = "default_activity_capacity")]
    pub activity_capacity: usize,
}

/// Notification configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    /// REST endpoint listing the user's notifications. Polling is off without it.
    #[serde(default)]
    pub poll_url: Option<String>,

    /// Poll interval in milliseconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Maximum number of notifications kept.
    #[serde(default = "default_max_notifications")]
    pub max_entries: usize,

    /// Log desktop alerts for high-priority notifications.
    #[serde(default = "default_true")]
    pub desktop_alerts: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default)]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_url() -> String {
    "ws://127.0.0.1:5000/ws".to_string()
}

fn default_max_message_size() -> usize {
    MAX_FRAME_SIZE
}

fn default_max_attempts() -> u32 {
    5
}

fn default_delay() -> u64 {
    1_000 // 1 second
}

fn default_connect_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_typing_ttl() -> u64 {
    3_000 // 3 seconds
}

fn default_activity_capacity() -> usize {
    20
}

fn default_poll_interval() -> u64 {
    30_000 // 30 seconds
}

fn default_max_notifications() -> usize {
    100
}

fn default_true() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            encoding: Encoding::default(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_ms: default_delay(),
            connect_timeout_ms: default_connect_timeout(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            ttl_ms: default_typing_ttl(),
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            activity_capacity: default_activity_capacity(),
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            poll_url: None,
            poll_interval_ms: default_poll_interval(),
            max_entries: default_max_notifications(),
            desktop_alerts: true,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the first default path that
    /// exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_default_paths()?,
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn from_default_paths() -> Result<Self> {
        for path in DEFAULT_CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Override the server URL and token from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("TASKWIRE_URL").filter(|v| !v.trim().is_empty()) {
            self.server.url = url;
        }
        if let Some(token) = lookup("TASKWIRE_TOKEN").filter(|v| !v.trim().is_empty()) {
            self.token = Some(token);
        }
    }

    /// WebSocket transport settings.
    #[must_use]
    pub fn websocket(&self) -> WebSocketConfig {
        WebSocketConfig {
            url: self.server.url.clone(),
            encoding: self.server.encoding,
            max_message_size: self.server.max_message_size,
        }
    }

    /// Hub settings.
    #[must_use]
    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            reconnect: ReconnectPolicy {
                max_attempts: self.reconnect.max_attempts,
                delay: Duration::from_millis(self.reconnect.delay_ms),
                connect_timeout: Duration::from_millis(self.reconnect.connect_timeout_ms),
            },
            dispatch: DispatchConfig {
                typing_ttl: Duration::from_millis(self.typing.ttl_ms),
                activity_capacity: self.dashboard.activity_capacity,
                max_notifications: self.notifications.max_entries,
            },
            router: RouterConfig::default(),
        }
    }

    /// Notification poll interval.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.notifications.poll_interval_ms)
    }
}
