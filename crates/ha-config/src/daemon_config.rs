//! Daemon configuration
//!
//! Parses `daemon.yaml` from the config directory and decides where the
//! daemon connects.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

/// File name of the daemon configuration inside the config directory
pub const CONFIG_FILE: &str = "daemon.yaml";

/// Environment variable carrying the supervisor token
pub const SUPERVISOR_TOKEN_VAR: &str = "HASSIO_TOKEN";

/// Websocket endpoint of the supervisor proxy
pub const SUPERVISOR_ENDPOINT: &str = "ws://supervisor/core/websocket";

/// Connection settings for the remote platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub ssl: bool,

    /// Long-lived access token; not needed under the supervisor
    #[serde(default)]
    pub token: Option<String>,
}

/// Settings of the announcement queue
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncementConfig {
    /// Pending announcements beyond this are dropped
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Fixed wait after each text-to-speech call
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    #[serde(default = "default_tts_domain")]
    pub tts_domain: String,

    #[serde(default = "default_tts_service")]
    pub tts_service: String,

    /// Player attribute holding the clip duration in seconds
    #[serde(default = "default_duration_attribute")]
    pub duration_attribute: String,
}

impl AnnouncementConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}

/// Full daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Domain of the daemon's own companion services
    #[serde(default = "default_companion_domain")]
    pub companion_domain: String,

    #[serde(default)]
    pub announcements: AnnouncementConfig,
}

/// Where the transport should connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// Straight to the platform
    Direct {
        host: String,
        port: u16,
        ssl: bool,
        token: String,
    },
    /// Through the supervisor proxy
    Supervisor { endpoint: String, token: String },
}

impl ConnectTarget {
    pub fn token(&self) -> &str {
        match self {
            Self::Direct { token, .. } | Self::Supervisor { token, .. } => token,
        }
    }

    /// Websocket url of the target
    pub fn url(&self) -> String {
        match self {
            Self::Direct {
                host, port, ssl, ..
            } => {
                let scheme = if *ssl { "wss" } else { "ws" };
                format!("{}://{}:{}/api/websocket", scheme, host, port)
            }
            Self::Supervisor { endpoint, .. } => endpoint.clone(),
        }
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    8123
}

fn default_companion_domain() -> String {
    "netdaemon".to_string()
}

fn default_queue_capacity() -> usize {
    20
}

fn default_settle_delay_ms() -> u64 {
    2500
}

fn default_tts_domain() -> String {
    "tts".to_string()
}

fn default_tts_service() -> String {
    "google_cloud_say".to_string()
}

fn default_duration_attribute() -> String {
    "media_duration".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ssl: false,
            token: None,
        }
    }
}

impl Default for AnnouncementConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            settle_delay_ms: default_settle_delay_ms(),
            tts_domain: default_tts_domain(),
            tts_service: default_tts_service(),
            duration_attribute: default_duration_attribute(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            companion_domain: default_companion_domain(),
            announcements: AnnouncementConfig::default(),
        }
    }
}

impl DaemonConfig {
    /// Load `daemon.yaml` from a config directory
    ///
    /// A missing file yields the defaults.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        if !config_dir.join(CONFIG_FILE).exists() {
            info!(dir = %config_dir.display(), "No daemon.yaml found, using defaults");
            return Ok(Self::default());
        }

        let yaml = load_yaml(config_dir, CONFIG_FILE)?;
        Self::from_yaml(&yaml)
    }

    /// Parse the configuration from a processed YAML value
    pub fn from_yaml(yaml: &Value) -> ConfigResult<Self> {
        if yaml.is_null() {
            return Ok(Self::default());
        }
        if !yaml.is_mapping() {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            });
        }

        serde_yaml::from_value(yaml.clone()).map_err(|e| ConfigError::InvalidValue {
            key: "daemon".to_string(),
            reason: e.to_string(),
        })
    }

    /// Check settings that cannot be expressed in the types
    ///
    /// `supervisor_token` is the value of `HASSIO_TOKEN`, if any.
    pub fn validate(&self, supervisor_token: Option<&str>) -> ConfigResult<()> {
        if self.announcements.queue_capacity == 0 {
            return Err(ConfigError::ValidationFailed {
                message: "announcements.queue_capacity must be at least 1".to_string(),
            });
        }
        if self.companion_domain.trim().is_empty() {
            return Err(ConfigError::ValidationFailed {
                message: "companion_domain must not be empty".to_string(),
            });
        }
        if supervisor_token.is_none() && self.token().is_none() {
            return Err(ConfigError::ValidationFailed {
                message: "connection.token is required outside the supervisor".to_string(),
            });
        }
        Ok(())
    }

    fn token(&self) -> Option<&str> {
        self.connection
            .token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }

    /// Decide the connect target given the supervisor token, if any
    pub fn connect_target_with(&self, supervisor_token: Option<&str>) -> ConfigResult<ConnectTarget> {
        self.validate(supervisor_token)?;

        if let Some(token) = supervisor_token {
            return Ok(ConnectTarget::Supervisor {
                endpoint: SUPERVISOR_ENDPOINT.to_string(),
                token: token.to_string(),
            });
        }

        let token = self.token().ok_or_else(|| ConfigError::ValidationFailed {
            message: "connection.token is required outside the supervisor".to_string(),
        })?;
        Ok(ConnectTarget::Direct {
            host: self.connection.host.clone(),
            port: self.connection.port,
            ssl: self.connection.ssl,
            token: token.to_string(),
        })
    }

    /// Decide the connect target from the process environment
    pub fn connect_target(&self) -> ConfigResult<ConnectTarget> {
        let supervisor_token = std::env::var(SUPERVISOR_TOKEN_VAR)
            .ok()
            .filter(|t| !t.trim().is_empty());
        self.connect_target_with(supervisor_token.as_deref())
    }
}
