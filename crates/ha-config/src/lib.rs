//! Configuration loading for the automation daemon
//!
//! The daemon reads `daemon.yaml` from its config directory. The YAML may
//! use these custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!secret key` - Substitute from secrets.yaml
//! - `!env_var VAR` - Environment variable substitution
//!
//! # Example
//!
//! ```ignore
//! use ha_config::DaemonConfig;
//!
//! let config = DaemonConfig::load("/config")?;
//! let target = config.connect_target()?;
//! ```

mod daemon_config;
mod error;
mod loader;
mod secrets;

pub use daemon_config::{
    AnnouncementConfig, ConnectTarget, ConnectionConfig, DaemonConfig, CONFIG_FILE,
    SUPERVISOR_ENDPOINT, SUPERVISOR_TOKEN_VAR,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

// Re-export serde_yaml::Value for convenience
pub use serde_yaml::Value;
