//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Why the daemon configuration could not be loaded
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    ParseYaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `!secret` names a key missing from secrets.yaml
    #[error("secret '{key}' is not defined in secrets.yaml")]
    SecretNotFound { key: String },

    #[error("cannot include '{path}': {reason}")]
    InvalidIncludePath { path: String, reason: String },

    /// A file includes itself, directly or through other files
    #[error("{path} includes itself")]
    CircularInclude { path: PathBuf },

    /// `!env_var` names an unset variable
    #[error("environment variable '{var}' is not set")]
    EnvVarNotFound { var: String },

    #[error("bad value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },

    /// Settings parse but cannot work together
    #[error("invalid daemon configuration: {message}")]
    ValidationFailed { message: String },
}
