//! YAML loading with the daemon's custom tags
//!
//! `!include` paths are relative to the file containing the tag. `!secret`
//! reads from the config directory's secrets.yaml and `!env_var` from the
//! process environment. Unknown tags are kept, with their inner value
//! resolved.

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::value::TaggedValue;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Tags resolved while loading
enum ConfigTag {
    Include,
    Secret,
    EnvVar,
}

impl ConfigTag {
    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "!include" => Some(Self::Include),
            "!secret" => Some(Self::Secret),
            "!env_var" => Some(Self::EnvVar),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Include => "!include",
            Self::Secret => "!secret",
            Self::EnvVar => "!env_var",
        }
    }
}

/// Loads YAML files from a config directory, resolving custom tags
pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files being loaded, outermost first
    include_chain: Vec<PathBuf>,
}

impl YamlLoader {
    /// Loader for `config_dir`, reading its secrets.yaml if present
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            include_chain: Vec::new(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load a file; relative paths are taken from the config directory
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = absolute_in(&self.config_dir, path.as_ref());
        if self.include_chain.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        debug!(path = %path.display(), depth = self.include_chain.len(), "Loading YAML file");
        let content = fs::read_to_string(&path).map_err(|source| ConfigError::ReadFile {
            path: path.clone(),
            source,
        })?;

        self.include_chain.push(path.clone());
        let loaded = self.load_string(&content, &path);
        self.include_chain.pop();
        loaded
    }

    /// Parse `content` as if it was read from `source_path`
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let raw = serde_yaml::from_str(content).map_err(|source| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source,
        })?;
        let dir = source_path.parent().unwrap_or(&self.config_dir).to_path_buf();
        self.resolve(raw, &dir)
    }

    /// Resolve tags anywhere inside `value`; `dir` holds the current file
    fn resolve(&mut self, value: Value, dir: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.resolve_tag(*tagged, dir),
            Value::Mapping(map) => map
                .into_iter()
                .map(|(key, value)| -> ConfigResult<(Value, Value)> {
                    Ok((key, self.resolve(value, dir)?))
                })
                .collect::<ConfigResult<Mapping>>()
                .map(Value::Mapping),
            Value::Sequence(items) => items
                .into_iter()
                .map(|item| self.resolve(item, dir))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            scalar => Ok(scalar),
        }
    }

    fn resolve_tag(&mut self, tagged: TaggedValue, dir: &Path) -> ConfigResult<Value> {
        let TaggedValue { tag, value } = tagged;
        let Some(known) = ConfigTag::parse(&tag.to_string()) else {
            trace!(tag = %tag, "Keeping unknown tag");
            let value = self.resolve(value, dir)?;
            return Ok(Value::Tagged(Box::new(TaggedValue { tag, value })));
        };

        let argument = value
            .as_str()
            .map(str::trim)
            .ok_or_else(|| ConfigError::InvalidValue {
                key: known.name().to_string(),
                reason: format!("expected a string argument, got {:?}", value),
            })?;

        match known {
            ConfigTag::Include => {
                if argument.is_empty() {
                    return Err(ConfigError::InvalidIncludePath {
                        path: argument.to_string(),
                        reason: "path is empty".to_string(),
                    });
                }
                self.load_file(absolute_in(dir, Path::new(argument)))
            }
            ConfigTag::Secret => {
                let secret = self.secrets.get(argument)?;
                debug!(key = argument, "Resolved secret");
                Ok(Value::String(secret.to_string()))
            }
            ConfigTag::EnvVar => {
                let resolved = std::env::var(argument).map_err(|_| ConfigError::EnvVarNotFound {
                    var: argument.to_string(),
                })?;
                debug!(var = argument, "Resolved environment variable");
                Ok(Value::String(resolved))
            }
        }
    }
}

fn absolute_in(dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        dir.join(path)
    }
}

/// Load `file` from `config_dir` with all tags resolved
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}
