//! Engine configuration.
//!
//! Settings are read from a YAML or JSON file. The path defaults to
//! `<config_dir>/actionflow/engine.yaml` and can be overridden with
//! `ACTIONFLOW_CONFIG_PATH`. A missing file yields defaults; an unreadable or invalid
//! default file logs a warning and also yields defaults. Individual settings can be
//! overridden through environment variables after the file is loaded.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use dirs_next::{config_dir, home_dir};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::resolve::DEFAULT_MAX_TEMPLATE_DEPTH;

/// Environment variable allowing callers to override the config file path.
pub const CONFIG_PATH_ENV: &str = "ACTIONFLOW_CONFIG_PATH";
/// Overrides [`EngineConfig::max_template_depth`].
pub const MAX_TEMPLATE_DEPTH_ENV: &str = "ACTIONFLOW_MAX_TEMPLATE_DEPTH";
/// Overrides [`EngineConfig::default_timeout_ms`].
pub const DEFAULT_TIMEOUT_ENV: &str = "ACTIONFLOW_DEFAULT_TIMEOUT_MS";

const CONFIG_FILE_NAME: &str = "engine.yaml";

/// Error surfaced when an explicitly requested config file cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error for '{path}': {source}")]
    Io { path: PathBuf, source: std::io::Error },
    #[error("config file '{path}' is not valid YAML or JSON: {source}")]
    Parse { path: PathBuf, source: serde_yaml::Error },
}

/// Tunables for the action executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Depth guard for recursive template resolution.
    pub max_template_depth: usize,
    /// Upper bound for `retry.attempts`; policies asking for more are clamped.
    pub max_retry_attempts: u32,
    /// Cap applied to every computed backoff delay, in milliseconds.
    pub max_retry_delay_ms: u64,
    /// Timeout applied to actions that do not declare their own.
    pub default_timeout_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_template_depth: DEFAULT_MAX_TEMPLATE_DEPTH,
            max_retry_attempts: 10,
            max_retry_delay_ms: 30_000,
            default_timeout_ms: None,
        }
    }
}

impl EngineConfig {
    /// Loads the config from the default location, falling back to defaults.
    pub fn load() -> Self {
        let path = default_config_path();
        let config = match Self::from_path(&path) {
            Ok(config) => config,
            Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(error) => {
                warn!(path = %path.display(), error = %error, "failed to load engine config; using defaults");
                Self::default()
            }
        };
        config.with_env_overrides()
    }

    /// Loads the config from an explicit path. YAML is a superset of JSON, so both parse.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Applies environment overrides; unparsable values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(depth) = env_number::<usize>(MAX_TEMPLATE_DEPTH_ENV) {
            self.max_template_depth = depth;
        }
        if let Some(timeout) = env_number::<u64>(DEFAULT_TIMEOUT_ENV) {
            self.default_timeout_ms = Some(timeout);
        }
        self
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

fn env_number<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(variable = name, value = trimmed, "ignoring non-numeric environment override");
            None
        }
    }
}

/// Path of the engine config file.
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return expand_tilde(path.trim());
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("actionflow")
        .join(CONFIG_FILE_NAME)
}

fn expand_tilde(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home_dir().map(|home| home.join(rest)).unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}
