//! Host configuration.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    constants::{DEFAULT_DISPATCH_TIMEOUT_MS, DEFAULT_LOG_DIR, DEFAULT_PATTERN, DEFAULT_PLUGIN_DIR},
    ConflictPolicy,
};

/// Errors loading a [`PluginConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        /// Config path.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file is not a valid config.
    #[error("failed to parse config {}: {source}", path.display())]
    Parse {
        /// Config path.
        path: PathBuf,
        /// Parse error.
        #[source]
        source: serde_json::Error,
    },
    /// The artifact pattern is not a valid glob.
    #[error("invalid artifact pattern {pattern:?}: {source}")]
    Pattern {
        /// The pattern.
        pattern: String,
        /// Glob error.
        #[source]
        source: glob::PatternError,
    },
    /// A dispatch timeout of zero would fail every handler.
    #[error("dispatch timeout must be positive, use null to disable it")]
    ZeroTimeout,
}

/// Where extensions are found, where their data logs go, and how they are run.
///
/// Every field is optional in the JSON form:
///
/// ```json
/// { "pluginDir": "./plugins", "pattern": "*.so", "logDir": "./plugin_log",
///   "dispatchTimeoutMs": 5000, "conflictPolicy": "reject" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase", deny_unknown_fields)]
pub struct PluginConfig {
    /// Directory scanned for artifacts.
    pub plugin_dir: PathBuf,
    /// Glob matched against artifact file names.
    pub pattern: String,
    /// Directory receiving per-extension data logs.
    pub log_dir: PathBuf,
    /// Budget of a single handler invocation. `None` runs handlers inline.
    pub dispatch_timeout_ms: Option<u64>,
    /// What to do when two extensions bind the same event.
    pub conflict_policy: ConflictPolicy,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            plugin_dir: PathBuf::from(DEFAULT_PLUGIN_DIR),
            pattern: DEFAULT_PATTERN.to_string(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            dispatch_timeout_ms: Some(DEFAULT_DISPATCH_TIMEOUT_MS),
            conflict_policy: ConflictPolicy::default(),
        }
    }
}

impl PluginConfig {
    /// Reads and validates a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the values deserialization cannot.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Err(source) = glob::Pattern::new(&self.pattern) {
            return Err(ConfigError::Pattern { pattern: self.pattern.clone(), source });
        }
        if self.dispatch_timeout_ms == Some(0) {
            return Err(ConfigError::ZeroTimeout);
        }
        Ok(())
    }

    /// The dispatch timeout as a [`Duration`]. A zero budget counts as no budget.
    pub fn dispatch_timeout(&self) -> Option<Duration> {
        self.dispatch_timeout_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}
