use std::path::PathBuf;

use evm_plugin::{ConfigError, PluginError, ProcessError, ScriptError, StoreError};

/// Error types for the plugin-host commands
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Invalid plugin configuration
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// Extension loading or registration failed
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Failed to read a file
    #[error("Failed to read {}: {source}", path.display())]
    FileRead {
        /// File path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write a file
    #[error("Failed to write {}: {source}", path.display())]
    FileWrite {
        /// File path
        path: PathBuf,
        /// I/O error
        #[source]
        source: std::io::Error,
    },

    /// Scenario file is not valid JSON
    #[error("Invalid scenario {}: {source}", path.display())]
    Scenario {
        /// Scenario path
        path: PathBuf,
        /// Parse error
        #[source]
        source: serde_json::Error,
    },

    /// Seeding the pre-state failed
    #[error("State error: {0}")]
    Store(#[from] StoreError),

    /// Block processing failed
    #[error("Processing error: {0}")]
    Process(#[from] ProcessError<ScriptError>),

    /// Serializing the report failed
    #[error("Failed to encode report: {0}")]
    Encode(#[source] serde_json::Error),

    /// A global tracing subscriber is already installed
    #[error("Failed to install logger: {0}")]
    Logging(#[source] Box<dyn std::error::Error + Send + Sync + 'static>),

    /// Some artifacts failed to load and `--strict` was given
    #[error("{0} extension(s) failed to load")]
    LoadFailures(usize),
}
