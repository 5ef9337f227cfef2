use std::path::PathBuf;

use clap::Parser;
use evm_plugin::{ConflictPolicy, PluginConfig, PluginController};
use tracing::{debug, info};

use crate::HostError;

/// Extension loading configuration
#[derive(Parser, Debug, Clone, Default)]
pub struct PluginArgs {
    /// JSON config file. Flags below override its values
    #[arg(long = "config", env = "PLUGIN_HOST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory scanned for extension artifacts
    #[arg(long = "plugin.dir", visible_aliases = ["plugin-dir"])]
    pub plugin_dir: Option<PathBuf>,

    /// Glob matched against artifact file names
    #[arg(long = "plugin.pattern", visible_aliases = ["plugin-pattern"])]
    pub pattern: Option<String>,

    /// Directory receiving the per-extension data logs
    #[arg(long = "plugin.log-dir", visible_aliases = ["plugin-log-dir"])]
    pub log_dir: Option<PathBuf>,

    /// Per-handler budget in milliseconds. 0 runs handlers inline without a budget
    #[arg(long = "plugin.timeout", visible_aliases = ["plugin-timeout"])]
    pub timeout_ms: Option<u64>,

    /// What to do when two extensions bind the same event (reject, replace)
    #[arg(long = "plugin.conflicts", visible_aliases = ["plugin-conflicts"])]
    pub conflict_policy: Option<ConflictPolicy>,

    /// Fail when any artifact fails to load
    #[arg(long = "strict")]
    pub strict: bool,
}

impl PluginArgs {
    /// Builds the controller config from the config file and the flags.
    pub fn config(&self) -> Result<PluginConfig, HostError> {
        let mut config = match &self.config {
            Some(path) => PluginConfig::from_file(path)?,
            None => PluginConfig::default(),
        };
        if let Some(dir) = &self.plugin_dir {
            config.plugin_dir = dir.clone();
        }
        if let Some(pattern) = &self.pattern {
            config.pattern = pattern.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = dir.clone();
        }
        if let Some(timeout) = self.timeout_ms {
            config.dispatch_timeout_ms = (timeout > 0).then_some(timeout);
        }
        if let Some(policy) = self.conflict_policy {
            config.conflict_policy = policy;
        }
        config.validate()?;
        debug!(?config, "Plugin configuration");
        Ok(config)
    }

    /// Creates a controller and loads every artifact of the plugin directory.
    pub fn load(&self) -> Result<PluginController, HostError> {
        let mut controller = PluginController::try_new(self.config()?)?;
        let report = controller.load_all()?;
        info!(loaded = report.loaded.len(), failed = report.failures.len(), "Extensions loaded");
        if self.strict && !report.is_clean() {
            return Err(HostError::LoadFailures(report.failures.len()));
        }
        Ok(controller)
    }
}
