//! Logging configuration for the plugin-host CLI tool.
//!
//! Verbosity comes from `-v` flags unless `RUST_LOG` is set. Logs go to stderr, or to the file
//! given with `--log.file`.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

use crate::HostError;

/// Logging configuration arguments.
#[derive(Debug, Clone, Default, Parser)]
pub struct LogArgs {
    /// Increase logging verbosity (-v = error, -vv = warn, -vvv = info, -vvvv = debug, -vvvvv =
    /// trace)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log file path. If specified, logs are written to this file instead of stderr.
    #[arg(long = "log.file", visible_aliases = ["log-file"], global = true)]
    pub log_file: Option<PathBuf>,

    /// Disable colorful console logging. Only applies when logging to stderr (no --log.file).
    #[arg(long = "log.no-color", visible_aliases = ["log-no-color"], global = true)]
    pub log_no_color: bool,
}

impl LogArgs {
    /// Installs the global tracing subscriber.
    ///
    /// Nothing is installed when logging is off. Targets are only shown from DEBUG on. Fails if
    /// another subscriber is already installed.
    pub fn init(&self) -> Result<(), HostError> {
        let filter = if std::env::var("RUST_LOG").is_ok() {
            EnvFilter::from_default_env()
        } else if self.verbose == 0 {
            if self.log_file.is_none() {
                return Ok(());
            }
            EnvFilter::new("off")
        } else {
            EnvFilter::new(self.directives())
        };
        let show_target = self.verbose >= 4;

        if let Some(log_file) = &self.log_file {
            let file = std::fs::File::create(log_file)
                .map_err(|source| HostError::FileWrite { path: log_file.clone(), source })?;
            fmt()
                .with_env_filter(filter)
                .with_target(show_target)
                .with_writer(file)
                .with_ansi(false)
                .try_init()
                .map_err(HostError::Logging)?;
        } else {
            fmt()
                .with_env_filter(filter)
                .with_target(show_target)
                .with_writer(std::io::stderr)
                .with_ansi(!self.log_no_color)
                .try_init()
                .map_err(HostError::Logging)?;
        }
        Ok(())
    }

    fn directives(&self) -> String {
        let level = match self.verbose {
            1 => Level::ERROR,
            2 => Level::WARN,
            3 => Level::INFO,
            4 => Level::DEBUG,
            _ => Level::TRACE,
        };
        format!("plugin_host={level},evm_plugin={level}")
    }
}
