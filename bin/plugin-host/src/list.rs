use clap::Parser;
use tracing::warn;

use crate::{args::PluginArgs, logging::LogArgs, HostError};

/// Load every extension of the plugin directory and list its bindings
#[derive(Parser, Debug)]
pub struct Cmd {
    /// Extension loading configuration
    #[command(flatten)]
    pub plugin_args: PluginArgs,

    /// Logging configuration
    #[command(flatten)]
    pub log_args: LogArgs,
}

impl Cmd {
    /// Execute the list command
    pub fn run(&self) -> Result<(), HostError> {
        self.log_args.init()?;
        let controller = self.plugin_args.load()?;
        let registry = controller.registry();

        if registry.is_empty() {
            warn!(dir = %controller.config().plugin_dir.display(), "No extension loaded");
        }
        for owner in registry.owners() {
            println!("{owner}");
            for event in registry.events() {
                if registry.lookup(event).is_some_and(|binding| binding.owner == owner) {
                    println!("  {event}");
                }
            }
        }
        Ok(())
    }
}
