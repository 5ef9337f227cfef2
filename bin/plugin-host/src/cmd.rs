use clap::Parser;

use crate::HostError;

/// Main command enumeration for the plugin-host CLI tool
#[derive(Parser, Debug)]
#[command(infer_subcommands = true, version)]
pub enum MainCmd {
    /// Load every extension of the plugin directory and list its bindings
    List(crate::list::Cmd),
    /// Replay a scripted block through the loaded extensions
    Simulate(crate::simulate::Cmd),
}

impl MainCmd {
    /// Execute the main command
    pub fn run(&self) -> Result<(), HostError> {
        match self {
            Self::List(cmd) => cmd.run(),
            Self::Simulate(cmd) => cmd.run(),
        }
    }
}
