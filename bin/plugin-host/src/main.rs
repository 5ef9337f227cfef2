//! `plugin-host`: loads EVM pipeline extensions and drives them with scripted blocks.
//!
//! The binary exercises the whole extension stack (discovery, loading, dispatch, data logs and
//! rollbacks) without a full execution client.

use clap::Parser;

mod cmd;
pub use cmd::*;

mod args;
mod error;
mod list;
mod logging;
mod simulate;

pub use error::HostError;

fn main() -> Result<(), HostError> {
    MainCmd::parse().run().inspect_err(|err| eprintln!("Error: {err}"))
}
