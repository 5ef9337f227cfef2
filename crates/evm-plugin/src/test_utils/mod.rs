//! Test utilities for extension hosting.

mod extension;
mod store;

use std::path::Path;

pub use extension::*;
pub use store::*;

use crate::{EventBody, EventRecord, FlagInfo, PluginConfig};

/// A config rooted in `dir` that runs handlers inline.
pub fn test_config(dir: &Path) -> PluginConfig {
    PluginConfig {
        plugin_dir: dir.join("plugins"),
        log_dir: dir.join("plugin_log"),
        dispatch_timeout_ms: None,
        ..Default::default()
    }
}

/// A bare record for `event`, outside of any transaction.
pub fn flag_record(event: &str) -> EventRecord {
    EventRecord {
        event: event.to_string(),
        tx_hash: None,
        call_layer: 0,
        call_stack: Vec::new(),
        body: EventBody::Flag(FlagInfo::new(event)),
    }
}
