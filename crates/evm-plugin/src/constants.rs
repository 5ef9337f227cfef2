//! Constants shared by the host and by extensions.

/// Event names dispatched by the transaction pipeline.
///
/// Extensions bind handlers to these names in the `option` map of their descriptor. Names outside
/// this list are accepted by the registry but never dispatched by the built-in hooks.
pub mod events {
    /// Block header metadata, dispatched once per block before any transaction.
    pub const BLOCK_INFO: &str = "handle_BLOCK_INFO";
    /// A transaction is about to be applied.
    pub const TX_START: &str = "TXSTART";
    /// An external call (or the top-level message of a transaction) is about to run.
    pub const EXTERNAL_INFO_START: &str = "EXTERNALINFOSTART";
    /// An external call finished, successfully or not.
    pub const EXTERNAL_INFO_END: &str = "EXTERNALINFOEND";
    /// The transaction has been fully applied.
    pub const TX_END: &str = "TXEND";

    /// All event names the built-in hooks dispatch, in pipeline order.
    pub const ALL: [&str; 5] = [BLOCK_INFO, TX_START, EXTERNAL_INFO_START, EXTERNAL_INFO_END, TX_END];

    /// Whether `event` is one of the names dispatched by the built-in hooks.
    pub fn is_known(event: &str) -> bool {
        ALL.contains(&event)
    }

    /// Whether `event` is scoped to a transaction, and so only dispatched while the controller is
    /// started.
    pub fn is_transaction_scoped(event: &str) -> bool {
        event != BLOCK_INFO
    }
}

/// Status bytes a handler may return.
pub mod status {
    /// Nothing to report.
    pub const CONTINUE: u8 = 0;
    /// Discard the state changes of the innermost active call when it ends.
    pub const ROLLBACK: u8 = 1;
    /// The handler failed. Informational only.
    pub const ERROR: u8 = 0xff;
}

/// Version of the C ABI spoken between the host and a dynamically loaded extension.
///
/// An artifact must export `plugin_abi_version` returning this value.
pub const ABI_VERSION: u32 = 1;

/// Name of the mandatory descriptor export.
pub const REGISTER_SYMBOL: &str = "Register";

/// Name of the ABI version export.
pub const ABI_VERSION_SYMBOL: &str = "plugin_abi_version";

/// Default directory scanned for extension artifacts.
pub const DEFAULT_PLUGIN_DIR: &str = "./plugins";

/// Default file name pattern of extension artifacts.
pub const DEFAULT_PATTERN: &str = "*.so";

/// Default directory receiving per-extension data logs.
pub const DEFAULT_LOG_DIR: &str = "./plugin_log";

/// Default budget of a single handler invocation, in milliseconds.
pub const DEFAULT_DISPATCH_TIMEOUT_MS: u64 = 5_000;

/// File extension of per-extension data logs.
pub const DATALOG_EXTENSION: &str = "datalog";
