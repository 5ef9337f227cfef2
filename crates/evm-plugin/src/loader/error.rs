use std::path::PathBuf;

use crate::{DescriptorError, RegistryError};

/// Failure to load one extension artifact.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The scan directory could not be read.
    #[error("failed to scan {}: {source}", dir.display())]
    Discover {
        /// Directory being scanned.
        dir: PathBuf,
        /// Walk error.
        #[source]
        source: walkdir::Error,
    },
    /// The artifact name pattern is not a valid glob.
    #[error("invalid artifact pattern: {0}")]
    Pattern(#[from] glob::PatternError),
    /// The shared library could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Artifact path.
        path: PathBuf,
        /// Loader error.
        #[source]
        source: libloading::Error,
    },
    /// The artifact does not export `plugin_abi_version`.
    #[error("{} does not export plugin_abi_version", path.display())]
    MissingAbiVersion {
        /// Artifact path.
        path: PathBuf,
    },
    /// The artifact was built against another ABI.
    #[error("{} speaks ABI version {found}, expected {expected}", path.display())]
    AbiMismatch {
        /// Artifact path.
        path: PathBuf,
        /// Version the host speaks.
        expected: u32,
        /// Version the artifact reports.
        found: u32,
    },
    /// The artifact does not export `Register`.
    #[error("{} does not export Register", path.display())]
    MissingRegister {
        /// Artifact path.
        path: PathBuf,
    },
    /// The descriptor returned by `Register` is invalid.
    #[error("{} returned an invalid descriptor: {source}", path.display())]
    Descriptor {
        /// Artifact path.
        path: PathBuf,
        /// Decode or validation error.
        #[source]
        source: DescriptorError,
    },
    /// A declared handler symbol is not exported.
    #[error("{} declares {symbol} for {event} but does not export it", path.display())]
    MissingHandler {
        /// Artifact path.
        path: PathBuf,
        /// Event the handler was declared for.
        event: String,
        /// Missing symbol.
        symbol: String,
    },
    /// The descriptor conflicts with extensions already registered.
    #[error("{} cannot be registered: {source}", path.display())]
    Registry {
        /// Artifact path.
        path: PathBuf,
        /// Registry error.
        #[source]
        source: RegistryError,
    },
    /// An I/O error, typically while opening the data log.
    #[error("I/O error for {}: {source}", path.display())]
    Io {
        /// Path involved.
        path: PathBuf,
        /// I/O error.
        #[source]
        source: std::io::Error,
    },
}
