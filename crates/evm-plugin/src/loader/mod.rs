//! Discovery and loading of extension artifacts.
//!
//! Each artifact is handled on its own: one that fails to open, speaks another ABI version or
//! declares a broken contract is reported in the [`LoadReport`] and the others still load.

mod discover;
mod dylib;
mod error;

use std::path::{Path, PathBuf};

pub use discover::discover;
pub use dylib::DylibExtension;
pub use error::LoadError;
use glob::Pattern;

use crate::{Extension, PluginConfig};

/// An artifact that could not be loaded.
#[derive(Debug)]
pub struct LoadFailure {
    /// Artifact path, or the scanned directory when discovery itself failed.
    pub path: PathBuf,
    /// Why it failed.
    pub error: LoadError,
}

/// Outcome of loading a directory of artifacts.
#[derive(Debug, Default)]
pub struct LoadReport {
    /// Names of the extensions registered, in load order.
    pub loaded: Vec<String>,
    /// Artifacts that were skipped.
    pub failures: Vec<LoadFailure>,
}

impl LoadReport {
    /// Whether every discovered artifact loaded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn fail(&mut self, path: PathBuf, error: LoadError) {
        tracing::warn!(target: "evm_plugin::loader", path = %path.display(), %error, "skipping extension");
        self.failures.push(LoadFailure { path, error });
    }
}

/// Loads extension artifacts from a directory.
#[derive(Debug, Clone)]
pub struct ExtensionLoader {
    dir: PathBuf,
    pattern: Pattern,
}

impl ExtensionLoader {
    /// Creates a loader scanning `dir` for files matching the glob `pattern`.
    pub fn new(dir: impl Into<PathBuf>, pattern: &str) -> Result<Self, LoadError> {
        Ok(Self { dir: dir.into(), pattern: Pattern::new(pattern)? })
    }

    /// Creates a loader for the directory and pattern of `config`.
    pub fn from_config(config: &PluginConfig) -> Result<Self, LoadError> {
        Self::new(&config.plugin_dir, &config.pattern)
    }

    /// The scanned directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Lists matching artifacts. The directory is scanned again on every call.
    pub fn discover(&self) -> Result<Vec<PathBuf>, LoadError> {
        discover(&self.dir, &self.pattern)
    }

    /// Loads a single artifact.
    pub fn load_one(path: &Path) -> Result<DylibExtension, LoadError> {
        let extension = DylibExtension::open(path)?;
        tracing::debug!(target: "evm_plugin::loader", path = %path.display(), name = %extension.name(), "artifact loaded");
        Ok(extension)
    }

    /// Opens every matching artifact, skipping the ones that fail.
    ///
    /// The report only lists failures. Names are added to [`LoadReport::loaded`] once the
    /// extensions are registered.
    pub fn load_all(&self) -> (Vec<DylibExtension>, LoadReport) {
        let mut report = LoadReport::default();
        let paths = match self.discover() {
            Ok(paths) => paths,
            Err(error) => {
                report.fail(self.dir.clone(), error);
                return (Vec::new(), report);
            }
        };

        let mut extensions = Vec::with_capacity(paths.len());
        for path in paths {
            match Self::load_one(&path) {
                Ok(extension) => extensions.push(extension),
                Err(error) => report.fail(path, error),
            }
        }
        (extensions, report)
    }
}
