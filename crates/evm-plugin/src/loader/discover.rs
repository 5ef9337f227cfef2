use std::path::{Path, PathBuf};

use glob::Pattern;
use walkdir::WalkDir;

use super::LoadError;

/// Lists the files directly inside `dir` whose name matches `pattern`, sorted by path.
///
/// Unreadable entries below the directory itself are skipped with a warning.
pub fn discover(dir: &Path, pattern: &Pattern) -> Result<Vec<PathBuf>, LoadError> {
    let mut found = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(LoadError::Discover { dir: dir.to_path_buf(), source })
            }
            Err(err) => {
                tracing::warn!(target: "evm_plugin::loader", dir = %dir.display(), %err, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry.file_name().to_str().is_some_and(|name| pattern.matches(name));
        if matches {
            found.push(entry.into_path());
        }
    }
    found.sort();
    Ok(found)
}
