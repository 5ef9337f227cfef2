//! Per-extension data logs.
//!
//! Each extension owns `<log_dir>/<name>.datalog`. Non-empty handler reply messages are appended
//! to it as one JSON object per line.

use std::{
    fs::{File, OpenOptions},
    io::{self, LineWriter, Write},
    path::{Path, PathBuf},
};

use alloy_primitives::B256;
use serde::Serialize;

use crate::constants::DATALOG_EXTENSION;

/// One line of a data log.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DatalogEntry<'a> {
    event: &'a str,
    tx_hash: Option<B256>,
    call_layer: usize,
    message: std::borrow::Cow<'a, str>,
}

/// Append-only data log of one extension.
#[derive(Debug, Default)]
pub struct ExtensionLog {
    path: Option<PathBuf>,
    writer: Option<LineWriter<File>>,
}

impl ExtensionLog {
    /// Opens, creating if needed, the data log of `name` inside `dir`.
    pub fn open(dir: &Path, name: &str) -> io::Result<Self> {
        let path = Self::path_for(dir, name);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path: Some(path), writer: Some(LineWriter::new(file)) })
    }

    /// A log that drops every entry.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Location of the data log of `name` inside `dir`.
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        dir.join(format!("{name}.{DATALOG_EXTENSION}"))
    }

    /// File backing the log, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Appends a handler message. Empty messages are skipped.
    pub fn append(
        &mut self,
        event: &str,
        tx_hash: Option<B256>,
        call_layer: usize,
        message: &[u8],
    ) -> io::Result<()> {
        let Some(writer) = self.writer.as_mut() else { return Ok(()) };
        if message.is_empty() {
            return Ok(());
        }
        let entry =
            DatalogEntry { event, tx_hash, call_layer, message: String::from_utf8_lossy(message) };
        serde_json::to_writer(&mut *writer, &entry)?;
        writer.write_all(b"\n")
    }

    /// Flushes buffered entries.
    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.as_mut().map_or(Ok(()), Write::flush)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = ExtensionLog::open(dir.path(), "watcher").unwrap();
        log.append("TXSTART", None, 0, b"first").unwrap();
        log.append("TXEND", Some(B256::ZERO), 1, b"").unwrap();
        log.append("TXEND", Some(B256::ZERO), 1, b"second").unwrap();
        log.flush().unwrap();

        let content = std::fs::read_to_string(dir.path().join("watcher.datalog")).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|line| serde_json::from_str(line).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "TXSTART");
        assert_eq!(lines[0]["message"], "first");
        assert_eq!(lines[1]["callLayer"], 1);
    }

    #[test]
    fn test_reopen_appends() {
        let dir = tempfile::tempdir().unwrap();
        for message in [b"a", b"b"] {
            let mut log = ExtensionLog::open(dir.path(), "x").unwrap();
            log.append("TXEND", None, 0, message).unwrap();
        }
        let content = std::fs::read_to_string(ExtensionLog::path_for(dir.path(), "x")).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
