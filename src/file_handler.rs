//! File handling: scanning, indexing, reading and watching individual files.
//!
//! Each opened log file gets a [`LineIndex`] built by the [`LineScanner`],
//! a [`LineReader`] that materializes line text with positional reads, and a
//! [`FileWatcher`] that notices growth, truncation and rotation.

pub mod line_index;
pub mod reader;
pub mod scanner;
pub mod validation;
pub mod watcher;

pub use line_index::{FileId, LineIndex, LineRecord};
pub use reader::{LineReader, LineText, TextOptions};
pub use scanner::{LineScanner, ScanOutput, ScanProgress};
pub use validation::validate_file_path;
pub use watcher::{FileChange, FileIdentity, FileWatcher};

use std::path::PathBuf;

/// Identity of an opened log file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub id: FileId,
    pub path: PathBuf,
    /// Size when the session opened it (0 if it could not be opened)
    pub size_at_open: u64,
}

impl LogFile {
    /// File name for display, falling back to the full path
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Per-file scan bookkeeping, dropped once the initial scan completes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanState {
    pub lines_scanned: u64,
    pub bytes_scanned: u64,
    pub complete: bool,
}
