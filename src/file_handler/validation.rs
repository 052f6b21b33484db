//! File validation utilities for ensuring files are suitable for processing.
//!
//! This module checks that a path can be scanned before a session commits a
//! scanner and a watcher to it.

use crate::error::{LogtailError, Result};
use crate::file_handler::watcher::FileIdentity;
use std::fs::File;
use std::path::Path;

/// Validate that a file path is accessible and suitable for processing
///
/// # Validations Performed
/// - Path exists and is a regular file (not a directory)
/// - File is readable by the current process
///
/// Empty files are accepted: a log that has not been written yet is a
/// perfectly good thing to tail.
///
/// # Returns
/// * The identity (size and inode) the file had when it was validated
pub fn validate_file_path(path: &Path) -> Result<FileIdentity> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        let message = if e.kind() == std::io::ErrorKind::NotFound {
            "File does not exist"
        } else {
            "Failed to read file metadata"
        };
        LogtailError::file_access(path, message, e)
    })?;

    if !metadata.is_file() {
        return Err(LogtailError::file_access(
            path,
            "Path is not a file",
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "Not a file"),
        ));
    }

    // Try to open the file to verify read permissions
    File::open(path)
        .map_err(|e| LogtailError::file_access(path, "Cannot open file for reading", e))?;

    Ok(FileIdentity::from_metadata(&metadata))
}
