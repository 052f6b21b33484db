//! Metadata polling for growth, truncation and rotation of a scanned file.

use std::fs::Metadata;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Size and on-disk identity of a file at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileIdentity {
    pub len: u64,
    /// `(device, inode)` where the platform exposes them
    pub inode: Option<(u64, u64)>,
}

impl FileIdentity {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        Self {
            len: metadata.len(),
            inode: inode_of(metadata),
        }
    }

    pub fn read(path: &Path) -> std::io::Result<Self> {
        std::fs::metadata(path).map(|m| Self::from_metadata(&m))
    }
}

#[cfg(unix)]
fn inode_of(metadata: &Metadata) -> Option<(u64, u64)> {
    use std::os::unix::fs::MetadataExt;
    Some((metadata.dev(), metadata.ino()))
}

#[cfg(not(unix))]
fn inode_of(_metadata: &Metadata) -> Option<(u64, u64)> {
    None
}

/// What changed since the previous poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    Unchanged,
    Grew { from: u64, to: u64 },
    Truncated { from: u64, to: u64 },
    /// A different file now lives at the path
    Rotated,
    /// The path is gone, typically between a rename and a re-create
    Missing,
}

/// Polls one file's metadata.
///
/// An observation only becomes the new baseline once [`FileWatcher::commit`]
/// is called, so a change whose handling failed is reported again on the
/// next poll.
#[derive(Debug)]
pub struct FileWatcher {
    path: PathBuf,
    known: FileIdentity,
    observed: Option<FileIdentity>,
}

impl FileWatcher {
    /// Start watching from an identity observed during the scan
    pub fn new(path: impl Into<PathBuf>, known: FileIdentity) -> Self {
        Self {
            path: path.into(),
            known,
            observed: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Compare current metadata with the committed baseline
    pub fn poll(&mut self) -> std::io::Result<FileChange> {
        self.observed = None;
        let current = match FileIdentity::read(&self.path) {
            Ok(identity) => identity,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(FileChange::Missing),
            Err(e) => return Err(e),
        };
        let previous = self.known;
        self.observed = Some(current);

        let change = if current.inode != previous.inode {
            FileChange::Rotated
        } else if current.len < previous.len {
            FileChange::Truncated {
                from: previous.len,
                to: current.len,
            }
        } else if current.len > previous.len {
            FileChange::Grew {
                from: previous.len,
                to: current.len,
            }
        } else {
            FileChange::Unchanged
        };
        Ok(change)
    }

    /// Accept the last observation as handled
    pub fn commit(&mut self) {
        if let Some(identity) = self.observed.take() {
            self.known = identity;
        }
    }
}
