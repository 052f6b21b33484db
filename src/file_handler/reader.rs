//! Materializing line text from indexed records.
//!
//! Reads are positional (`pread`), so any number of readers can share one
//! file handle without a seek lock. The handle itself sits behind a lock that
//! is only held long enough to clone the `Arc`.

use crate::error::{LogtailError, Result};
use crate::extract::Timestamp;
use crate::file_handler::line_index::LineRecord;
use bstr::ByteSlice;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::fs::File;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// How `get_text` should materialize a line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TextOptions {
    /// Wait for the initial scan instead of failing on a line not yet indexed
    pub block: bool,
    /// Cap the returned text at `max_line_length` bytes
    pub abbreviate: bool,
    /// Cap used by `abbreviate`; the session default applies when `None`
    pub max_line_length: Option<usize>,
}

/// Text of one line plus what happened while producing it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineText {
    pub line: String,
    pub timestamp: Option<Timestamp>,
    /// The line was longer than the abbreviation cap and has been cut
    pub truncated: bool,
    /// Invalid UTF-8 was replaced with U+FFFD
    pub decode_warning: bool,
}

#[derive(Debug, Clone)]
struct CachedText {
    text: Arc<str>,
    decode_warning: bool,
}

/// Reads line bytes of one file
#[derive(Debug)]
pub struct LineReader {
    path: PathBuf,
    handle: RwLock<Option<Arc<File>>>,
    cache: Mutex<LruCache<u64, CachedText>>,
}

impl LineReader {
    /// Open `path` for positional reads
    pub fn open(path: &Path, cache_lines: usize) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| LogtailError::file_access(path, "Failed to open file", e))?;
        Ok(Self {
            path: path.to_path_buf(),
            handle: RwLock::new(Some(Arc::new(file))),
            cache: Mutex::new(LruCache::new(cache_capacity(cache_lines))),
        })
    }

    /// A reader without a handle, for files that failed to open
    pub fn unavailable(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            handle: RwLock::new(None),
            cache: Mutex::new(LruCache::new(NonZeroUsize::MIN)),
        }
    }

    /// Shared handle for reads outside any lock
    pub fn handle(&self) -> Result<Arc<File>> {
        self.handle
            .read()
            .as_ref()
            .map(Arc::clone)
            .ok_or(LogtailError::SessionClosed)
    }

    /// Replace the handle after a rotation and forget cached text
    pub fn reopen(&self) -> Result<()> {
        let file = File::open(&self.path)
            .map_err(|e| LogtailError::file_access(&self.path, "Failed to reopen file", e))?;
        *self.handle.write() = Some(Arc::new(file));
        self.cache.lock().clear();
        Ok(())
    }

    /// Drop the handle; later reads fail with `SessionClosed`
    pub fn close(&self) {
        self.handle.write().take();
        self.cache.lock().clear();
    }

    /// Forget cached text of lines at or after `local_line`
    pub fn invalidate_from(&self, local_line: u64) {
        let mut cache = self.cache.lock();
        let stale: Vec<u64> = cache
            .iter()
            .map(|(line, _)| *line)
            .filter(|line| *line >= local_line)
            .collect();
        for line in stale {
            cache.pop(&line);
        }
    }

    /// Full text of a line if it was read recently
    pub fn cached(&self, local_line: u64, record: &LineRecord) -> Option<LineText> {
        let mut cache = self.cache.lock();
        let cached = cache.get(&local_line)?;
        Some(LineText {
            line: cached.text.to_string(),
            timestamp: record.timestamp,
            truncated: false,
            decode_warning: cached.decode_warning,
        })
    }

    /// Remember the full (not abbreviated) text of a line
    pub fn remember(&self, local_line: u64, text: &LineText) {
        if text.truncated {
            return;
        }
        self.cache.lock().put(
            local_line,
            CachedText {
                text: Arc::from(text.line.as_str()),
                decode_warning: text.decode_warning,
            },
        );
    }
}

fn cache_capacity(lines: usize) -> NonZeroUsize {
    NonZeroUsize::new(lines).unwrap_or(NonZeroUsize::MIN)
}

/// Read the raw bytes of a line (blocking)
pub fn read_record_bytes(file: &File, record: &LineRecord) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; record.byte_length as usize];
    read_exact_at(file, &mut buf, record.byte_offset)?;
    Ok(buf)
}

/// Read the bytes in `end - len..end`, clamped at the start of the file (blocking)
pub fn read_bytes_before(file: &File, end: u64, len: u64) -> std::io::Result<Vec<u8>> {
    let start = end.saturating_sub(len);
    let mut buf = vec![0u8; (end - start) as usize];
    read_exact_at(file, &mut buf, start)?;
    Ok(buf)
}

/// Read and decode a line, reading at most `cap` bytes when given (blocking)
pub fn read_record_text(
    file: &File,
    record: &LineRecord,
    cap: Option<usize>,
) -> std::io::Result<LineText> {
    let length = record.byte_length as usize;
    let (want, truncated) = match cap {
        Some(cap) if length > cap => (cap, true),
        _ => (length, false),
    };

    let mut buf = vec![0u8; want];
    read_exact_at(file, &mut buf, record.byte_offset)?;
    if truncated {
        trim_partial_char(&mut buf);
    }

    let (line, decode_warning) = match String::from_utf8(buf) {
        Ok(text) => (text, false),
        Err(e) => (e.as_bytes().to_str_lossy().into_owned(), true),
    };

    Ok(LineText {
        line,
        timestamp: record.timestamp,
        truncated,
        decode_warning,
    })
}

// A cut in the middle of a multi-byte character is an artifact of the cap,
// not bad input, so it should not show up as a replacement character.
fn trim_partial_char(buf: &mut Vec<u8>) {
    if let Err(e) = std::str::from_utf8(buf) {
        if e.error_len().is_none() {
            buf.truncate(e.valid_up_to());
        }
    }
}

#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    std::os::unix::fs::FileExt::read_exact_at(file, buf, offset)
}

#[cfg(windows)]
fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::io::{Read, Seek, SeekFrom};
    let mut file = file.try_clone()?;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_file(content: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content).expect("Failed to write test content");
        file.flush().expect("Failed to flush test file");
        file
    }

    fn record(offset: u64, length: u64) -> LineRecord {
        LineRecord {
            byte_offset: offset,
            byte_length: length,
            timestamp: None,
            source_file_id: 0,
        }
    }

    #[test]
    fn test_read_full_line() {
        let file = create_test_file(b"first\nsecond\n");
        let reader = LineReader::open(file.path(), 8).unwrap();
        let handle = reader.handle().unwrap();

        let text = read_record_text(&handle, &record(6, 6), None).unwrap();
        assert_eq!(text.line, "second");
        assert!(!text.truncated);
        assert!(!text.decode_warning);
    }

    #[test]
    fn test_abbreviated_read() {
        let file = create_test_file(b"0123456789\n");
        let handle = File::open(file.path()).unwrap();

        let text = read_record_text(&handle, &record(0, 10), Some(4)).unwrap();
        assert_eq!(text.line, "0123");
        assert!(text.truncated);
    }

    #[test]
    fn test_abbreviation_does_not_split_characters() {
        let file = create_test_file("aé\n".as_bytes());
        let handle = File::open(file.path()).unwrap();

        // 'é' is two bytes; a cap of 2 would cut it in half
        let text = read_record_text(&handle, &record(0, 3), Some(2)).unwrap();
        assert_eq!(text.line, "a");
        assert!(text.truncated);
        assert!(!text.decode_warning);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let file = create_test_file(b"ok \xff\xfe end\n");
        let handle = File::open(file.path()).unwrap();

        let text = read_record_text(&handle, &record(0, 9), None).unwrap();
        assert!(text.decode_warning);
        assert!(text.line.starts_with("ok "));
        assert!(text.line.ends_with(" end"));
        assert!(text.line.contains('\u{FFFD}'));
    }

    #[test]
    fn test_read_bytes_before() {
        let file = create_test_file(b"one\ntwo\n");
        let handle = File::open(file.path()).unwrap();

        assert_eq!(read_bytes_before(&handle, 8, 4).unwrap(), b"two\n");
        assert_eq!(read_bytes_before(&handle, 3, 64).unwrap(), b"one");
        assert!(read_bytes_before(&handle, 0, 64).unwrap().is_empty());
    }

    #[test]
    fn test_read_past_end_fails() {
        let file = create_test_file(b"short\n");
        let handle = File::open(file.path()).unwrap();
        assert!(read_record_bytes(&handle, &record(0, 100)).is_err());
    }

    #[test]
    fn test_cache_roundtrip_and_invalidation() {
        let file = create_test_file(b"a\nb\n");
        let reader = LineReader::open(file.path(), 8).unwrap();
        let rec = record(0, 1);

        let text = LineText {
            line: "a".into(),
            timestamp: None,
            truncated: false,
            decode_warning: false,
        };
        reader.remember(0, &text);
        reader.remember(1, &LineText { line: "b".into(), ..text.clone() });
        assert_eq!(reader.cached(0, &rec).unwrap().line, "a");

        reader.invalidate_from(1);
        assert!(reader.cached(1, &rec).is_none());
        assert!(reader.cached(0, &rec).is_some());
    }

    #[test]
    fn test_truncated_text_is_not_cached() {
        let file = create_test_file(b"abcdef\n");
        let reader = LineReader::open(file.path(), 8).unwrap();
        let text = LineText {
            line: "abc".into(),
            timestamp: None,
            truncated: true,
            decode_warning: false,
        };
        reader.remember(0, &text);
        assert!(reader.cached(0, &record(0, 6)).is_none());
    }

    #[test]
    fn test_closed_reader_rejects_reads() {
        let file = create_test_file(b"x\n");
        let reader = LineReader::open(file.path(), 8).unwrap();
        reader.close();
        assert!(matches!(reader.handle(), Err(LogtailError::SessionClosed)));

        let missing = LineReader::unavailable(Path::new("/nope"));
        assert!(missing.handle().is_err());
    }
}
