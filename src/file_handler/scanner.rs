//! Chunked line scanner
//!
//! The scanner reads a file in fixed-size chunks and turns it into
//! [`LineRecord`]s without keeping line contents around. It uses memchr for
//! SIMD-optimized newline detection and only retains the first few bytes of
//! the current line, which is all the timestamp recognizer gets to see.

use crate::error::{LogtailError, Result};
use crate::extract::TimestampRecognizer;
use crate::file_handler::line_index::{FileId, LineRecord};
use memchr::memchr_iter;
use std::fs::File;
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Progress snapshot handed to the progress callback
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScanProgress {
    /// Bytes consumed by this scan
    pub bytes_scanned: u64,
    /// Complete lines found by this scan
    pub lines_scanned: u64,
    /// Bytes the scan expects to cover (file size at scan start)
    pub total_bytes: u64,
    /// Set on the final report of a scan
    pub complete: bool,
}

impl ScanProgress {
    pub fn fraction(&self) -> f64 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.bytes_scanned as f64 / self.total_bytes as f64).min(1.0)
        }
    }

    /// Human readable progress line
    pub fn message(&self, name: &str) -> String {
        if self.complete {
            format!("Scanned {} ({} lines)", name, self.lines_scanned)
        } else {
            format!(
                "Scanning {} {:.0}% ({} lines)",
                name,
                self.fraction() * 100.0,
                self.lines_scanned
            )
        }
    }
}

/// Result of one scan pass
#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutput {
    /// Complete lines found, in file order
    pub records: Vec<LineRecord>,
    /// Where the next scan must resume (start of the pending fragment)
    pub resume_offset: u64,
    /// Bytes consumed, including the pending fragment
    pub bytes_scanned: u64,
    /// The scan stopped early because of cancellation
    pub cancelled: bool,
}

/// Builds line records from a byte stream
#[derive(Debug, Clone)]
pub struct LineScanner {
    chunk_size: usize,
    probe_bytes: usize,
    progress_interval: Duration,
    recognizer: Arc<dyn TimestampRecognizer>,
}

impl LineScanner {
    pub fn new(chunk_size: usize, recognizer: Arc<dyn TimestampRecognizer>) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            probe_bytes: 4096,
            progress_interval: Duration::from_millis(100),
            recognizer,
        }
    }

    /// Bytes of each line kept for timestamp recognition
    pub fn with_probe_bytes(mut self, probe_bytes: usize) -> Self {
        self.probe_bytes = probe_bytes;
        self
    }

    /// Minimum time between two progress callbacks
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Scan `path` from `start_offset` to the current end of file.
    ///
    /// With `finalize` the trailing unterminated fragment is indexed as a
    /// line; otherwise it is held back and `resume_offset` points at it.
    pub fn scan_file(
        &self,
        path: &Path,
        file_id: FileId,
        start_offset: u64,
        finalize: bool,
        cancel: &AtomicBool,
        on_progress: impl FnMut(&ScanProgress),
    ) -> Result<ScanOutput> {
        let mut file = File::open(path)
            .map_err(|e| LogtailError::file_access(path, "Failed to open file", e))?;
        let file_size = file
            .metadata()
            .map_err(|e| LogtailError::file_access(path, "Failed to read file metadata", e))?
            .len();
        file.seek(SeekFrom::Start(start_offset))
            .map_err(|e| LogtailError::file_access(path, "Failed to seek", e))?;

        self.scan(
            file,
            file_id,
            start_offset,
            file_size.saturating_sub(start_offset),
            finalize,
            cancel,
            on_progress,
        )
        .map_err(|e| LogtailError::file_access(path, "Failed to read file", e))
    }

    /// Scan an arbitrary reader whose first byte sits at `start_offset`.
    #[allow(clippy::too_many_arguments)]
    pub fn scan<R: Read>(
        &self,
        mut reader: R,
        file_id: FileId,
        start_offset: u64,
        expected_bytes: u64,
        finalize: bool,
        cancel: &AtomicBool,
        mut on_progress: impl FnMut(&ScanProgress),
    ) -> std::io::Result<ScanOutput> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut records = Vec::new();
        let mut pos = start_offset;
        let mut line_start = start_offset;
        let mut head: Vec<u8> = Vec::with_capacity(self.probe_bytes.min(4096));
        let mut last_report = Instant::now();
        let mut cancelled = false;

        loop {
            if cancel.load(Ordering::Relaxed) {
                cancelled = true;
                break;
            }

            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            let chunk = &buf[..n];

            let mut cursor = 0;
            for newline in memchr_iter(b'\n', chunk) {
                self.keep_head(&mut head, &chunk[cursor..newline]);
                let end = pos + newline as u64;
                records.push(self.make_record(file_id, line_start, end - line_start, &head));
                head.clear();
                cursor = newline + 1;
                line_start = end + 1;
            }
            self.keep_head(&mut head, &chunk[cursor..]);
            pos += n as u64;

            if last_report.elapsed() >= self.progress_interval {
                last_report = Instant::now();
                on_progress(&ScanProgress {
                    bytes_scanned: pos - start_offset,
                    lines_scanned: records.len() as u64,
                    total_bytes: expected_bytes,
                    complete: false,
                });
            }
        }

        if finalize && !cancelled && pos > line_start {
            records.push(self.make_record(file_id, line_start, pos - line_start, &head));
            line_start = pos;
        }

        on_progress(&ScanProgress {
            bytes_scanned: pos - start_offset,
            lines_scanned: records.len() as u64,
            total_bytes: expected_bytes.max(pos - start_offset),
            complete: !cancelled,
        });

        Ok(ScanOutput {
            records,
            resume_offset: line_start,
            bytes_scanned: pos - start_offset,
            cancelled,
        })
    }

    fn keep_head(&self, head: &mut Vec<u8>, bytes: &[u8]) {
        let room = self.probe_bytes.saturating_sub(head.len());
        head.extend_from_slice(&bytes[..bytes.len().min(room)]);
    }

    fn make_record(&self, file_id: FileId, offset: u64, length: u64, head: &[u8]) -> LineRecord {
        LineRecord {
            byte_offset: offset,
            byte_length: length,
            timestamp: self.recognizer.recognize(head),
            source_file_id: file_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::default_recognizer;
    use proptest::prelude::*;
    use std::io::Cursor;

    fn scanner(chunk_size: usize) -> LineScanner {
        LineScanner::new(chunk_size, default_recognizer())
            .with_progress_interval(Duration::from_secs(3600))
    }

    fn scan_bytes(chunk_size: usize, data: &[u8], finalize: bool) -> ScanOutput {
        let cancel = AtomicBool::new(false);
        scanner(chunk_size)
            .scan(Cursor::new(data), 0, 0, data.len() as u64, finalize, &cancel, |_| {})
            .unwrap()
    }

    fn spans(output: &ScanOutput) -> Vec<(u64, u64)> {
        output
            .records
            .iter()
            .map(|r| (r.byte_offset, r.byte_length))
            .collect()
    }

    #[test]
    fn test_lines_ending_with_newline() {
        let output = scan_bytes(4, b"line1\nline2\n", false);
        assert_eq!(spans(&output), vec![(0, 5), (6, 5)]);
        assert_eq!(output.resume_offset, 12);
        assert_eq!(output.bytes_scanned, 12);
    }

    #[test]
    fn test_pending_fragment_held_back() {
        let output = scan_bytes(3, b"one\ntwo\nthr", false);
        assert_eq!(spans(&output), vec![(0, 3), (4, 3)]);
        assert_eq!(output.resume_offset, 8);
    }

    #[test]
    fn test_pending_fragment_indexed_when_final() {
        let output = scan_bytes(3, b"one\ntwo\nthr", true);
        assert_eq!(spans(&output), vec![(0, 3), (4, 3), (8, 3)]);
        assert_eq!(output.resume_offset, 11);
    }

    #[test]
    fn test_empty_lines_and_empty_input() {
        let output = scan_bytes(8, b"\n\nx\n", false);
        assert_eq!(spans(&output), vec![(0, 0), (1, 0), (2, 1)]);

        let empty = scan_bytes(8, b"", true);
        assert!(empty.records.is_empty());
        assert_eq!(empty.resume_offset, 0);
    }

    #[test]
    fn test_resume_from_offset() {
        let cancel = AtomicBool::new(false);
        let tail = b"c\nd\n";
        let output = scanner(16)
            .scan(Cursor::new(tail), 1, 100, tail.len() as u64, false, &cancel, |_| {})
            .unwrap();
        assert_eq!(spans(&output), vec![(100, 1), (102, 1)]);
        assert!(output.records.iter().all(|r| r.source_file_id == 1));
        assert_eq!(output.resume_offset, 104);
    }

    #[test]
    fn test_timestamp_survives_chunk_split() {
        let data = b"2024-01-15T10:30:00Z first\nno time here\n";
        let output = scan_bytes(5, data, false);
        assert!(output.records[0].timestamp.is_some());
        assert!(output.records[1].timestamp.is_none());
    }

    #[test]
    fn test_cancelled_scan_stops() {
        let cancel = AtomicBool::new(true);
        let output = scanner(4)
            .scan(Cursor::new(b"a\nb\n"), 0, 0, 4, true, &cancel, |_| {})
            .unwrap();
        assert!(output.cancelled);
        assert!(output.records.is_empty());
        assert_eq!(output.resume_offset, 0);
    }

    #[test]
    fn test_final_progress_report() {
        let cancel = AtomicBool::new(false);
        let mut reports = Vec::new();
        scanner(2)
            .scan(Cursor::new(b"ab\ncd\n"), 0, 0, 6, false, &cancel, |p| {
                reports.push(*p)
            })
            .unwrap();
        // The interval is an hour, so only the closing report fires
        assert_eq!(reports.len(), 1);
        assert!(reports[0].complete);
        assert_eq!(reports[0].lines_scanned, 2);
        assert_eq!(reports[0].fraction(), 1.0);
    }

    #[test]
    fn test_progress_message() {
        let progress = ScanProgress {
            bytes_scanned: 50,
            lines_scanned: 3,
            total_bytes: 200,
            complete: false,
        };
        assert_eq!(progress.message("app.log"), "Scanning app.log 25% (3 lines)");
    }

    #[test]
    fn test_scan_missing_file() {
        let cancel = AtomicBool::new(false);
        let err = scanner(16)
            .scan_file(
                Path::new("/this/file/does/not/exist.log"),
                0,
                0,
                true,
                &cancel,
                |_| {},
            )
            .unwrap_err();
        assert!(err.is_file_access());
    }

    proptest! {
        #[test]
        fn chunk_size_does_not_change_records(
            lines in proptest::collection::vec("[a-z ]{0,12}", 0..20),
            tail in "[a-z]{0,5}",
            chunk_size in 1usize..32,
        ) {
            let mut data = lines.join("\n");
            if !lines.is_empty() {
                data.push('\n');
            }
            data.push_str(&tail);

            let reference = scan_bytes(1 << 16, data.as_bytes(), true);
            let chunked = scan_bytes(chunk_size, data.as_bytes(), true);
            prop_assert_eq!(spans(&reference), spans(&chunked));

            let rebuilt: Vec<&str> = chunked
                .records
                .iter()
                .map(|r| &data[r.byte_offset as usize..r.end_offset() as usize])
                .collect();
            let mut expected: Vec<&str> = lines.iter().map(String::as_str).collect();
            if !tail.is_empty() {
                expected.push(&tail);
            }
            prop_assert_eq!(rebuilt, expected);
        }
    }
}
