//! Append-only index of line boundaries for a single file
//!
//! This module provides the LineIndex structure that records where every
//! complete line of a file starts, how long it is and when it was logged.
//! Records are only ever appended; a rotation replaces the tail of the index
//! from the first record that no longer matches the file on disk.

use crate::extract::Timestamp;

/// Position of a file in the order it was passed to `open`
pub type FileId = usize;

/// Bytes before the resume point kept to recognize a rewritten file
pub const FINGERPRINT_BYTES: u64 = 64;

/// One complete line of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineRecord {
    /// Byte position where the line starts
    pub byte_offset: u64,
    /// Length in bytes, excluding the `\n` terminator
    pub byte_length: u64,
    /// Timestamp recognized at scan time, if any
    pub timestamp: Option<Timestamp>,
    /// File this line belongs to
    pub source_file_id: FileId,
}

impl LineRecord {
    /// Byte position of the line terminator
    pub fn end_offset(&self) -> u64 {
        self.byte_offset + self.byte_length
    }
}

/// Ordered, random-access line index of one file
#[derive(Debug)]
pub struct LineIndex {
    file_id: FileId,

    /// Line records in file order
    ///
    /// Grows monotonically while the file grows
    records: Vec<LineRecord>,

    /// Byte position the next scan resumes from
    ///
    /// Everything before this position belongs to an indexed line. An
    /// unterminated fragment at the end of the file starts here.
    indexed_to_byte: u64,

    /// Up to `FINGERPRINT_BYTES` bytes ending at `indexed_to_byte`
    fingerprint: Vec<u8>,
}

impl LineIndex {
    /// Create a new empty line index
    pub fn new(file_id: FileId) -> Self {
        Self {
            file_id,
            records: Vec::new(),
            indexed_to_byte: 0,
            fingerprint: Vec::new(),
        }
    }

    pub fn file_id(&self) -> FileId {
        self.file_id
    }

    /// Number of complete lines indexed
    pub fn len(&self) -> u64 {
        self.records.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record of a line by its 0-based position in the file
    pub fn get(&self, local_line: u64) -> Option<LineRecord> {
        usize::try_from(local_line)
            .ok()
            .and_then(|i| self.records.get(i))
            .copied()
    }

    pub fn records(&self) -> &[LineRecord] {
        &self.records
    }

    /// Check how many bytes have been indexed
    pub fn indexed_byte_count(&self) -> u64 {
        self.indexed_to_byte
    }

    /// Bytes that must still precede `indexed_byte_count()` in the file for
    /// an append to be valid
    pub fn fingerprint(&self) -> &[u8] {
        &self.fingerprint
    }

    pub fn set_fingerprint(&mut self, fingerprint: Vec<u8>) {
        self.fingerprint = fingerprint;
    }

    /// Append freshly scanned records and move the resume point.
    ///
    /// Returns the local line number of the first appended record.
    pub fn extend(&mut self, records: Vec<LineRecord>, resume_offset: u64) -> u64 {
        let first = self.len();
        debug_assert!(records
            .first()
            .map_or(true, |r| r.byte_offset >= self.indexed_to_byte));
        self.records.extend(records);
        self.indexed_to_byte = resume_offset;
        first
    }

    /// First position where `fresh` (a rescan from offset 0) disagrees with
    /// the records already held.
    ///
    /// Records are compared by boundaries and timestamp. Everything before
    /// the returned position is still valid.
    pub fn divergence_point(&self, fresh: &[LineRecord]) -> u64 {
        self.records
            .iter()
            .zip(fresh)
            .take_while(|(old, new)| old == new)
            .count() as u64
    }

    /// Drop every record from `local_line` on and append the corresponding
    /// part of `fresh`, a full rescan of the file.
    ///
    /// Returns the number of records appended.
    pub fn replace_from(
        &mut self,
        local_line: u64,
        fresh: Vec<LineRecord>,
        resume_offset: u64,
    ) -> u64 {
        let keep = (local_line as usize).min(self.records.len());
        self.records.truncate(keep);
        let appended: Vec<LineRecord> = fresh.into_iter().skip(keep).collect();
        let count = appended.len() as u64;
        self.records.extend(appended);
        self.indexed_to_byte = resume_offset;
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(offset: u64, length: u64) -> LineRecord {
        LineRecord {
            byte_offset: offset,
            byte_length: length,
            timestamp: None,
            source_file_id: 0,
        }
    }

    #[test]
    fn test_new_line_index() {
        let index = LineIndex::new(3);
        assert_eq!(index.file_id(), 3);
        assert_eq!(index.len(), 0);
        assert!(index.is_empty());
        assert_eq!(index.indexed_byte_count(), 0);
        assert!(index.get(0).is_none());
    }

    #[test]
    fn test_extend_is_incremental() {
        let mut index = LineIndex::new(0);

        // "line1\nline2\n"
        let first = index.extend(vec![record(0, 5), record(6, 5)], 12);
        assert_eq!(first, 0);
        assert_eq!(index.len(), 2);
        assert_eq!(index.indexed_byte_count(), 12);

        // "line3\npart" -- the fragment stays unindexed
        let first = index.extend(vec![record(12, 5)], 18);
        assert_eq!(first, 2);
        assert_eq!(index.get(2).unwrap().end_offset(), 17);
        assert_eq!(index.indexed_byte_count(), 18);
    }

    #[test]
    fn test_divergence_point() {
        let mut index = LineIndex::new(0);
        index.extend(vec![record(0, 5), record(6, 5), record(12, 5)], 18);

        let same_prefix = vec![record(0, 5), record(6, 5), record(12, 2)];
        assert_eq!(index.divergence_point(&same_prefix), 2);

        let rewritten = vec![record(0, 9)];
        assert_eq!(index.divergence_point(&rewritten), 0);

        // Truncated to the first two lines: nothing among them diverges
        let shorter = vec![record(0, 5), record(6, 5)];
        assert_eq!(index.divergence_point(&shorter), 2);
    }

    #[test]
    fn test_replace_from_keeps_valid_prefix() {
        let mut index = LineIndex::new(0);
        index.extend(vec![record(0, 5), record(6, 5), record(12, 5)], 18);

        let fresh = vec![record(0, 5), record(6, 3), record(10, 1)];
        let d = index.divergence_point(&fresh);
        assert_eq!(d, 1);

        let appended = index.replace_from(d, fresh.clone(), 12);
        assert_eq!(appended, 2);
        assert_eq!(index.records(), fresh.as_slice());
        assert_eq!(index.indexed_byte_count(), 12);
    }

    #[test]
    fn test_get_out_of_range() {
        let mut index = LineIndex::new(0);
        index.extend(vec![record(0, 1)], 2);
        assert!(index.get(1).is_none());
        assert!(index.get(u64::MAX).is_none());
    }
}
