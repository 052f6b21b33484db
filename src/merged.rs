//! One globally addressable line sequence over several files.
//!
//! The merged order is stored as runs: maximal stretches of consecutive
//! lines from one file. A single file, or files that do not interleave, cost
//! one run each regardless of their size. `locate` is a binary search over
//! the runs' global start positions.

use crate::file_handler::{FileId, LineRecord};
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Run {
    global_start: u64,
    file: FileId,
    local_start: u64,
    len: u64,
}

impl Run {
    fn global_end(&self) -> u64 {
        self.global_start + self.len
    }
}

/// Ordered `(file, local_line)` references, one per indexed line
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergedIndex {
    runs: Vec<Run>,
    len: u64,
    /// Per file, the local lines below this were dropped by `retain_last`
    retained_from: Vec<u64>,
}

/// Merge key of a line: its timestamp as (seconds, nanoseconds)
type SortKey = (i64, u32);

const NO_TIMESTAMP_YET: SortKey = (i64::MIN, 0);

impl MergedIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge per-file records, `files[i]` being the records of file `i`.
    ///
    /// Lines are ordered by timestamp, ties broken by file order and then by
    /// position within the file. A line without a timestamp takes the key of
    /// the closest earlier line of its file, so it stays next to the line it
    /// was written after.
    pub fn build(files: &[&[LineRecord]]) -> Self {
        let mut index = Self::new();

        let non_empty = files.iter().filter(|records| !records.is_empty()).count();
        if non_empty <= 1 {
            for (file, records) in files.iter().enumerate() {
                index.append(file, 0, records.len() as u64);
            }
            return index;
        }

        let total: usize = files.iter().map(|records| records.len()).sum();
        let mut entries: Vec<(SortKey, FileId, u64)> = Vec::with_capacity(total);
        for (file, records) in files.iter().enumerate() {
            let mut key = NO_TIMESTAMP_YET;
            for (local, record) in records.iter().enumerate() {
                if let Some(ts) = record.timestamp {
                    key = (ts.timestamp(), ts.timestamp_subsec_nanos());
                }
                entries.push((key, file, local as u64));
            }
        }

        // Stable: entries were pushed in (file, local) order
        entries.sort_by_key(|&(key, _, _)| key);
        for (_, file, local) in entries {
            index.append(file, local, 1);
        }
        index
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of runs, i.e. prefix boundaries the lookup searches
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Resolve a global line number to `(file, local_line)`
    pub fn locate(&self, global_line: u64) -> Option<(FileId, u64)> {
        if global_line >= self.len {
            return None;
        }
        let i = self.runs.partition_point(|run| run.global_start <= global_line) - 1;
        let run = &self.runs[i];
        Some((run.file, run.local_start + (global_line - run.global_start)))
    }

    /// Resolve a contiguous range of global lines
    pub fn locate_range(&self, range: Range<u64>) -> Vec<(FileId, u64)> {
        let end = range.end.min(self.len);
        if range.start >= end {
            return Vec::new();
        }
        let mut out = Vec::with_capacity((end - range.start) as usize);
        let first = self.runs.partition_point(|run| run.global_start <= range.start) - 1;
        for run in &self.runs[first..] {
            if run.global_start >= end {
                break;
            }
            let from = range.start.max(run.global_start);
            let to = end.min(run.global_end());
            out.extend((from..to).map(|g| (run.file, run.local_start + (g - run.global_start))));
        }
        out
    }

    /// Append `count` consecutive lines of `file` starting at `local_start`.
    ///
    /// Returns the global range they were assigned. Existing entries are
    /// never moved.
    pub fn append(&mut self, file: FileId, local_start: u64, count: u64) -> Range<u64> {
        let start = self.len;
        if count == 0 {
            return start..start;
        }
        match self.runs.last_mut() {
            Some(last) if last.file == file && last.local_start + last.len == local_start => {
                last.len += count;
            }
            _ => self.runs.push(Run {
                global_start: start,
                file,
                local_start,
                len: count,
            }),
        }
        self.len += count;
        start..self.len
    }

    /// Keep only the newest `max_lines` entries.
    pub fn retain_last(&mut self, max_lines: u64) {
        if self.len <= max_lines {
            return;
        }
        let mut drop = self.len - max_lines;
        let mut runs = Vec::with_capacity(self.runs.len());
        let mut hidden = Vec::new();
        for run in self.runs.drain(..) {
            if drop >= run.len {
                drop -= run.len;
                hidden.push((run.file, run.local_start + run.len));
                continue;
            }
            if drop > 0 {
                hidden.push((run.file, run.local_start + drop));
            }
            runs.push(Run {
                global_start: 0,
                file: run.file,
                local_start: run.local_start + drop,
                len: run.len - drop,
            });
            drop = 0;
        }
        self.runs = runs;
        self.renumber();

        for (file, end) in hidden {
            if self.retained_from.len() <= file {
                self.retained_from.resize(file + 1, 0);
            }
            self.retained_from[file] = self.retained_from[file].max(end);
        }
    }

    /// First local line of `file` not hidden by `retain_last`
    pub fn retained_from(&self, file: FileId) -> u64 {
        self.retained_from.get(file).copied().unwrap_or(0)
    }

    /// Replace the entries of `file` from `local_from` on with its lines
    /// `local_from..file_len`, as after a truncation.
    ///
    /// Lines hidden by `retain_last` stay hidden unless the file no longer
    /// reaches them. Returns the global position of the first removed entry
    /// and the global range of the added ones.
    pub fn reindex_file(
        &mut self,
        file: FileId,
        local_from: u64,
        file_len: u64,
    ) -> (Option<u64>, Range<u64>) {
        let first_removed = self.invalidate_file_from(file, local_from);
        let floor = self.retained_from(file).min(file_len);
        if let Some(retained) = self.retained_from.get_mut(file) {
            *retained = floor;
        }
        let start = local_from.max(floor);
        let added = self.append(file, start, file_len.saturating_sub(start));
        (first_removed, added)
    }

    /// Remove every entry of `file` whose local line is `local_from` or later.
    ///
    /// Returns the global position of the first removed entry, or `None` if
    /// nothing was removed. Entries before that position keep their numbers.
    pub fn invalidate_file_from(&mut self, file: FileId, local_from: u64) -> Option<u64> {
        let mut first_removed = None;
        let mut runs = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if run.file != file || run.local_start + run.len <= local_from {
                runs.push(run);
                continue;
            }
            let keep = local_from.saturating_sub(run.local_start);
            if first_removed.is_none() {
                first_removed = Some(run.global_start + keep);
            }
            if keep > 0 {
                runs.push(Run { len: keep, ..run });
            }
        }

        // Neighbours that became adjacent may belong together again
        self.runs.clear();
        for run in runs {
            match self.runs.last_mut() {
                Some(last)
                    if last.file == run.file && last.local_start + last.len == run.local_start =>
                {
                    last.len += run.len;
                }
                _ => self.runs.push(run),
            }
        }
        self.renumber();
        first_removed
    }

    /// Iterate all entries in global order
    pub fn iter(&self) -> impl Iterator<Item = (FileId, u64)> + '_ {
        self.runs.iter().flat_map(|run| {
            (run.local_start..run.local_start + run.len).map(move |local| (run.file, local))
        })
    }

    fn renumber(&mut self) {
        let mut next = 0;
        for run in &mut self.runs {
            run.global_start = next;
            next += run.len;
        }
        self.len = next;
    }
}
