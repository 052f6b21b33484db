//! Find and filter over the merged line sequence.
//!
//! Both work on a [`LineSource`]: anything that can report how many lines it
//! holds and hand out the raw bytes of a range of them. The session
//! implements it over its merged index; tests use an in-memory list.

pub mod filter;
pub mod find;
pub mod matcher;

pub use filter::{catch_up, FilterBatch, FilterEngine};
pub use find::{advance_search, SearchOutcome};
pub use matcher::LineMatcher;

use crate::error::Result;
use async_trait::async_trait;
use std::ops::Range;

/// Random access to line bytes by global line number
#[async_trait]
pub trait LineSource: Send + Sync {
    /// Lines currently available
    fn line_count(&self) -> u64;

    /// Raw bytes of every line in `range`, clamped to `line_count()`
    async fn read_lines(&self, range: Range<u64>) -> Result<Vec<Vec<u8>>>;
}

/// Direction for forward/backward search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    Forward,
    Backward,
}

/// How a pattern is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOptions {
    pub case_sensitive: bool,
    /// Treat the pattern as a regular expression instead of a literal
    pub regex: bool,
}

impl SearchOptions {
    pub fn new(regex: bool, case_sensitive: bool) -> Self {
        Self {
            case_sensitive,
            regex,
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use parking_lot::RwLock;

    /// Lines held in memory, growable from tests
    #[derive(Debug, Default)]
    pub struct MemorySource {
        lines: RwLock<Vec<Vec<u8>>>,
    }

    impl MemorySource {
        pub fn new<S: AsRef<[u8]>>(lines: &[S]) -> Self {
            Self {
                lines: RwLock::new(lines.iter().map(|l| l.as_ref().to_vec()).collect()),
            }
        }

        pub fn push(&self, line: &str) {
            self.lines.write().push(line.as_bytes().to_vec());
        }
    }

    #[async_trait]
    impl LineSource for MemorySource {
        fn line_count(&self) -> u64 {
            self.lines.read().len() as u64
        }

        async fn read_lines(&self, range: Range<u64>) -> Result<Vec<Vec<u8>>> {
            let lines = self.lines.read();
            let end = (range.end as usize).min(lines.len());
            let start = (range.start as usize).min(end);
            Ok(lines[start..end].to_vec())
        }
    }
}
