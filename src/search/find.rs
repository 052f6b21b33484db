//! Cursor-relative find over the unfiltered line sequence.

use crate::error::Result;
use crate::search::matcher::LineMatcher;
use crate::search::{LineSource, SearchDirection};
use std::ops::Range;

/// Result of one `advance_search` step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Found(u64),
    NotFound,
}

/// Find the next line matching `matcher` after `from` in `direction`.
///
/// The search wraps around once: every line is visited exactly once, the
/// line at `from` last. Without a starting line the whole sequence is
/// searched from the start (forward) or the end (backward).
pub async fn advance_search(
    source: &dyn LineSource,
    matcher: &LineMatcher,
    from: Option<u64>,
    direction: SearchDirection,
    batch_lines: u64,
) -> Result<SearchOutcome> {
    let total = source.line_count();
    if total == 0 {
        return Ok(SearchOutcome::NotFound);
    }
    let batch_lines = batch_lines.max(1);

    for segment in search_order(total, from, direction) {
        let found = match direction {
            SearchDirection::Forward => scan_forward(source, matcher, segment, batch_lines).await?,
            SearchDirection::Backward => {
                scan_backward(source, matcher, segment, batch_lines).await?
            }
        };
        if let Some(line) = found {
            return Ok(SearchOutcome::Found(line));
        }
    }
    Ok(SearchOutcome::NotFound)
}

/// The two contiguous ranges visited, in order. Backward ranges are walked
/// from their end.
fn search_order(total: u64, from: Option<u64>, direction: SearchDirection) -> [Range<u64>; 2] {
    let Some(current) = from.map(|line| line.min(total - 1)) else {
        return [0..total, 0..0];
    };
    match direction {
        SearchDirection::Forward => [current + 1..total, 0..current + 1],
        SearchDirection::Backward => [0..current, current..total],
    }
}

async fn scan_forward(
    source: &dyn LineSource,
    matcher: &LineMatcher,
    range: Range<u64>,
    batch_lines: u64,
) -> Result<Option<u64>> {
    let mut start = range.start;
    while start < range.end {
        let end = range.end.min(start + batch_lines);
        let lines = source.read_lines(start..end).await?;
        if let Some(i) = lines.iter().position(|line| matcher.is_match(line)) {
            return Ok(Some(start + i as u64));
        }
        if (lines.len() as u64) < end - start {
            break;
        }
        start = end;
    }
    Ok(None)
}

async fn scan_backward(
    source: &dyn LineSource,
    matcher: &LineMatcher,
    range: Range<u64>,
    batch_lines: u64,
) -> Result<Option<u64>> {
    let mut end = range.end;
    while end > range.start {
        let start = range.start.max(end.saturating_sub(batch_lines));
        let lines = source.read_lines(start..end).await?;
        if let Some(i) = lines.iter().rposition(|line| matcher.is_match(line)) {
            return Ok(Some(start + i as u64));
        }
        end = start;
    }
    Ok(None)
}
