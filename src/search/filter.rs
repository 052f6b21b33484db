//! Filtered view: the ordered set of global lines passing the active
//! predicate.
//!
//! Evaluation happens in batches outside the lock. Each predicate change
//! bumps a generation counter, and a batch computed under an older generation
//! is discarded on commit, so a change always wins over work in flight.

use crate::error::Result;
use crate::extract::{extract_level, Severity};
use crate::search::matcher::LineMatcher;
use crate::search::{LineSource, SearchOptions};
use parking_lot::Mutex;
use std::ops::Range;

/// Text predicate plus optional minimum severity
#[derive(Debug)]
pub struct FilterEngine {
    matcher: Option<LineMatcher>,
    min_level: Option<Severity>,
    generation: u64,
    /// Matching global lines below `evaluated_to`, ascending
    matches: Vec<u64>,
    evaluated_to: u64,
}

/// A range of lines to evaluate, detached from the engine
#[derive(Debug, Clone)]
pub struct FilterBatch {
    pub generation: u64,
    pub range: Range<u64>,
    matcher: Option<LineMatcher>,
    min_level: Option<Severity>,
}

impl FilterBatch {
    /// Global numbers of the lines in `lines` that pass, `lines[0]` being
    /// line `range.start`
    pub fn evaluate(&self, lines: &[Vec<u8>]) -> Vec<u64> {
        lines
            .iter()
            .enumerate()
            .filter(|(_, line)| passes(self.matcher.as_ref(), self.min_level, line))
            .map(|(i, _)| self.range.start + i as u64)
            .collect()
    }
}

fn passes(matcher: Option<&LineMatcher>, min_level: Option<Severity>, line: &[u8]) -> bool {
    if let Some(min) = min_level {
        match extract_level(line) {
            Some(level) if level >= min => {}
            _ => return false,
        }
    }
    matcher.map_or(true, |m| m.is_match(line))
}

impl FilterEngine {
    pub fn new(min_level: Option<Severity>) -> Self {
        Self {
            matcher: None,
            min_level,
            generation: 0,
            matches: Vec::new(),
            evaluated_to: 0,
        }
    }

    /// Whether any predicate restricts the view
    pub fn is_active(&self) -> bool {
        self.matcher.is_some() || self.min_level.is_some()
    }

    /// Replace the text predicate. An empty pattern removes it.
    ///
    /// On an invalid pattern the error is returned and the current predicate
    /// and its matches stay in effect.
    pub fn set_predicate(&mut self, pattern: &str, options: SearchOptions) -> Result<()> {
        let matcher = if pattern.is_empty() {
            None
        } else {
            Some(LineMatcher::new(pattern, options)?)
        };
        self.matcher = matcher;
        self.reset();
        Ok(())
    }

    pub fn clear_predicate(&mut self) {
        self.matcher = None;
        self.reset();
    }

    /// Forget every result and start over from line 0
    pub fn reset(&mut self) {
        self.generation += 1;
        self.matches.clear();
        self.evaluated_to = 0;
    }

    /// Forget results for global lines at or after `global_line`, which were
    /// renumbered by an index invalidation
    pub fn invalidate_from(&mut self, global_line: u64) {
        self.generation += 1;
        let keep = self.matches.partition_point(|&line| line < global_line);
        self.matches.truncate(keep);
        self.evaluated_to = self.evaluated_to.min(global_line);
    }

    /// Next batch to evaluate, or `None` when the view is inactive or up to
    /// date with `total` lines
    pub fn pending_work(&self, total: u64, batch_lines: u64) -> Option<FilterBatch> {
        if !self.is_active() || self.evaluated_to >= total {
            return None;
        }
        let end = total.min(self.evaluated_to + batch_lines.max(1));
        Some(FilterBatch {
            generation: self.generation,
            range: self.evaluated_to..end,
            matcher: self.matcher.clone(),
            min_level: self.min_level,
        })
    }

    /// Record the outcome of `batch` over its first `scanned` lines.
    ///
    /// Returns false if the batch is stale (predicate changed, or another
    /// task already covered the range) and was dropped.
    pub fn commit(&mut self, batch: &FilterBatch, scanned: u64, matched: Vec<u64>) -> bool {
        if batch.generation != self.generation || batch.range.start != self.evaluated_to {
            return false;
        }
        self.matches.extend(matched);
        self.evaluated_to = batch.range.start + scanned;
        true
    }

    /// Lines evaluated so far
    pub fn evaluated_to(&self) -> u64 {
        self.evaluated_to
    }

    pub fn is_up_to_date(&self, total: u64) -> bool {
        !self.is_active() || self.evaluated_to >= total
    }

    pub fn matches(&self) -> &[u64] {
        &self.matches
    }

    /// Length of the view: every line when inactive, the matches otherwise
    pub fn visible_len(&self, total: u64) -> u64 {
        if self.is_active() {
            self.matches.len() as u64
        } else {
            total
        }
    }

    /// Global line shown at position `index` of the view
    pub fn visible_line(&self, index: u64, total: u64) -> Option<u64> {
        if self.is_active() {
            usize::try_from(index)
                .ok()
                .and_then(|i| self.matches.get(i))
                .copied()
        } else {
            (index < total).then_some(index)
        }
    }
}

/// Evaluate every line of `source` the filter has not seen yet.
///
/// Safe to run from several tasks at once; whichever commits a range first
/// wins and the others re-plan from the new position.
pub async fn catch_up(
    filter: &Mutex<FilterEngine>,
    source: &dyn LineSource,
    batch_lines: u64,
) -> Result<()> {
    loop {
        let total = source.line_count();
        let batch = match filter.lock().pending_work(total, batch_lines) {
            Some(batch) => batch,
            None => return Ok(()),
        };

        let lines = source.read_lines(batch.range.clone()).await?;
        if lines.is_empty() {
            // The source shrank under us; an invalidation will re-plan
            return Ok(());
        }
        let matched = batch.evaluate(&lines);
        if !filter.lock().commit(&batch, lines.len() as u64, matched) {
            log::debug!("Dropped stale filter batch {:?}", batch.range);
        }
    }
}
