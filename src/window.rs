//! Growing row sequence assembled from `[start, stop)` windows.

use std::collections::BTreeMap;
use std::ops::Range;

/// Rows of one fingerprint, keyed by absolute row index, plus the ranges
/// that have already been requested.
#[derive(Debug, Clone)]
pub struct RowWindow<T> {
    covered: Vec<Range<u64>>,
    rows: BTreeMap<u64, T>,
}

impl<T> Default for RowWindow<T> {
    fn default() -> Self {
        Self {
            covered: Vec::new(),
            rows: BTreeMap::new(),
        }
    }
}

impl<T: Clone> RowWindow<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sub-ranges of `range` not yet covered, in ascending order.
    pub fn gaps(&self, range: Range<u64>) -> Vec<Range<u64>> {
        let mut gaps = Vec::new();
        if range.start >= range.end {
            return gaps;
        }
        let mut cursor = range.start;
        for covered in &self.covered {
            if covered.end <= cursor {
                continue;
            }
            if covered.start >= range.end {
                break;
            }
            if covered.start > cursor {
                gaps.push(cursor..covered.start);
            }
            cursor = cursor.max(covered.end);
            if cursor >= range.end {
                break;
            }
        }
        if cursor < range.end {
            gaps.push(cursor..range.end);
        }
        gaps
    }

    pub fn is_covered(&self, range: Range<u64>) -> bool {
        self.gaps(range).is_empty()
    }

    /// Records the rows returned for `requested`. The whole requested range
    /// counts as covered even when fewer rows came back, which happens past
    /// the end of the collection.
    pub fn merge(&mut self, requested: Range<u64>, rows: Vec<T>) {
        if requested.start >= requested.end {
            return;
        }
        for (index, row) in (requested.start..).zip(rows) {
            self.rows.insert(index, row);
        }
        self.covered.push(requested);
        self.covered.sort_by_key(|range| range.start);

        let mut merged: Vec<Range<u64>> = Vec::with_capacity(self.covered.len());
        for range in self.covered.drain(..) {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => {
                    last.end = last.end.max(range.end);
                }
                _ => merged.push(range),
            }
        }
        self.covered = merged;
    }

    pub fn covered(&self) -> &[Range<u64>] {
        &self.covered
    }

    /// All loaded rows in index order.
    pub fn rows(&self) -> Vec<T> {
        self.rows.values().cloned().collect()
    }

    pub fn slice(&self, range: Range<u64>) -> Vec<T> {
        self.rows.range(range).map(|(_, row)| row.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
