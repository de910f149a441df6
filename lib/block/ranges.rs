use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::range::{Range, RangeError};

/// Ordered collection of [`Range`]s.
///
/// Well-formed collections are sorted ascending by start block and non-overlapping; the
/// algebra below preserves that shape when its inputs have it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ranges(Vec<Range>);

impl Ranges {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, range: Range) {
        self.0.push(range);
    }

    pub fn into_vec(self) -> Vec<Range> {
        self.0
    }

    /// Sorts by `(start_block, exclusive_end_block)`.
    pub fn sort(&mut self) {
        self.0.sort();
    }

    /// Total number of blocks covered, counting overlaps twice.
    pub fn total_blocks(&self) -> u64 {
        self.0.iter().map(Range::len).sum()
    }

    /// Coalesces every run of adjacent or overlapping ranges into one range.
    pub fn merged(&self) -> Ranges {
        let mut out: Vec<Range> = Vec::with_capacity(self.0.len());
        for range in &self.0 {
            match out.last_mut() {
                Some(last) => match last.union(range) {
                    Some(merged) => *last = merged,
                    None => out.push(*range),
                },
                None => out.push(*range),
            }
        }
        Ranges(out)
    }

    /// Groups consecutive contiguous ranges into the fewest order-preserving buckets, each
    /// spanning at most `max_bucket_size` blocks.
    ///
    /// A range that alone exceeds `max_bucket_size` stays a bucket of its own; ranges
    /// separated by a gap never share a bucket.
    pub fn merged_buckets(&self, max_bucket_size: u64) -> Ranges {
        let mut out: Vec<Range> = Vec::with_capacity(self.0.len());
        for range in &self.0 {
            if let Some(last) = out.last_mut() {
                let span = range
                    .exclusive_end_block()
                    .saturating_sub(last.start_block());
                if last.is_followed_by(range) && span <= max_bucket_size {
                    if let Some(merged) = last.union(range) {
                        *last = merged;
                        continue;
                    }
                }
            }
            out.push(*range);
        }
        Ranges(out)
    }

    /// Unions two disjoint, well-formed collections, keeping ascending order.
    pub fn add(&self, other: &Ranges) -> Ranges {
        let mut out = Vec::with_capacity(self.0.len() + other.0.len());
        let (mut left, mut right) = (self.0.iter().peekable(), other.0.iter().peekable());
        loop {
            let next = match (left.peek(), right.peek()) {
                (Some(a), Some(b)) if b < a => right.next(),
                (Some(_), _) => left.next(),
                (None, Some(_)) => right.next(),
                (None, None) => break,
            };
            out.extend(next.copied());
        }
        Ranges(out)
    }

    pub fn contains_range(&self, range: &Range) -> bool {
        self.0.iter().any(|candidate| candidate == range)
    }
}

impl Deref for Ranges {
    type Target = [Range];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<Vec<Range>> for Ranges {
    fn from(ranges: Vec<Range>) -> Self {
        Self(ranges)
    }
}

impl FromIterator<Range> for Ranges {
    fn from_iter<I: IntoIterator<Item = Range>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for Ranges {
    type Item = Range;
    type IntoIter = std::vec::IntoIter<Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Ranges {
    type Item = &'a Range;
    type IntoIter = std::slice::Iter<'a, Range>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Comma-joined `start-end` pairs, e.g. `10-20,20-30`.
impl fmt::Display for Ranges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, range) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(",")?;
            }
            write!(f, "{range}")?;
        }
        Ok(())
    }
}

impl FromStr for Ranges {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Ok(Ranges::new());
        }
        s.split(',').map(|part| part.parse::<Range>()).collect()
    }
}
