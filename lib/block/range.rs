use std::cmp::{max, min};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for range construction and parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RangeError {
    #[error("invalid range: start block {start} must be < exclusive end block {end}")]
    Empty { start: u64, end: u64 },
    #[error("invalid range expression {0:?}, expected `start-end`")]
    Parse(String),
    #[error("interval must be > 0")]
    ZeroInterval,
}

/// Half-open block interval `[start_block, exclusive_end_block)`.
///
/// Construction guarantees `start_block < exclusive_end_block`; values are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr", into = "RangeRepr")]
pub struct Range {
    start_block: u64,
    exclusive_end_block: u64,
}

#[derive(Serialize, Deserialize)]
struct RangeRepr {
    start_block: u64,
    exclusive_end_block: u64,
}

impl TryFrom<RangeRepr> for Range {
    type Error = RangeError;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        Range::new(repr.start_block, repr.exclusive_end_block)
    }
}

impl From<Range> for RangeRepr {
    fn from(range: Range) -> Self {
        Self {
            start_block: range.start_block,
            exclusive_end_block: range.exclusive_end_block,
        }
    }
}

impl Range {
    pub fn new(start_block: u64, exclusive_end_block: u64) -> Result<Self, RangeError> {
        if start_block >= exclusive_end_block {
            return Err(RangeError::Empty {
                start: start_block,
                end: exclusive_end_block,
            });
        }
        Ok(Self {
            start_block,
            exclusive_end_block,
        })
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn exclusive_end_block(&self) -> u64 {
        self.exclusive_end_block
    }

    /// Number of blocks covered. Never zero.
    pub fn len(&self) -> u64 {
        self.exclusive_end_block - self.start_block
    }

    pub fn contains(&self, block_num: u64) -> bool {
        block_num >= self.start_block && block_num < self.exclusive_end_block
    }

    pub fn intersects(&self, other: &Range) -> bool {
        self.start_block < other.exclusive_end_block && other.start_block < self.exclusive_end_block
    }

    /// True when `other` starts exactly where `self` ends.
    pub fn is_followed_by(&self, other: &Range) -> bool {
        self.exclusive_end_block == other.start_block
    }

    /// Coalesces two adjacent or overlapping ranges; `None` when a gap separates them.
    pub fn union(&self, other: &Range) -> Option<Range> {
        if self.exclusive_end_block < other.start_block
            || other.exclusive_end_block < self.start_block
        {
            return None;
        }
        Some(Range {
            start_block: min(self.start_block, other.start_block),
            exclusive_end_block: max(self.exclusive_end_block, other.exclusive_end_block),
        })
    }

    /// Splits into windows whose boundaries are multiples of `interval`.
    ///
    /// The first and last windows may be shorter when the range itself is not aligned.
    pub fn split(&self, interval: u64) -> Result<Vec<Range>, RangeError> {
        if interval == 0 {
            return Err(RangeError::ZeroInterval);
        }

        let mut out = Vec::new();
        let mut ptr = self.start_block;
        while ptr < self.exclusive_end_block {
            let boundary = (ptr - ptr % interval).saturating_add(interval);
            let end = min(boundary, self.exclusive_end_block);
            out.push(Range {
                start_block: ptr,
                exclusive_end_block: end,
            });
            ptr = end;
        }
        Ok(out)
    }
}

/// Coalesces `a` and `b` when they touch or overlap, otherwise returns both unchanged
/// in their original order.
pub fn merge(a: Range, b: Range) -> Vec<Range> {
    match a.union(&b) {
        Some(merged) => vec![merged],
        None => vec![a, b],
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start_block, self.exclusive_end_block)
    }
}

impl FromStr for Range {
    type Err = RangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .trim()
            .split_once('-')
            .ok_or_else(|| RangeError::Parse(s.to_string()))?;
        let start = start
            .trim()
            .parse::<u64>()
            .map_err(|_| RangeError::Parse(s.to_string()))?;
        let end = end
            .trim()
            .parse::<u64>()
            .map_err(|_| RangeError::Parse(s.to_string()))?;
        Range::new(start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(expr: &str) -> Range {
        expr.parse().expect("fixture range should parse")
    }

    #[test]
    fn new_rejects_empty_and_inverted_ranges() {
        assert_eq!(
            Range::new(10, 10),
            Err(RangeError::Empty { start: 10, end: 10 })
        );
        assert!(Range::new(11, 10).is_err());
        assert_eq!(Range::new(10, 11).expect("valid range").len(), 1);
    }

    #[test]
    fn parse_and_display_use_dash_form() {
        let range = r(" 13368000-13369000 ");
        assert_eq!(range.start_block(), 13_368_000);
        assert_eq!(range.exclusive_end_block(), 13_369_000);
        assert_eq!(range.to_string(), "13368000-13369000");

        assert!(matches!("10".parse::<Range>(), Err(RangeError::Parse(_))));
        assert!(matches!("a-b".parse::<Range>(), Err(RangeError::Parse(_))));
    }

    #[test]
    fn merge_coalesces_adjacent_and_overlapping() {
        assert_eq!(merge(r("10-20"), r("20-30")), vec![r("10-30")]);
        assert_eq!(merge(r("20-30"), r("10-25")), vec![r("10-30")]);
        assert_eq!(merge(r("10-20"), r("21-30")), vec![r("10-20"), r("21-30")]);
    }

    #[test]
    fn split_aligns_windows_to_interval() {
        let windows = r("55-92").split(10).expect("interval is non-zero");
        let printed: Vec<String> = windows.iter().map(Range::to_string).collect();
        assert_eq!(printed, vec!["55-60", "60-70", "70-80", "80-90", "90-92"]);

        assert_eq!(r("1-11").split(10).expect("split"), vec![r("1-10"), r("10-11")]);
        assert_eq!(r("0-5").split(0), Err(RangeError::ZeroInterval));
    }

    #[test]
    fn intersects_is_half_open() {
        assert!(r("10-20").intersects(&r("19-25")));
        assert!(!r("10-20").intersects(&r("20-25")));
        assert!(r("10-20").contains(19));
        assert!(!r("10-20").contains(20));
    }

    #[test]
    fn serde_rejects_invalid_ranges() {
        let ok: Range = serde_json::from_str(r#"{"start_block":1,"exclusive_end_block":2}"#)
            .expect("valid range should deserialize");
        assert_eq!(ok, r("1-2"));

        serde_json::from_str::<Range>(r#"{"start_block":2,"exclusive_end_block":2}"#)
            .expect_err("empty range should be rejected");
    }
}
