//! Block range algebra: half-open intervals and ordered collections of them.

mod range;
mod ranges;

pub use range::{merge, Range, RangeError};
pub use ranges::Ranges;
