pub mod extract;
pub mod filter;

pub use extract::{extract_segments, SegmentKey, SegmentSet, FREE_SEGMENT, PAID_SEGMENT};
pub use filter::{matches, Filter, FilterError, StatusClass};
