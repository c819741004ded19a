//! crates/flashforge_core/src/classify.rs
//!
//! The staleness classifier: a pure comparison between a page's
//! source-modified time and its stored generation timestamp.

use chrono::{DateTime, Duration, FixedOffset};

use crate::domain::{Page, Verdict};

/// Fixed UTC offset attached to generation timestamps when they are written
/// to the store (GMT+1).
pub fn generation_offset() -> FixedOffset {
    FixedOffset::east_opt(3600).expect("offset is in range")
}

/// Compensation added to source timestamps before comparison.
///
/// The source rounds its last-edited time down to the whole minute, and
/// generation timestamps are recorded in GMT+1 wall-clock time, so a fresh
/// record must beat the source time by an hour and a minute before a page
/// counts as up to date.
pub fn source_skew() -> Duration {
    Duration::hours(1) + Duration::minutes(1)
}

/// Classifies one page against its stored generation timestamp.
///
/// Pure and idempotent: calling it repeatedly for the same inputs yields the
/// same verdict as long as the store is not mutated in between.
pub fn classify(page: &Page, generated_at: Option<DateTime<FixedOffset>>) -> Verdict {
    let Some(generated_at) = generated_at else {
        return Verdict::NotFound;
    };
    let adjusted_source_time = page.last_modified.naive_utc() + source_skew();
    if generated_at.naive_local() < adjusted_source_time {
        Verdict::Update
    } else {
        Verdict::UpToDate
    }
}
