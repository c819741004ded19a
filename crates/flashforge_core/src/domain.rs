//! crates/flashforge_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};

/// How many cards the generator produces for every page.
///
/// Positional recovery of unchanged cards from a previous deck artifact
/// partitions the stored card list into contiguous groups of this size, so
/// the count must stay fixed across runs.
pub const CARDS_PER_PAGE: usize = 3;

/// One source document (e.g. a lecture) belonging to a subject.
///
/// Immutable for the duration of a run once read from the document tree.
#[derive(Debug, Clone)]
pub struct Page {
    /// Opaque identifier, stable across time.
    pub id: String,
    pub title: String,
    /// Last-modified instant as reported by the source, truncated to the
    /// minute upstream.
    pub last_modified: DateTime<Utc>,
    /// Position of this page among its subject's pages, in document order.
    pub ordinal: usize,
}

/// A single question/answer pair. Cards have no identity beyond their
/// position within a deck.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Card {
    pub question: String,
    pub answer: String,
}

/// The full, ordered card sequence for one subject. Rebuilt from scratch on
/// every rebuild pass; never the authority on staleness.
#[derive(Debug, Clone)]
pub struct Deck {
    pub deck_id: i64,
    pub subject: String,
    pub cards: Vec<Card>,
}

/// Staleness verdict for a (page, stored timestamp) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No generation record exists for the page.
    NotFound,
    /// A record exists but the source was edited after the cards were made.
    Update,
    /// The stored cards are no older than the latest source edit.
    UpToDate,
}

/// What happened to one subject during a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectOutcome {
    /// Every page was up to date; nothing was generated or written.
    Skipped,
    /// A new deck artifact was written.
    Rebuilt,
    /// The rebuild was abandoned because a generation reply was malformed.
    Aborted,
}

/// Run-level rollup across all subjects.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub rebuilt: Vec<String>,
    pub skipped: Vec<String>,
    pub aborted: Vec<String>,
}

impl RunSummary {
    pub fn record(&mut self, subject: &str, outcome: SubjectOutcome) {
        let bucket = match outcome {
            SubjectOutcome::Rebuilt => &mut self.rebuilt,
            SubjectOutcome::Skipped => &mut self.skipped,
            SubjectOutcome::Aborted => &mut self.aborted,
        };
        bucket.push(subject.to_string());
    }

    /// Whether this run wrote at least one deck artifact.
    pub fn any_artifact_changed(&self) -> bool {
        !self.rebuilt.is_empty()
    }
}
