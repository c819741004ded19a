//! crates/flashforge_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the
//! core to be independent of specific external implementations like Notion,
//! the generation LLM, or the on-disk deck archives.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};

use crate::domain::{Card, Deck};

//=========================================================================================
// Port Error and Result Types
//=========================================================================================

/// Error type shared by all port operations.
///
/// Variants carry the recovery policy: `GenerationFormat` aborts one
/// subject's rebuild, `ArchiveUnreadable` degrades to "no recoverable
/// cards", and `StoreIo`/`Source` are fatal for the whole run.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("generation reply did not match the expected card shape: {0}")]
    GenerationFormat(String),
    #[error("previous deck artifact could not be read: {0}")]
    ArchiveUnreadable(String),
    #[error("timestamp store failure: {0}")]
    StoreIo(String),
    #[error("source document service failure: {0}")]
    Source(String),
    #[error("an unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Block kinds returned by the document tree. Only child pages carry
/// exportable content; everything else is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    ChildPage,
    Other,
}

/// One child entry of a container block in the document tree.
#[derive(Debug, Clone)]
pub struct ChildBlock {
    pub id: String,
    pub title: String,
    pub last_modified: DateTime<Utc>,
    pub kind: BlockKind,
}

/// Read access to the external document tree (subjects and their pages).
#[async_trait]
pub trait DocumentTreeService: Send + Sync {
    /// Lists the direct children of a container block, in document order.
    async fn list_children(&self, container_id: &str) -> PortResult<Vec<ChildBlock>>;

    /// Exports a page's content as plain text.
    async fn export_as_text(&self, page_id: &str) -> PortResult<String>;
}

/// The external question/answer generation service.
#[async_trait]
pub trait CardGenerationService: Send + Sync {
    /// Generates exactly [`crate::domain::CARDS_PER_PAGE`] cards from a
    /// page's exported content, or fails with
    /// [`PortError::GenerationFormat`].
    async fn generate_cards(&self, content: &str) -> PortResult<Vec<Card>>;
}

/// The persistent page-id -> generation-time index. The single source of
/// truth for "do we have cards for this page and when were they made".
#[async_trait]
pub trait TimestampStore: Send + Sync {
    /// Returns the stored generation timestamp for a page, or `None`.
    async fn generated_at(&self, page_id: &str) -> PortResult<Option<DateTime<FixedOffset>>>;

    /// Inserts or overwrites the record for `page_id`. Must durably commit
    /// before returning.
    async fn upsert(
        &self,
        page_id: &str,
        subject: &str,
        generated_at: DateTime<FixedOffset>,
    ) -> PortResult<()>;

    /// Deletes all records for a subject. Idempotent.
    async fn clear_subject(&self, subject: &str) -> PortResult<()>;

    /// Deletes every record. Used at startup to resynchronize when the
    /// artifact directory is absent or empty.
    async fn clear_all(&self) -> PortResult<()>;
}

/// Read/write access to the per-subject deck artifacts.
#[async_trait]
pub trait DeckArchive: Send + Sync {
    /// Whether an artifact currently exists for the subject.
    async fn is_present(&self, subject: &str) -> PortResult<bool>;

    /// Extracts all stored cards from the subject's existing artifact, in
    /// stored order.
    async fn read_existing(&self, subject: &str) -> PortResult<Vec<Card>>;

    /// Serializes a complete deck, replacing any prior artifact of the same
    /// name atomically from the caller's perspective.
    async fn write(&self, deck: &Deck) -> PortResult<()>;
}
