pub mod classify;
pub mod domain;
pub mod orchestrator;
pub mod ports;

pub use classify::{classify, generation_offset, source_skew};
pub use domain::{Card, Deck, Page, RunSummary, SubjectOutcome, Verdict, CARDS_PER_PAGE};
pub use orchestrator::Orchestrator;
pub use ports::{
    BlockKind, CardGenerationService, ChildBlock, DeckArchive, DocumentTreeService, PortError,
    PortResult, TimestampStore,
};
