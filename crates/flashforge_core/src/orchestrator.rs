//! crates/flashforge_core/src/orchestrator.rs
//!
//! Drives the per-subject rebuild decision: classify every page, skip the
//! subject when nothing changed, and otherwise assemble a full replacement
//! deck from recovered and freshly generated cards.

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use tracing::{error, info, warn};

use crate::classify::{classify, generation_offset};
use crate::domain::{Card, Deck, Page, RunSummary, SubjectOutcome, Verdict, CARDS_PER_PAGE};
use crate::ports::{
    BlockKind, CardGenerationService, DeckArchive, DocumentTreeService, PortError, PortResult,
    TimestampStore,
};

/// Owns handles to every boundary service and runs the sync end to end.
///
/// Execution is strictly sequential: subjects one at a time, pages within a
/// subject one at a time, in document order. Positional card recovery
/// depends on that ordering.
pub struct Orchestrator {
    store: Arc<dyn TimestampStore>,
    tree: Arc<dyn DocumentTreeService>,
    generator: Arc<dyn CardGenerationService>,
    archive: Arc<dyn DeckArchive>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TimestampStore>,
        tree: Arc<dyn DocumentTreeService>,
        generator: Arc<dyn CardGenerationService>,
        archive: Arc<dyn DeckArchive>,
    ) -> Self {
        Self {
            store,
            tree,
            generator,
            archive,
        }
    }

    /// Syncs every subject under the root container.
    ///
    /// A malformed generation reply abandons only the affected subject;
    /// store and source failures abort the whole run because staleness can
    /// no longer be decided reliably.
    pub async fn run(&self, root_id: &str) -> PortResult<RunSummary> {
        let mut summary = RunSummary::default();
        let subjects = self
            .tree
            .list_children(root_id)
            .await?
            .into_iter()
            .filter(|child| child.kind == BlockKind::ChildPage);

        for subject in subjects {
            info!(subject = %subject.title, "syncing subject");
            match self.sync_subject(&subject.title, &subject.id).await {
                Ok(outcome) => summary.record(&subject.title, outcome),
                Err(PortError::GenerationFormat(reason)) => {
                    error!(subject = %subject.title, %reason, "rebuild aborted: malformed generation reply");
                    summary.record(&subject.title, SubjectOutcome::Aborted);
                }
                Err(fatal) => return Err(fatal),
            }
        }
        Ok(summary)
    }

    /// Runs the per-subject state machine: scanning, then either skipped or
    /// rebuilding/finalized.
    async fn sync_subject(&self, subject: &str, container_id: &str) -> PortResult<SubjectOutcome> {
        // If the user removed the artifact out-of-band, the stored records
        // have no backing deck; drop them so every page regenerates instead
        // of spuriously classifying up to date.
        if !self.archive.is_present(subject).await? {
            self.store.clear_subject(subject).await?;
        }

        // scanning: classify every page exactly once.
        let pages = self.list_pages(container_id).await?;
        let mut classified = Vec::with_capacity(pages.len());
        for page in pages {
            let generated_at = self.store.generated_at(&page.id).await?;
            let verdict = classify(&page, generated_at);
            classified.push((page, verdict));
        }

        if classified.iter().all(|(_, v)| *v == Verdict::UpToDate) {
            info!(subject, "every page is up to date, skipping");
            return Ok(SubjectOutcome::Skipped);
        }

        // rebuilding: recover the previous artifact only if some page still
        // classifies up to date. An unreadable artifact degrades to zero
        // recoverable cards rather than aborting the subject.
        let recovered = if classified.iter().any(|(_, v)| *v == Verdict::UpToDate) {
            match self.archive.read_existing(subject).await {
                Ok(cards) => cards,
                Err(PortError::ArchiveUnreadable(reason)) => {
                    warn!(subject, %reason, "previous deck unreadable, regenerating all pages");
                    Vec::new()
                }
                Err(other) => return Err(other),
            }
        } else {
            Vec::new()
        };

        let mut cards = Vec::with_capacity(classified.len() * CARDS_PER_PAGE);
        for (page, verdict) in &classified {
            match verdict {
                Verdict::NotFound => {
                    cards.extend(self.generate_page(page, subject).await?);
                    info!(subject, page = %page.title, "flashcards created");
                }
                Verdict::Update => {
                    cards.extend(self.generate_page(page, subject).await?);
                    info!(subject, page = %page.title, "flashcards updated");
                }
                Verdict::UpToDate => {
                    let start = page.ordinal * CARDS_PER_PAGE;
                    match recovered.get(start..start + CARDS_PER_PAGE) {
                        Some(group) => {
                            cards.extend_from_slice(group);
                            info!(subject, page = %page.title, "flashcards up to date");
                        }
                        None => {
                            // The previous deck was unreadable or shorter
                            // than expected; regenerate instead of dropping
                            // the page from the new deck.
                            cards.extend(self.generate_page(page, subject).await?);
                            info!(subject, page = %page.title, "flashcards regenerated");
                        }
                    }
                }
            }
        }

        // finalized: write the complete replacement deck.
        let deck = Deck {
            deck_id: deck_id_for(subject),
            subject: subject.to_string(),
            cards,
        };
        self.archive.write(&deck).await?;
        info!(subject, cards = deck.cards.len(), "deck rebuilt");
        Ok(SubjectOutcome::Rebuilt)
    }

    /// Lists a subject's pages in document order, assigning ordinals.
    async fn list_pages(&self, container_id: &str) -> PortResult<Vec<Page>> {
        let pages = self
            .tree
            .list_children(container_id)
            .await?
            .into_iter()
            .filter(|child| child.kind == BlockKind::ChildPage)
            .enumerate()
            .map(|(ordinal, child)| Page {
                id: child.id,
                title: child.title,
                last_modified: child.last_modified,
                ordinal,
            })
            .collect();
        Ok(pages)
    }

    /// Exports, generates and records one page's cards.
    async fn generate_page(&self, page: &Page, subject: &str) -> PortResult<Vec<Card>> {
        let content = self.tree.export_as_text(&page.id).await?;
        // Literal code fences confuse the generator's own fenced output.
        let content = content.replace("```", "");
        let fresh = self.generator.generate_cards(&content).await?;
        self.store
            .upsert(&page.id, subject, self.generation_now())
            .await?;
        Ok(fresh)
    }

    /// The instant recorded for a generation, in the store's fixed offset.
    fn generation_now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&generation_offset())
    }
}

/// Stable per-subject deck identifier (FNV-1a of the subject name).
fn deck_id_for(subject: &str) -> i64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in subject.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    (hash & 0x7fff_ffff_ffff_ffff) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::ChildBlock;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::Mutex;

    //=====================================================================================
    // In-memory mock ports
    //=====================================================================================

    #[derive(Default)]
    struct MockStore {
        records: Mutex<HashMap<String, (String, DateTime<FixedOffset>)>>,
        upserts: Mutex<usize>,
        cleared_subjects: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TimestampStore for MockStore {
        async fn generated_at(&self, page_id: &str) -> PortResult<Option<DateTime<FixedOffset>>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .get(page_id)
                .map(|(_, at)| *at))
        }

        async fn upsert(
            &self,
            page_id: &str,
            subject: &str,
            generated_at: DateTime<FixedOffset>,
        ) -> PortResult<()> {
            *self.upserts.lock().unwrap() += 1;
            self.records
                .lock()
                .unwrap()
                .insert(page_id.to_string(), (subject.to_string(), generated_at));
            Ok(())
        }

        async fn clear_subject(&self, subject: &str) -> PortResult<()> {
            self.cleared_subjects
                .lock()
                .unwrap()
                .push(subject.to_string());
            self.records
                .lock()
                .unwrap()
                .retain(|_, (s, _)| s.as_str() != subject);
            Ok(())
        }

        async fn clear_all(&self) -> PortResult<()> {
            self.records.lock().unwrap().clear();
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockTree {
        children: HashMap<String, Vec<ChildBlock>>,
        content: HashMap<String, String>,
    }

    #[async_trait]
    impl DocumentTreeService for MockTree {
        async fn list_children(&self, container_id: &str) -> PortResult<Vec<ChildBlock>> {
            Ok(self.children.get(container_id).cloned().unwrap_or_default())
        }

        async fn export_as_text(&self, page_id: &str) -> PortResult<String> {
            Ok(self.content.get(page_id).cloned().unwrap_or_default())
        }
    }

    #[derive(Default)]
    struct MockGenerator {
        calls: Mutex<usize>,
        fail_with_format_error: bool,
    }

    #[async_trait]
    impl CardGenerationService for MockGenerator {
        async fn generate_cards(&self, content: &str) -> PortResult<Vec<Card>> {
            *self.calls.lock().unwrap() += 1;
            if self.fail_with_format_error {
                return Err(PortError::GenerationFormat("2 items, expected 3".into()));
            }
            Ok((0..CARDS_PER_PAGE)
                .map(|n| Card {
                    question: format!("Q{n}: {content}"),
                    answer: format!("A{n}: {content}"),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct MockArchive {
        decks: Mutex<HashMap<String, Vec<Card>>>,
        writes: Mutex<usize>,
        unreadable: bool,
    }

    #[async_trait]
    impl DeckArchive for MockArchive {
        async fn is_present(&self, subject: &str) -> PortResult<bool> {
            Ok(self.decks.lock().unwrap().contains_key(subject))
        }

        async fn read_existing(&self, subject: &str) -> PortResult<Vec<Card>> {
            if self.unreadable {
                return Err(PortError::ArchiveUnreadable("corrupt zip".into()));
            }
            self.decks
                .lock()
                .unwrap()
                .get(subject)
                .cloned()
                .ok_or_else(|| PortError::ArchiveUnreadable("no artifact".into()))
        }

        async fn write(&self, deck: &Deck) -> PortResult<()> {
            *self.writes.lock().unwrap() += 1;
            self.decks
                .lock()
                .unwrap()
                .insert(deck.subject.clone(), deck.cards.clone());
            Ok(())
        }
    }

    //=====================================================================================
    // Test fixture
    //=====================================================================================

    const ROOT: &str = "root";

    fn child_page(id: &str, title: &str, last_modified: DateTime<Utc>) -> ChildBlock {
        ChildBlock {
            id: id.to_string(),
            title: title.to_string(),
            last_modified,
            kind: BlockKind::ChildPage,
        }
    }

    /// A source edit far enough in the past that any record written "now"
    /// classifies the page up to date.
    fn old_edit() -> DateTime<Utc> {
        Utc::now() - Duration::days(30)
    }

    /// One subject ("Maths") with two pages.
    fn tree_with_two_pages(last_modified: DateTime<Utc>) -> MockTree {
        let mut tree = MockTree::default();
        tree.children.insert(
            ROOT.to_string(),
            vec![child_page("sub-maths", "Maths", last_modified)],
        );
        tree.children.insert(
            "sub-maths".to_string(),
            vec![
                child_page("pg-1", "Limits", last_modified),
                child_page("pg-2", "Derivatives", last_modified),
            ],
        );
        tree.content
            .insert("pg-1".to_string(), "limits content".to_string());
        tree.content
            .insert("pg-2".to_string(), "derivatives content".to_string());
        tree
    }

    fn fresh_record() -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&generation_offset())
    }

    struct Fixture {
        store: Arc<MockStore>,
        generator: Arc<MockGenerator>,
        archive: Arc<MockArchive>,
        orchestrator: Orchestrator,
    }

    fn fixture(tree: MockTree, store: MockStore, generator: MockGenerator, archive: MockArchive) -> Fixture {
        let store = Arc::new(store);
        let generator = Arc::new(generator);
        let archive = Arc::new(archive);
        let orchestrator = Orchestrator::new(
            store.clone(),
            Arc::new(tree),
            generator.clone(),
            archive.clone(),
        );
        Fixture {
            store,
            generator,
            archive,
            orchestrator,
        }
    }

    fn seed_records(store: &MockStore, subject: &str, page_ids: &[&str]) {
        let mut records = store.records.lock().unwrap();
        for id in page_ids {
            records.insert(id.to_string(), (subject.to_string(), fresh_record()));
        }
    }

    fn seed_deck(archive: &MockArchive, subject: &str, pages: usize) -> Vec<Card> {
        let cards: Vec<Card> = (0..pages * CARDS_PER_PAGE)
            .map(|n| Card {
                question: format!("old question {n}"),
                answer: format!("old answer {n}"),
            })
            .collect();
        archive
            .decks
            .lock()
            .unwrap()
            .insert(subject.to_string(), cards.clone());
        cards
    }

    //=====================================================================================
    // Tests
    //=====================================================================================

    #[tokio::test]
    async fn up_to_date_subject_is_skipped_without_side_effects() {
        let store = MockStore::default();
        seed_records(&store, "Maths", &["pg-1", "pg-2"]);
        let archive = MockArchive::default();
        seed_deck(&archive, "Maths", 2);

        let f = fixture(
            tree_with_two_pages(old_edit()),
            store,
            MockGenerator::default(),
            archive,
        );
        let summary = f.orchestrator.run(ROOT).await.unwrap();

        assert_eq!(summary.skipped, vec!["Maths".to_string()]);
        assert!(!summary.any_artifact_changed());
        assert_eq!(*f.generator.calls.lock().unwrap(), 0);
        assert_eq!(*f.archive.writes.lock().unwrap(), 0);
        assert_eq!(*f.store.upserts.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_pages_are_generated_and_recorded() {
        let f = fixture(
            tree_with_two_pages(old_edit()),
            MockStore::default(),
            MockGenerator::default(),
            MockArchive::default(),
        );
        let summary = f.orchestrator.run(ROOT).await.unwrap();

        assert_eq!(summary.rebuilt, vec!["Maths".to_string()]);
        assert_eq!(*f.generator.calls.lock().unwrap(), 2);
        let written = f.archive.decks.lock().unwrap().get("Maths").cloned().unwrap();
        assert_eq!(written.len(), 2 * CARDS_PER_PAGE);
        assert_eq!(f.store.records.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn unchanged_pages_reuse_cards_from_the_previous_artifact() {
        // pg-1 up to date, pg-2 never generated.
        let store = MockStore::default();
        seed_records(&store, "Maths", &["pg-1"]);
        let archive = MockArchive::default();
        let old_cards = seed_deck(&archive, "Maths", 2);

        let f = fixture(
            tree_with_two_pages(old_edit()),
            store,
            MockGenerator::default(),
            archive,
        );
        f.orchestrator.run(ROOT).await.unwrap();

        let written = f.archive.decks.lock().unwrap().get("Maths").cloned().unwrap();
        // Recovery fidelity: the up-to-date page's group is carried over
        // verbatim, in its original position.
        assert_eq!(&written[..CARDS_PER_PAGE], &old_cards[..CARDS_PER_PAGE]);
        // Only the missing page hits the generator.
        assert_eq!(*f.generator.calls.lock().unwrap(), 1);
        assert!(written[CARDS_PER_PAGE].question.contains("derivatives"));
    }

    #[tokio::test]
    async fn second_run_with_no_source_changes_is_a_no_op() {
        let f = fixture(
            tree_with_two_pages(old_edit()),
            MockStore::default(),
            MockGenerator::default(),
            MockArchive::default(),
        );

        let first = f.orchestrator.run(ROOT).await.unwrap();
        assert_eq!(first.rebuilt, vec!["Maths".to_string()]);
        let calls_after_first = *f.generator.calls.lock().unwrap();

        let second = f.orchestrator.run(ROOT).await.unwrap();
        assert_eq!(second.skipped, vec!["Maths".to_string()]);
        assert!(!second.any_artifact_changed());
        assert_eq!(*f.generator.calls.lock().unwrap(), calls_after_first);
        assert_eq!(*f.archive.writes.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn deleted_artifact_resets_the_subject() {
        // Records exist but the artifact is gone: stale records must be
        // cleared and every page regenerated.
        let store = MockStore::default();
        seed_records(&store, "Maths", &["pg-1", "pg-2"]);

        let f = fixture(
            tree_with_two_pages(old_edit()),
            store,
            MockGenerator::default(),
            MockArchive::default(),
        );
        let summary = f.orchestrator.run(ROOT).await.unwrap();

        assert_eq!(
            *f.store.cleared_subjects.lock().unwrap(),
            vec!["Maths".to_string()]
        );
        assert_eq!(summary.rebuilt, vec!["Maths".to_string()]);
        assert_eq!(*f.generator.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn edited_page_is_regenerated_while_others_are_recovered() {
        let store = MockStore::default();
        seed_records(&store, "Maths", &["pg-1", "pg-2"]);
        // pg-2's record predates the source edit by more than the skew.
        store.records.lock().unwrap().insert(
            "pg-2".to_string(),
            (
                "Maths".to_string(),
                DateTime::parse_from_rfc3339("2020-01-01T10:00:00+01:00").unwrap(),
            ),
        );
        let archive = MockArchive::default();
        let old_cards = seed_deck(&archive, "Maths", 2);

        let f = fixture(
            tree_with_two_pages(old_edit()),
            store,
            MockGenerator::default(),
            archive,
        );
        f.orchestrator.run(ROOT).await.unwrap();

        let written = f.archive.decks.lock().unwrap().get("Maths").cloned().unwrap();
        assert_eq!(&written[..CARDS_PER_PAGE], &old_cards[..CARDS_PER_PAGE]);
        assert_ne!(&written[CARDS_PER_PAGE..], &old_cards[CARDS_PER_PAGE..]);
        assert_eq!(*f.generator.calls.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn unreadable_artifact_forces_regeneration_of_recovered_pages() {
        let store = MockStore::default();
        seed_records(&store, "Maths", &["pg-1"]);
        let archive = MockArchive {
            unreadable: true,
            ..MockArchive::default()
        };
        // Present but corrupt.
        seed_deck(&archive, "Maths", 2);

        let f = fixture(
            tree_with_two_pages(old_edit()),
            store,
            MockGenerator::default(),
            archive,
        );
        let summary = f.orchestrator.run(ROOT).await.unwrap();

        // pg-2 was missing anyway; pg-1's group could not be recovered, so
        // both pages go through the generator.
        assert_eq!(summary.rebuilt, vec!["Maths".to_string()]);
        assert_eq!(*f.generator.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn malformed_generation_reply_aborts_only_that_subject() {
        let f = fixture(
            tree_with_two_pages(old_edit()),
            MockStore::default(),
            MockGenerator {
                fail_with_format_error: true,
                ..MockGenerator::default()
            },
            MockArchive::default(),
        );
        let summary = f.orchestrator.run(ROOT).await.unwrap();

        assert_eq!(summary.aborted, vec!["Maths".to_string()]);
        assert!(summary.rebuilt.is_empty());
        assert_eq!(*f.archive.writes.lock().unwrap(), 0);
    }

    #[test]
    fn deck_ids_are_stable_and_positive() {
        assert_eq!(deck_id_for("Maths"), deck_id_for("Maths"));
        assert_ne!(deck_id_for("Maths"), deck_id_for("Physics"));
        assert!(deck_id_for("Maths") > 0);
    }
}
