//! services/sync/src/adapters/archive.rs
//!
//! This module contains the deck archive adapter, the concrete
//! implementation of the `DeckArchive` port from the `core` crate. A deck is
//! persisted as an Anki package: a zip container wrapping a SQLite
//! collection whose `notes` table holds one row per card, with the question
//! and answer joined by the `\x1f` field separator.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use flashforge_core::domain::{Card, Deck};
use flashforge_core::ports::{DeckArchive, PortError, PortResult};
use serde_json::json;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, SqliteConnection};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const COLLECTION_FILE: &str = "collection.anki2";
/// Anki separates note fields with the ASCII unit separator.
const FIELD_SEPARATOR: char = '\u{1f}';
const MODEL_ID: i64 = 1_607_392_319;

const QUESTION_FORMAT: &str =
    r#"<h1 style="color: #0a7d62; text-align: center; font-weight: bold;">{{Question}}</h1>"#;
const ANSWER_FORMAT: &str =
    r#"{{FrontSide}}<hr id="answer"><p style="font-size: 1.5rem">{{Answer}}</p>"#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `DeckArchive` port over `.apkg` files.
///
/// One artifact per subject lives in `output_dir`; `staging_dir` holds the
/// transient per-subject extraction directory used during recovery reads and
/// collection builds, removed after use.
#[derive(Clone)]
pub struct ApkgArchiveAdapter {
    output_dir: PathBuf,
    staging_dir: PathBuf,
}

fn unreadable(e: impl std::fmt::Display) -> PortError {
    PortError::ArchiveUnreadable(e.to_string())
}

fn unexpected(e: impl std::fmt::Display) -> PortError {
    PortError::Unexpected(e.to_string())
}

impl ApkgArchiveAdapter {
    /// Creates a new `ApkgArchiveAdapter`.
    pub fn new(output_dir: PathBuf, staging_dir: PathBuf) -> Self {
        Self {
            output_dir,
            staging_dir,
        }
    }

    /// The artifact location for a subject.
    pub fn artifact_path(&self, subject: &str) -> PathBuf {
        self.output_dir.join(format!("{subject}.apkg"))
    }

    /// Extracts the collection out of the subject's artifact and reads every
    /// note row in stored order.
    async fn extract_cards(&self, subject: &str, staging: &Path) -> PortResult<Vec<Card>> {
        let file = File::open(self.artifact_path(subject)).map_err(unreadable)?;
        let mut archive = ZipArchive::new(file).map_err(unreadable)?;

        fs::create_dir_all(staging).map_err(unreadable)?;
        let db_path = staging.join(COLLECTION_FILE);
        {
            let mut entry = archive.by_name(COLLECTION_FILE).map_err(unreadable)?;
            let mut out = File::create(&db_path).map_err(unreadable)?;
            std::io::copy(&mut entry, &mut out).map_err(unreadable)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .read_only(true);
        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(unreadable)?;
        let rows: Vec<(String,)> = sqlx::query_as("SELECT flds FROM notes ORDER BY id")
            .fetch_all(&mut conn)
            .await
            .map_err(unreadable)?;
        let _ = conn.close().await;

        rows.into_iter()
            .map(|(flds,)| {
                let mut fields = flds.split(FIELD_SEPARATOR);
                match (fields.next(), fields.next()) {
                    (Some(question), Some(answer)) => Ok(Card {
                        question: question.to_string(),
                        answer: answer.to_string(),
                    }),
                    _ => Err(unreadable("note row with fewer than two fields")),
                }
            })
            .collect()
    }

    /// Builds a minimal Anki collection database holding the deck's cards.
    async fn build_collection(&self, db_path: &Path, deck: &Deck) -> PortResult<()> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            // Keep everything in the single collection file once closed.
            .journal_mode(SqliteJournalMode::Delete);
        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(unexpected)?;

        for statement in [
            "CREATE TABLE col (
                id INTEGER PRIMARY KEY, crt INTEGER, mod INTEGER, scm INTEGER,
                ver INTEGER, dty INTEGER, usn INTEGER, ls INTEGER,
                conf TEXT, models TEXT, decks TEXT, dconf TEXT, tags TEXT
            )",
            "CREATE TABLE notes (
                id INTEGER PRIMARY KEY, guid TEXT, mid INTEGER, mod INTEGER,
                usn INTEGER, tags TEXT, flds TEXT, sfld TEXT,
                csum INTEGER, flags INTEGER, data TEXT
            )",
            "CREATE TABLE cards (
                id INTEGER PRIMARY KEY, nid INTEGER, did INTEGER, ord INTEGER,
                mod INTEGER, usn INTEGER, type INTEGER, queue INTEGER,
                due INTEGER, ivl INTEGER, factor INTEGER, reps INTEGER,
                lapses INTEGER, left INTEGER, odue INTEGER, odid INTEGER,
                flags INTEGER, data TEXT
            )",
        ] {
            sqlx::query(statement)
                .execute(&mut conn)
                .await
                .map_err(unexpected)?;
        }

        let now = Utc::now().timestamp();
        let models = json!({
            (MODEL_ID.to_string()): {
                "id": MODEL_ID,
                "name": "FlashCard Model",
                "type": 0,
                "did": deck.deck_id,
                "flds": [
                    { "name": "Question", "ord": 0 },
                    { "name": "Answer", "ord": 1 }
                ],
                "tmpls": [
                    { "name": "Card 1", "ord": 0, "qfmt": QUESTION_FORMAT, "afmt": ANSWER_FORMAT }
                ],
                "css": ""
            }
        });
        let decks = json!({
            (deck.deck_id.to_string()): { "id": deck.deck_id, "name": deck.subject }
        });

        sqlx::query(
            "INSERT INTO col (id, crt, mod, scm, ver, dty, usn, ls, conf, models, decks, dconf, tags)
             VALUES (1, ?1, ?1, ?1, 11, 0, 0, 0, '{}', ?2, ?3, '{}', '{}')",
        )
        .bind(now)
        .bind(models.to_string())
        .bind(decks.to_string())
        .execute(&mut conn)
        .await
        .map_err(unexpected)?;

        for (index, card) in deck.cards.iter().enumerate() {
            let note_id = index as i64 + 1;
            let flds = format!("{}{}{}", card.question, FIELD_SEPARATOR, card.answer);
            sqlx::query(
                "INSERT INTO notes (id, guid, mid, mod, usn, tags, flds, sfld, csum, flags, data)
                 VALUES (?1, ?2, ?3, ?4, 0, '', ?5, ?6, 0, 0, '')",
            )
            .bind(note_id)
            .bind(format!("{}-{}", deck.deck_id, note_id))
            .bind(MODEL_ID)
            .bind(now)
            .bind(&flds)
            .bind(&card.question)
            .execute(&mut conn)
            .await
            .map_err(unexpected)?;

            sqlx::query(
                "INSERT INTO cards (id, nid, did, ord, mod, usn, type, queue, due, ivl,
                                    factor, reps, lapses, left, odue, odid, flags, data)
                 VALUES (?1, ?1, ?2, 0, ?3, 0, 0, 0, ?1, 0, 0, 0, 0, 0, 0, 0, 0, '')",
            )
            .bind(note_id)
            .bind(deck.deck_id)
            .bind(now)
            .execute(&mut conn)
            .await
            .map_err(unexpected)?;
        }

        conn.close().await.map_err(unexpected)?;
        Ok(())
    }
}

//=========================================================================================
// `DeckArchive` Trait Implementation
//=========================================================================================

#[async_trait]
impl DeckArchive for ApkgArchiveAdapter {
    async fn is_present(&self, subject: &str) -> PortResult<bool> {
        Ok(self.artifact_path(subject).exists())
    }

    async fn read_existing(&self, subject: &str) -> PortResult<Vec<Card>> {
        let staging = self.staging_dir.join(subject);
        let result = self.extract_cards(subject, &staging).await;
        // The staging directory is transient; remove it whether or not the
        // extraction succeeded.
        if staging.exists() {
            let _ = fs::remove_dir_all(&staging);
        }
        result
    }

    async fn write(&self, deck: &Deck) -> PortResult<()> {
        fs::create_dir_all(&self.output_dir).map_err(unexpected)?;
        let staging = self.staging_dir.join(&deck.subject);
        fs::create_dir_all(&staging).map_err(unexpected)?;

        let db_path = staging.join(COLLECTION_FILE);
        if db_path.exists() {
            fs::remove_file(&db_path).map_err(unexpected)?;
        }
        let built = self.build_collection(&db_path, deck).await;

        let zipped = built.and_then(|()| {
            let final_path = self.artifact_path(&deck.subject);
            let tmp_path = final_path.with_extension("apkg.tmp");
            {
                let file = File::create(&tmp_path).map_err(unexpected)?;
                let mut zip = ZipWriter::new(file);
                let options =
                    SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

                zip.start_file(COLLECTION_FILE, options).map_err(unexpected)?;
                let collection_bytes = fs::read(&db_path).map_err(unexpected)?;
                zip.write_all(&collection_bytes).map_err(unexpected)?;

                // Empty media manifest; card text needs no attachments.
                zip.start_file("media", options).map_err(unexpected)?;
                zip.write_all(b"{}").map_err(unexpected)?;
                zip.finish().map_err(unexpected)?;
            }
            // The old artifact is never touched until the replacement is
            // fully written.
            fs::rename(&tmp_path, &final_path).map_err(unexpected)
        });

        let _ = fs::remove_dir_all(&staging);
        zipped
    }
}
