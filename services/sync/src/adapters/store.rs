//! services/sync/src/adapters/store.rs
//!
//! This module contains the timestamp store adapter, the concrete
//! implementation of the `TimestampStore` port from the `core` crate. It
//! persists one row per page in a local SQLite database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use flashforge_core::ports::{PortError, PortResult, TimestampStore};
use sqlx::SqlitePool;

/// A SQLite-backed adapter that implements the `TimestampStore` port.
///
/// `page_id` is the primary key, so repeated inserts for the same page can
/// never produce duplicate records; `upsert` overwrites in place. Every call
/// commits before returning, so a crash mid-rebuild leaves the store
/// describing exactly the pages whose cards were actually generated.
#[derive(Clone)]
pub struct SqliteStoreAdapter {
    pool: SqlitePool,
}

impl SqliteStoreAdapter {
    /// Creates a new `SqliteStoreAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the `flashcards` table if this is a fresh database.
    pub async fn ensure_schema(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS flashcards (
                page_id      TEXT PRIMARY KEY,
                subject      TEXT NOT NULL,
                time_created TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn store_io(e: impl std::fmt::Display) -> PortError {
    PortError::StoreIo(e.to_string())
}

#[async_trait]
impl TimestampStore for SqliteStoreAdapter {
    async fn generated_at(&self, page_id: &str) -> PortResult<Option<DateTime<FixedOffset>>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT time_created FROM flashcards WHERE page_id = ?1")
                .bind(page_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(store_io)?;

        row.map(|(time_created,)| {
            DateTime::parse_from_rfc3339(&time_created).map_err(|e| {
                store_io(format!(
                    "stored timestamp '{time_created}' is not RFC 3339: {e}"
                ))
            })
        })
        .transpose()
    }

    async fn upsert(
        &self,
        page_id: &str,
        subject: &str,
        generated_at: DateTime<FixedOffset>,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO flashcards (page_id, subject, time_created)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(page_id) DO UPDATE SET time_created = excluded.time_created",
        )
        .bind(page_id)
        .bind(subject)
        .bind(generated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(store_io)?;
        Ok(())
    }

    async fn clear_subject(&self, subject: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM flashcards WHERE subject = ?1")
            .bind(subject)
            .execute(&self.pool)
            .await
            .map_err(store_io)?;
        Ok(())
    }

    async fn clear_all(&self) -> PortResult<()> {
        sqlx::query("DELETE FROM flashcards")
            .execute(&self.pool)
            .await
            .map_err(store_io)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flashforge_core::classify::generation_offset;
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

    async fn store_in(dir: &std::path::Path) -> SqliteStoreAdapter {
        let options = SqliteConnectOptions::new()
            .filename(dir.join("database.db"))
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .unwrap();
        let store = SqliteStoreAdapter::new(pool);
        store.ensure_schema().await.unwrap();
        store
    }

    #[tokio::test]
    async fn upsert_then_lookup_round_trips_the_offset() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        let written = Utc::now().with_timezone(&generation_offset());
        store.upsert("pg-1", "Maths", written).await.unwrap();

        let read = store.generated_at("pg-1").await.unwrap().unwrap();
        assert_eq!(read, written);
        assert_eq!(read.offset(), &generation_offset());
    }

    #[tokio::test]
    async fn lookup_of_unknown_page_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;
        assert!(store.generated_at("pg-unknown").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn repeated_upserts_keep_a_single_row_per_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        let first = DateTime::parse_from_rfc3339("2024-01-01T10:00:00+01:00").unwrap();
        let second = DateTime::parse_from_rfc3339("2024-02-01T10:00:00+01:00").unwrap();
        store.upsert("pg-1", "Maths", first).await.unwrap();
        store.upsert("pg-1", "Maths", second).await.unwrap();

        assert_eq!(store.generated_at("pg-1").await.unwrap(), Some(second));
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM flashcards")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn clear_subject_only_touches_that_subject() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_in(dir.path()).await;

        let at = Utc::now().with_timezone(&generation_offset());
        store.upsert("pg-1", "Maths", at).await.unwrap();
        store.upsert("pg-2", "Physics", at).await.unwrap();

        store.clear_subject("Maths").await.unwrap();
        assert!(store.generated_at("pg-1").await.unwrap().is_none());
        assert!(store.generated_at("pg-2").await.unwrap().is_some());

        // Idempotent: clearing again is fine.
        store.clear_subject("Maths").await.unwrap();

        store.clear_all().await.unwrap();
        assert!(store.generated_at("pg-2").await.unwrap().is_none());
    }
}
