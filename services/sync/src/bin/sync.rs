//! services/sync/src/bin/sync.rs

use std::path::Path;
use std::sync::Arc;

use async_openai::{config::OpenAIConfig, Client};
use flashforge_core::{ports::TimestampStore, Orchestrator};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sync_lib::{
    adapters::{ApkgArchiveAdapter, NotionTreeAdapter, OpenAiCardAdapter, SqliteStoreAdapter},
    config::Config,
    error::SyncError,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Whether the output directory exists and contains at least one entry.
fn flashcards_dir_populated(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_some(),
        Err(_) => false,
    }
}

#[tokio::main]
async fn main() -> Result<(), SyncError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Config::from_env()?;
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting flashcard sync...");

    // --- 2. Open the Timestamp Store ---
    let options = SqliteConnectOptions::new()
        .filename(&config.database_path)
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    let store = Arc::new(SqliteStoreAdapter::new(pool.clone()));
    store.ensure_schema().await?;

    // If the user removed (or never created) the output directory, no stored
    // record has a backing artifact: resynchronize by clearing everything.
    if !flashcards_dir_populated(&config.flashcards_dir) {
        info!("Output directory missing or empty, resetting the timestamp store.");
        store.clear_all().await?;
    }

    // --- 3. Initialize Boundary Adapters ---
    let tree = Arc::new(NotionTreeAdapter::new(config.notion_token.clone()));
    let openai_client =
        Client::with_config(OpenAIConfig::new().with_api_key(&config.openai_api_key));
    let generator = Arc::new(OpenAiCardAdapter::new(
        openai_client,
        config.card_model.clone(),
    ));
    let archive = Arc::new(ApkgArchiveAdapter::new(
        config.flashcards_dir.clone(),
        config.staging_dir.clone(),
    ));

    // --- 4. Run the Sync ---
    let orchestrator = Orchestrator::new(store, tree, generator, archive);
    let summary = orchestrator.run(&config.root_block_id).await?;

    // --- 5. Report the Outcome ---
    for subject in &summary.aborted {
        warn!(%subject, "deck left unchanged: generation reply was malformed");
    }
    if summary.any_artifact_changed() {
        info!(
            rebuilt = summary.rebuilt.len(),
            skipped = summary.skipped.len(),
            "Finished: new decks written to {}",
            config.flashcards_dir.display()
        );
    } else {
        info!("Finished: every deck is already up to date.");
    }

    pool.close().await;
    Ok(())
}
