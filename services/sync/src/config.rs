//! services/sync/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The
//! `.env` file is used for local development.

use std::path::PathBuf;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub notion_token: String,
    pub root_block_id: String,
    pub openai_api_key: String,
    pub card_model: String,
    pub database_path: PathBuf,
    pub flashcards_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub log_level: Level,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for
    /// development, but this is skipped in test environments to ensure tests
    /// are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        // --- Load Boundary Credentials ---
        let notion_token = std::env::var("NOTION_TOKEN")
            .map_err(|_| ConfigError::MissingVar("NOTION_TOKEN".to_string()))?;
        let root_block_id = std::env::var("ROOT_BLOCK_ID")
            .map_err(|_| ConfigError::MissingVar("ROOT_BLOCK_ID".to_string()))?;
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;

        // --- Load Adapter-specific Settings ---
        let card_model =
            std::env::var("CARD_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        // --- Load Filesystem Layout ---
        let database_path = std::env::var("DATABASE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./database.db"));
        let flashcards_dir = std::env::var("FLASHCARDS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./flashcards"));
        let staging_dir = std::env::var("STAGING_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./unzipped"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        Ok(Self {
            notion_token,
            root_block_id,
            openai_api_key,
            card_model,
            database_path,
            flashcards_dir,
            staging_dir,
            log_level,
        })
    }
}
