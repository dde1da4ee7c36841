//! CLI subcommands.

pub mod migrate;
pub mod reconcile;
pub mod session;

use marketway_checkout::config::{CheckoutConfig, ConfigError};
use marketway_checkout::db::{PgStore, RepositoryError, create_pool};
use thiserror::Error;

/// Errors shared by the database-backed commands.
#[derive(Debug, Error)]
pub enum CommandError {
    /// Configuration is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Database connection error.
    #[error("Database connection error: {0}")]
    Database(#[from] sqlx::Error),

    /// Migration failed.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Repository query failed.
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Checkout operation failed.
    #[error("Checkout error: {0}")]
    Checkout(#[from] marketway_checkout::CheckoutError),

    /// Invalid session ID.
    #[error("Invalid session ID: {0}")]
    InvalidId(String),

    /// No session with this ID.
    #[error("Checkout session not found: {0}")]
    NotFound(String),

    /// Output could not be rendered.
    #[error("Output error: {0}")]
    Output(#[from] serde_json::Error),
}

/// Connect to the checkout database.
async fn connect() -> Result<PgStore, CommandError> {
    let database_url = CheckoutConfig::database_url_from_env()?;

    tracing::info!("Connecting to checkout database...");
    let pool = create_pool(&database_url).await?;
    Ok(PgStore::new(pool))
}
