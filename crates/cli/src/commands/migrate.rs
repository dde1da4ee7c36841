//! Database migration command.
//!
//! # Usage
//!
//! ```bash
//! mw-cli migrate
//! ```
//!
//! # Environment Variables
//!
//! - `CHECKOUT_DATABASE_URL` - `PostgreSQL` connection string (falls back to
//!   `DATABASE_URL`)
//!
//! # Migration Files
//!
//! Checkout migrations: `crates/checkout/migrations/`

use super::{CommandError, connect};

/// Run checkout database migrations.
pub async fn run() -> Result<(), CommandError> {
    let store = connect().await?;

    tracing::info!("Running checkout migrations...");
    sqlx::migrate!("../checkout/migrations")
        .run(store.pool())
        .await?;

    tracing::info!("Checkout migrations complete!");
    Ok(())
}
