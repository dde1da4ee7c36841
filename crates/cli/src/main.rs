//! Marketway CLI - Checkout database and operations tooling.
//!
//! # Usage
//!
//! ```bash
//! # Run checkout database migrations
//! mw-cli migrate
//!
//! # Retry order creation for paid sessions flagged for reconciliation
//! mw-cli reconcile
//!
//! # Show a checkout session and its orders as JSON
//! mw-cli session show 7f9c2a4e-1b2d-4c3e-9f10-0a1b2c3d4e5f
//! ```
//!
//! # Commands
//!
//! - `migrate` - Run database migrations
//! - `reconcile` - Materialize orders for paid sessions that are missing them
//! - `session show` - Inspect a checkout session

#![cfg_attr(not(test), forbid(unsafe_code))]

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "mw-cli")]
#[command(author, version, about = "Marketway checkout CLI tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run checkout database migrations
    Migrate,
    /// Create missing orders for paid sessions flagged for reconciliation
    Reconcile,
    /// Inspect checkout sessions
    Session {
        #[command(subcommand)]
        action: SessionAction,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    /// Print a session and its orders as JSON
    Show {
        /// Checkout session ID (UUID)
        id: String,
    },
    /// List failed sessions whose payment was captured and needs a refund
    Refunds,
}

/// Initialize Sentry when `SENTRY_DSN` is set; the guard must outlive `main`.
fn init_sentry() -> Option<sentry::ClientInitGuard> {
    let dsn = std::env::var("SENTRY_DSN").ok().filter(|v| !v.is_empty())?;

    let guard = sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: std::env::var("SENTRY_ENVIRONMENT")
                .ok()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// WARN/ERROR become Sentry events, INFO/DEBUG breadcrumbs.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let _sentry_guard = init_sentry();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "marketway_checkout=info,mw_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    let cli = Cli::parse();

    let result: Result<(), Box<dyn std::error::Error>> = run(cli).await;

    if let Err(e) = result {
        tracing::error!("Command failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Migrate => commands::migrate::run().await?,
        Commands::Reconcile => {
            let report = commands::reconcile::run().await?;
            if report.failed > 0 {
                return Err(format!("{} session(s) still need reconciliation", report.failed).into());
            }
        }
        Commands::Session { action } => match action {
            SessionAction::Show { id } => commands::session::show(&id).await?,
            SessionAction::Refunds => commands::session::refunds().await?,
        },
    }
    Ok(())
}
