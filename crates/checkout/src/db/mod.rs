//! Persistence for addresses, checkout sessions and orders.
//!
//! # Database: `marketway_checkout`
//!
//! ## Tables (schema `checkout`)
//!
//! - `address` - Delivery addresses
//! - `user_address` - 1:1 link from user to address, written once
//! - `session` - Checkout sessions, cart snapshot as JSONB
//! - `order` - Per-seller orders, line items as JSONB
//!
//! # Migrations
//!
//! Migrations are stored in `crates/checkout/migrations/` and run via:
//! ```bash
//! cargo run -p marketway-cli -- migrate
//! ```
//!
//! # Transitions
//!
//! Session status changes are compare-and-swap updates: the `from` status is
//! part of the `WHERE` clause and a `false` return means another caller
//! moved the session first.

mod memory;
mod postgres;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use marketway_core::{AddressId, CartId, CheckoutSessionId, CheckoutStatus, UserId};

use crate::models::{Address, AddressFields, CheckoutSession, Order};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., second open session for a cart).
    #[error("constraint violation: {0}")]
    Conflict(String),
}

/// Delivery address storage (one address per user).
#[async_trait]
pub trait AddressRepository: Send + Sync {
    /// The user's address, if one was ever saved.
    async fn address_for_user(&self, user: UserId) -> Result<Option<Address>, RepositoryError>;

    /// Create an address and link it to the user.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the user already has one.
    async fn create_for_user(
        &self,
        user: UserId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError>;

    /// Overwrite an existing address in place.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the address does not exist.
    async fn update(
        &self,
        id: AddressId,
        fields: &AddressFields,
    ) -> Result<Address, RepositoryError>;
}

/// Checkout session storage.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Persist a new session.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the cart already has an open
    /// (`Created` or `AwaitingPayment`) session.
    async fn insert(&self, session: &CheckoutSession) -> Result<(), RepositoryError>;

    async fn get(
        &self,
        id: CheckoutSessionId,
    ) -> Result<Option<CheckoutSession>, RepositoryError>;

    async fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> Result<Option<CheckoutSession>, RepositoryError>;

    /// The cart's `Created` or `AwaitingPayment` session, if any.
    async fn find_open_for_cart(
        &self,
        cart: CartId,
    ) -> Result<Option<CheckoutSession>, RepositoryError>;

    /// `Created -> AwaitingPayment`, recording the provider reference and
    /// approval URL in the same write.
    async fn mark_awaiting_payment(
        &self,
        id: CheckoutSessionId,
        reference: &str,
        approval_url: &str,
    ) -> Result<bool, RepositoryError>;

    /// Compare-and-swap `from -> to`, optionally recording a failure reason.
    async fn transition(
        &self,
        id: CheckoutSessionId,
        from: CheckoutStatus,
        to: CheckoutStatus,
        failure_reason: Option<&str>,
    ) -> Result<bool, RepositoryError>;

    /// Set or clear the reconciliation flag.
    async fn set_reconciliation_required(
        &self,
        id: CheckoutSessionId,
        required: bool,
    ) -> Result<(), RepositoryError>;

    /// Paid sessions whose orders still need to be materialized.
    async fn list_reconciliation_required(
        &self,
    ) -> Result<Vec<CheckoutSession>, RepositoryError>;

    /// Failed sessions whose payment was captured regardless and needs a
    /// refund.
    async fn list_refund_required(&self) -> Result<Vec<CheckoutSession>, RepositoryError>;
}

/// Order storage.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert every order of one session atomically.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Conflict` if the session already has orders;
    /// nothing is written in that case.
    async fn insert_for_session(
        &self,
        session: CheckoutSessionId,
        orders: &[Order],
    ) -> Result<(), RepositoryError>;

    /// Orders of a session, ordered by seller.
    async fn orders_for_session(
        &self,
        session: CheckoutSessionId,
    ) -> Result<Vec<Order>, RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}
