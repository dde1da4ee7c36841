//! Cart store and catalog collaborators.
//!
//! The cart is a keyed store (`CartId -> [CartLine]`); every operation takes
//! the cart identity explicitly. Prices are resolved through a [`Catalog`]
//! when a line is added, never looked up dynamically afterwards.

mod memory;

use async_trait::async_trait;

use marketway_core::{CartId, CartLineId, VariationId};

use crate::db::RepositoryError;
use crate::models::{CartLine, CatalogEntry};

pub use memory::{MemoryCartStore, MemoryCatalog};

/// Storage for in-progress carts.
#[async_trait]
pub trait CartStore: Send + Sync {
    /// Current lines of a cart, in insertion order. Unknown carts are empty.
    async fn content_of(&self, cart: CartId) -> Result<Vec<CartLine>, RepositoryError>;

    /// Add a line. A line for the same variation is merged by summing
    /// quantities; the resulting line is returned.
    async fn add(&self, cart: CartId, line: CartLine) -> Result<CartLine, RepositoryError>;

    /// Set a line's quantity. Zero deletes the line and returns `None`.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::NotFound` if the line does not exist.
    async fn update(
        &self,
        cart: CartId,
        line: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError>;

    /// Delete a line. Returns `false` if it did not exist.
    async fn remove(&self, cart: CartId, line: CartLineId) -> Result<bool, RepositoryError>;

    /// Take purchased units out of the cart: each line's quantity is
    /// reduced by the given amount and the line is deleted once it reaches
    /// zero. Units merged into a line after it was purchased stay. Ids that
    /// are not present are ignored.
    async fn remove_lines(
        &self,
        cart: CartId,
        purchased: &[(CartLineId, u32)],
    ) -> Result<(), RepositoryError>;

    /// Whether the cart has no lines.
    async fn is_empty(&self, cart: CartId) -> Result<bool, RepositoryError> {
        Ok(self.content_of(cart).await?.is_empty())
    }
}

/// Resolves a product variation to its current catalog data.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// `None` if the variation does not exist or is no longer sold.
    async fn resolve(
        &self,
        variation: VariationId,
    ) -> Result<Option<CatalogEntry>, RepositoryError>;
}
