//! In-memory cart store and catalog.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use marketway_core::{CartId, CartLineId, VariationId};

use super::{CartStore, Catalog};
use crate::db::RepositoryError;
use crate::models::{CartLine, CatalogEntry};

/// Cart store backed by a map, for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct MemoryCartStore {
    carts: RwLock<HashMap<CartId, Vec<CartLine>>>,
}

impl MemoryCartStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CartStore for MemoryCartStore {
    async fn content_of(&self, cart: CartId) -> Result<Vec<CartLine>, RepositoryError> {
        Ok(self.carts.read().await.get(&cart).cloned().unwrap_or_default())
    }

    async fn add(&self, cart: CartId, line: CartLine) -> Result<CartLine, RepositoryError> {
        let mut carts = self.carts.write().await;
        let lines = carts.entry(cart).or_default();

        if let Some(existing) = lines
            .iter_mut()
            .find(|l| l.variation_id == line.variation_id)
        {
            existing.quantity = existing.quantity.saturating_add(line.quantity);
            return Ok(existing.clone());
        }

        lines.push(line.clone());
        Ok(line)
    }

    async fn update(
        &self,
        cart: CartId,
        line: CartLineId,
        quantity: u32,
    ) -> Result<Option<CartLine>, RepositoryError> {
        let mut carts = self.carts.write().await;
        let lines = carts.get_mut(&cart).ok_or(RepositoryError::NotFound)?;
        let index = lines
            .iter()
            .position(|l| l.id == line)
            .ok_or(RepositoryError::NotFound)?;

        if quantity == 0 {
            lines.remove(index);
            return Ok(None);
        }

        Ok(lines.get_mut(index).map(|l| {
            l.quantity = quantity;
            l.clone()
        }))
    }

    async fn remove(&self, cart: CartId, line: CartLineId) -> Result<bool, RepositoryError> {
        let mut carts = self.carts.write().await;
        let Some(lines) = carts.get_mut(&cart) else {
            return Ok(false);
        };
        let before = lines.len();
        lines.retain(|l| l.id != line);
        Ok(lines.len() != before)
    }

    async fn remove_lines(
        &self,
        cart: CartId,
        purchased: &[(CartLineId, u32)],
    ) -> Result<(), RepositoryError> {
        let mut carts = self.carts.write().await;
        let Some(lines) = carts.get_mut(&cart) else {
            return Ok(());
        };

        for &(id, quantity) in purchased {
            if let Some(line) = lines.iter_mut().find(|l| l.id == id) {
                line.quantity = line.quantity.saturating_sub(quantity);
            }
        }
        lines.retain(|l| l.quantity > 0);
        Ok(())
    }
}

/// Catalog backed by a map.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    entries: RwLock<HashMap<VariationId, CatalogEntry>>,
}

impl MemoryCatalog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a variation.
    pub async fn insert(&self, variation: VariationId, entry: CatalogEntry) {
        self.entries.write().await.insert(variation, entry);
    }
}

#[async_trait]
impl Catalog for MemoryCatalog {
    async fn resolve(
        &self,
        variation: VariationId,
    ) -> Result<Option<CatalogEntry>, RepositoryError> {
        Ok(self.entries.read().await.get(&variation).cloned())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use marketway_core::SellerId;
    use rust_decimal::Decimal;

    use super::*;

    fn line(variation: i32, quantity: u32) -> CartLine {
        CartLine::from_catalog(
            VariationId::new(variation),
            quantity,
            CatalogEntry {
                name: format!("Variation {variation}"),
                unit_price: Decimal::new(1_000, 2),
                seller_id: SellerId::new(1),
                seller_name: "Shop".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_add_merges_same_variation() {
        let store = MemoryCartStore::new();
        let cart = CartId::generate();

        let first = store.add(cart, line(1, 2)).await.unwrap();
        let merged = store.add(cart, line(1, 3)).await.unwrap();

        assert_eq!(merged.id, first.id);
        assert_eq!(merged.quantity, 5);
        assert_eq!(store.content_of(cart).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_to_zero_deletes_line() {
        let store = MemoryCartStore::new();
        let cart = CartId::generate();
        let added = store.add(cart, line(1, 2)).await.unwrap();

        let updated = store.update(cart, added.id, 4).await.unwrap().unwrap();
        assert_eq!(updated.quantity, 4);

        assert!(store.update(cart, added.id, 0).await.unwrap().is_none());
        assert!(store.is_empty(cart).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_unknown_line_is_not_found() {
        let store = MemoryCartStore::new();
        let cart = CartId::generate();
        store.add(cart, line(1, 1)).await.unwrap();

        let result = store.update(cart, CartLineId::generate(), 1).await;
        assert!(matches!(result, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn test_remove_and_remove_lines() {
        let store = MemoryCartStore::new();
        let cart = CartId::generate();
        let a = store.add(cart, line(1, 1)).await.unwrap();
        let b = store.add(cart, line(2, 1)).await.unwrap();
        let c = store.add(cart, line(3, 1)).await.unwrap();

        assert!(store.remove(cart, a.id).await.unwrap());
        assert!(!store.remove(cart, a.id).await.unwrap());

        store.remove_lines(cart, &[(b.id, 1)]).await.unwrap();
        let remaining = store.content_of(cart).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, c.id);
    }

    #[tokio::test]
    async fn test_remove_lines_keeps_units_merged_later() {
        let store = MemoryCartStore::new();
        let cart = CartId::generate();
        let bought = store.add(cart, line(1, 1)).await.unwrap();
        store.add(cart, line(1, 2)).await.unwrap();

        store
            .remove_lines(cart, &[(bought.id, 1), (CartLineId::generate(), 4)])
            .await
            .unwrap();

        let remaining = store.content_of(cart).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, bought.id);
        assert_eq!(remaining[0].quantity, 2);
    }

    #[tokio::test]
    async fn test_catalog_resolve() {
        let catalog = MemoryCatalog::new();
        let entry = line(7, 1);
        catalog
            .insert(
                VariationId::new(7),
                CatalogEntry {
                    name: entry.name.clone(),
                    unit_price: entry.unit_price,
                    seller_id: entry.seller_id,
                    seller_name: entry.seller_name.clone(),
                },
            )
            .await;

        assert!(catalog.resolve(VariationId::new(7)).await.unwrap().is_some());
        assert!(catalog.resolve(VariationId::new(8)).await.unwrap().is_none());
    }
}
