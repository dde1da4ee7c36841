//! Cart line items and the priced, seller-grouped view derived from them.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use marketway_core::{CartLineId, CurrencyCode, Price, SellerId, VariationId};

/// Catalog data for a product variation, resolved when it is added to a cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    /// Display name of the variation.
    pub name: String,
    /// Current unit price.
    pub unit_price: Decimal,
    /// Seller (shop) offering the variation.
    pub seller_id: SellerId,
    /// Seller display name, shown on receipts.
    pub seller_name: String,
}

/// A single line in a cart.
///
/// `quantity` is always positive; a line updated to zero is deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Line identifier, stable across quantity updates.
    pub id: CartLineId,
    /// Product variation in this line.
    pub variation_id: VariationId,
    /// Variation display name.
    pub name: String,
    /// Number of units.
    pub quantity: u32,
    /// Unit price captured when the line was added.
    pub unit_price: Decimal,
    /// Seller offering the variation.
    pub seller_id: SellerId,
    /// Seller display name.
    pub seller_name: String,
}

impl CartLine {
    /// Build a new line from a catalog entry.
    #[must_use]
    pub fn from_catalog(variation_id: VariationId, quantity: u32, entry: CatalogEntry) -> Self {
        Self {
            id: CartLineId::generate(),
            variation_id,
            name: entry.name,
            quantity,
            unit_price: entry.unit_price,
            seller_id: entry.seller_id,
            seller_name: entry.seller_name,
        }
    }

    /// `unit_price * quantity`.
    #[must_use]
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

/// The lines of one seller within a priced cart, with that seller's totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellerGroup {
    pub seller_id: SellerId,
    pub seller_name: String,
    pub lines: Vec<CartLine>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    /// `subtotal + tax + shipping_cost`.
    pub total: Decimal,
}

/// Read-only priced view of a cart.
///
/// Recomputed on every read and never persisted on its own; a checkout
/// session stores a deep copy as its snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricedCart {
    pub currency: CurrencyCode,
    /// One group per seller, ordered by seller id.
    pub groups: Vec<SellerGroup>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
}

impl PricedCart {
    /// Assemble a priced cart from seller groups, summing the cart totals.
    #[must_use]
    pub fn from_groups(currency: CurrencyCode, groups: Vec<SellerGroup>) -> Self {
        let sum = |f: fn(&SellerGroup) -> Decimal| groups.iter().map(f).sum::<Decimal>();
        let subtotal = sum(|g| g.subtotal);
        let tax = sum(|g| g.tax);
        let shipping_cost = sum(|g| g.shipping_cost);
        let total = sum(|g| g.total);

        Self {
            currency,
            groups,
            subtotal,
            tax,
            shipping_cost,
            total,
        }
    }

    /// All lines across every seller group.
    pub fn lines(&self) -> impl Iterator<Item = &CartLine> {
        self.groups.iter().flat_map(|g| g.lines.iter())
    }

    /// Total number of units in the cart.
    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.lines().map(|l| l.quantity).sum()
    }

    /// Cart total as a [`Price`].
    #[must_use]
    pub const fn total_price(&self) -> Price {
        Price::new(self.total, self.currency)
    }
}

/// Totals returned to the caller after every cart mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartSummary {
    /// Total number of units (not lines).
    pub count: u32,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
}

impl CartSummary {
    /// Summary of an empty cart.
    #[must_use]
    pub const fn empty(currency: CurrencyCode) -> Self {
        Self {
            count: 0,
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
            currency,
        }
    }
}
