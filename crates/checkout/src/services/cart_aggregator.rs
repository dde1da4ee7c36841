//! Cart pricing and mutations.
//!
//! Pricing is a pure function of the cart store's current lines: lines are
//! grouped by seller, each group is quoted by the [`PricingCalculator`] and
//! the cart totals are the sums of the group totals.

use std::collections::BTreeMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{debug, instrument};

use marketway_core::{CartId, CartLineId, CurrencyCode, SellerId, VariationId};

use crate::cart::{CartStore, Catalog};
use crate::db::RepositoryError;
use crate::error::{CheckoutError, Result};
use crate::models::{Address, CartLine, CartSummary, PricedCart, SellerGroup};
use crate::pricing::PricingCalculator;

/// Prices carts and applies buyer edits to them.
#[derive(Clone)]
pub struct CartAggregator {
    store: Arc<dyn CartStore>,
    catalog: Arc<dyn Catalog>,
    pricing: Arc<dyn PricingCalculator>,
    currency: CurrencyCode,
}

impl CartAggregator {
    #[must_use]
    pub fn new(
        store: Arc<dyn CartStore>,
        catalog: Arc<dyn Catalog>,
        pricing: Arc<dyn PricingCalculator>,
        currency: CurrencyCode,
    ) -> Self {
        Self {
            store,
            catalog,
            pricing,
            currency,
        }
    }

    /// The cart store this aggregator reads from.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn CartStore> {
        &self.store
    }

    #[must_use]
    pub const fn currency(&self) -> CurrencyCode {
        self.currency
    }

    /// Price the cart, grouped by seller.
    ///
    /// `address` is the gated delivery address at checkout, or `None` for a
    /// cart-page estimate.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::EmptyCart` if the cart has no lines.
    #[instrument(skip(self, address), fields(cart_id = %cart))]
    pub async fn price_cart(&self, cart: CartId, address: Option<&Address>) -> Result<PricedCart> {
        let lines = self.store.content_of(cart).await?;
        if lines.is_empty() {
            return Err(CheckoutError::EmptyCart(cart));
        }

        Ok(self.price_lines(lines, address))
    }

    /// Display totals for the cart page. Empty carts yield zeros.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the cart store fails.
    pub async fn summary(&self, cart: CartId) -> Result<CartSummary> {
        match self.price_cart(cart, None).await {
            Ok(priced) => Ok(summarize(&priced)),
            Err(CheckoutError::EmptyCart(_)) => Ok(CartSummary::empty(self.currency)),
            Err(e) => Err(e),
        }
    }

    /// Add `quantity` units of a variation, merging with an existing line.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::InvalidQuantity` for zero and
    /// `CheckoutError::UnknownVariation` if the catalog cannot resolve it.
    #[instrument(skip(self), fields(cart_id = %cart, variation_id = %variation))]
    pub async fn add_item(
        &self,
        cart: CartId,
        variation: VariationId,
        quantity: u32,
    ) -> Result<CartSummary> {
        if quantity == 0 {
            return Err(CheckoutError::InvalidQuantity);
        }

        let entry = self
            .catalog
            .resolve(variation)
            .await?
            .ok_or(CheckoutError::UnknownVariation(variation))?;

        let line = self
            .store
            .add(cart, CartLine::from_catalog(variation, quantity, entry))
            .await?;
        debug!(line_id = %line.id, quantity = line.quantity, "Cart line added");

        self.summary(cart).await
    }

    /// Set a line's quantity; zero removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::LineNotFound` if the line is not in the cart.
    #[instrument(skip(self), fields(cart_id = %cart, line_id = %line))]
    pub async fn update_item(
        &self,
        cart: CartId,
        line: CartLineId,
        quantity: u32,
    ) -> Result<CartSummary> {
        match self.store.update(cart, line, quantity).await {
            Ok(Some(_)) => debug!(quantity, "Cart line updated"),
            Ok(None) => debug!("Cart line removed by zero quantity"),
            Err(RepositoryError::NotFound) => return Err(CheckoutError::LineNotFound(line)),
            Err(e) => return Err(e.into()),
        }

        self.summary(cart).await
    }

    /// Remove a line.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::LineNotFound` if the line is not in the cart.
    #[instrument(skip(self), fields(cart_id = %cart, line_id = %line))]
    pub async fn remove_item(&self, cart: CartId, line: CartLineId) -> Result<CartSummary> {
        if !self.store.remove(cart, line).await? {
            return Err(CheckoutError::LineNotFound(line));
        }

        self.summary(cart).await
    }

    fn price_lines(&self, lines: Vec<CartLine>, address: Option<&Address>) -> PricedCart {
        let mut by_seller: BTreeMap<SellerId, Vec<CartLine>> = BTreeMap::new();
        for line in lines {
            by_seller.entry(line.seller_id).or_default().push(line);
        }

        let groups = by_seller
            .into_values()
            .filter_map(|lines| self.price_group(lines, address))
            .collect();

        PricedCart::from_groups(self.currency, groups)
    }

    fn price_group(&self, lines: Vec<CartLine>, address: Option<&Address>) -> Option<SellerGroup> {
        let first = lines.first()?;
        let seller_id = first.seller_id;
        let seller_name = first.seller_name.clone();

        let subtotal: Decimal = lines.iter().map(CartLine::line_total).sum();
        let quote = self.pricing.quote(&lines, address);

        Some(SellerGroup {
            seller_id,
            seller_name,
            subtotal,
            tax: quote.tax,
            shipping_cost: quote.shipping_cost,
            total: subtotal + quote.tax + quote.shipping_cost,
            lines,
        })
    }
}

fn summarize(priced: &PricedCart) -> CartSummary {
    CartSummary {
        count: priced.item_count(),
        subtotal: priced.subtotal,
        tax: priced.tax,
        total: priced.total,
        currency: priced.currency,
    }
}
