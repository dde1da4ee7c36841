//! Tax and shipping quotes.

use rust_decimal::{Decimal, RoundingStrategy};

use crate::config::PricingSettings;
use crate::models::{Address, CartLine};

/// Tax and shipping for one group of lines shipped together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quote {
    pub tax: Decimal,
    pub shipping_cost: Decimal,
}

/// Pricing/shipping calculator.
///
/// Called once per seller group. `address` is `None` while the buyer is
/// still shopping (cart page estimates); checkout always passes the gated
/// delivery address.
pub trait PricingCalculator: Send + Sync {
    /// Quote tax and shipping for `lines` delivered to `address`.
    fn quote(&self, lines: &[CartLine], address: Option<&Address>) -> Quote;
}

/// Single tax rate on the subtotal plus a flat shipping charge per group.
///
/// Shipping is only charged once a delivery address is known.
#[derive(Debug, Clone, Default)]
pub struct FlatRatePricing {
    tax_rate: Decimal,
    shipping_flat: Decimal,
}

impl FlatRatePricing {
    #[must_use]
    pub const fn new(tax_rate: Decimal, shipping_flat: Decimal) -> Self {
        Self {
            tax_rate,
            shipping_flat,
        }
    }

    #[must_use]
    pub const fn from_settings(settings: &PricingSettings) -> Self {
        Self::new(settings.tax_rate, settings.shipping_flat)
    }
}

impl PricingCalculator for FlatRatePricing {
    fn quote(&self, lines: &[CartLine], address: Option<&Address>) -> Quote {
        let subtotal: Decimal = lines.iter().map(CartLine::line_total).sum();
        let tax = (subtotal * self.tax_rate)
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        let shipping_cost = if address.is_some() && !lines.is_empty() {
            self.shipping_flat
        } else {
            Decimal::ZERO
        };

        Quote { tax, shipping_cost }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use marketway_core::{AddressId, SellerId, UserId, VariationId};

    use super::*;
    use crate::models::CatalogEntry;

    fn line(quantity: u32, cents: i64) -> CartLine {
        CartLine::from_catalog(
            VariationId::new(1),
            quantity,
            CatalogEntry {
                name: "Tote".to_string(),
                unit_price: Decimal::new(cents, 2),
                seller_id: SellerId::new(1),
                seller_name: "Canvas Co".to_string(),
            },
        )
    }

    fn address() -> Address {
        Address {
            id: AddressId::new(1),
            user_id: UserId::new(1),
            full_name: "Ada".to_string(),
            street: "1 Main St".to_string(),
            city: "Portland".to_string(),
            state: Some("OR".to_string()),
            postal_code: "97201".to_string(),
            country: "US".to_string(),
            phone: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_tax_on_subtotal_and_flat_shipping() {
        let pricing = FlatRatePricing::new(Decimal::new(8, 2), Decimal::new(3, 0));
        let quote = pricing.quote(&[line(2, 1_000), line(1, 500)], Some(&address()));

        assert_eq!(quote.tax, Decimal::new(200, 2));
        assert_eq!(quote.shipping_cost, Decimal::new(3, 0));
    }

    #[test]
    fn test_no_shipping_without_address() {
        let pricing = FlatRatePricing::new(Decimal::new(8, 2), Decimal::new(3, 0));
        let quote = pricing.quote(&[line(1, 1_000)], None);

        assert_eq!(quote.tax, Decimal::new(80, 2));
        assert_eq!(quote.shipping_cost, Decimal::ZERO);
    }

    #[test]
    fn test_tax_rounds_to_cents() {
        let pricing = FlatRatePricing::new(Decimal::new(13, 2), Decimal::ZERO);
        // 9.99 * 0.13 = 1.2987
        let quote = pricing.quote(&[line(1, 999)], None);
        assert_eq!(quote.tax, Decimal::new(130, 2));
    }
}
