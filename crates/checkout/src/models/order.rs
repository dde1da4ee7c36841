//! Orders created from a paid checkout session.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use marketway_core::{
    CheckoutSessionId, CurrencyCode, Email, OrderId, OrderStatus, SellerId, VariationId,
};

use super::cart::CartLine;

/// A line item copied onto an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub variation_id: VariationId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Decimal,
    pub line_total: Decimal,
}

impl From<&CartLine> for OrderLine {
    fn from(line: &CartLine) -> Self {
        Self {
            variation_id: line.variation_id,
            name: line.name.clone(),
            quantity: line.quantity,
            unit_price: line.unit_price,
            line_total: line.line_total(),
        }
    }
}

/// An immutable per-seller order.
///
/// Only `status` changes after creation, and only by fulfillment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub checkout_session_id: CheckoutSessionId,
    pub seller_id: SellerId,
    pub seller_name: String,
    pub buyer_email: Email,
    pub lines: Vec<OrderLine>,
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub shipping_cost: Decimal,
    pub total: Decimal,
    pub currency: CurrencyCode,
    pub status: OrderStatus,
    /// Capture identifier returned by the payment provider.
    pub provider_order_id: Option<String>,
    pub created_at: DateTime<Utc>,
}
