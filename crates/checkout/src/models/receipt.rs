//! Success / failure summary handed to the presentation layer.

use serde::Serialize;

use super::session::CheckoutOutcome;

/// Which page the buyer should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptOutcome {
    Success,
    Failed,
}

/// Display data for the checkout result page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutReceipt {
    pub outcome: ReceiptOutcome,
    pub email: Option<String>,
    pub order_count: usize,
    pub seller_name: Option<String>,
}

impl CheckoutReceipt {
    /// Receipt for a confirmation that could not be matched to any session.
    #[must_use]
    pub const fn failed() -> Self {
        Self {
            outcome: ReceiptOutcome::Failed,
            email: None,
            order_count: 0,
            seller_name: None,
        }
    }

    /// Build the receipt for a resolved session.
    ///
    /// A session that is paid but still waiting on reconciliation reports
    /// success with zero orders: the buyer has been charged and the orders
    /// will follow.
    #[must_use]
    pub fn from_outcome(outcome: &CheckoutOutcome) -> Self {
        if !outcome.session.is_paid() {
            return Self::failed();
        }

        let first = outcome.orders.first();
        Self {
            outcome: ReceiptOutcome::Success,
            email: Some(outcome.session.buyer_email.to_string()),
            order_count: outcome.orders.len(),
            seller_name: first.map(|o| o.seller_name.clone()),
        }
    }
}
