//! Checkout session: the durable record of one attempt to pay for a cart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marketway_core::{CartId, CheckoutSessionId, CheckoutStatus, Email, OrderId, UserId};

use super::address::Buyer;
use super::cart::PricedCart;
use super::order::Order;

/// A checkout session.
///
/// The snapshot is a deep copy of the priced cart taken at creation and is
/// never modified afterwards, so cart edits cannot change an in-flight
/// payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: CheckoutSessionId,
    pub user_id: UserId,
    pub buyer_email: Email,
    /// Cart the snapshot was taken from (used for double-submit detection).
    pub cart_id: CartId,
    pub snapshot: PricedCart,
    pub status: CheckoutStatus,
    /// Payment provider's reference, set on the move to `AwaitingPayment`.
    pub provider_reference: Option<String>,
    /// Where the buyer approves the payment.
    pub approval_url: Option<String>,
    /// Why the session failed, if it did.
    pub failure_reason: Option<String>,
    /// Needs operator attention. On a `Paid` session the orders were not
    /// materialized; on a `Failed` one the payment was captured anyway and
    /// must be refunded.
    pub reconciliation_required: bool,
    /// Orders created from this session (non-owning).
    pub order_ids: Vec<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CheckoutSession {
    /// Start a new session in `Created` from a priced cart snapshot.
    #[must_use]
    pub fn new(buyer: &Buyer, cart_id: CartId, snapshot: PricedCart) -> Self {
        let now = Utc::now();
        Self {
            id: CheckoutSessionId::generate(),
            user_id: buyer.id,
            buyer_email: buyer.email.clone(),
            cart_id,
            snapshot,
            status: CheckoutStatus::Created,
            provider_reference: None,
            approval_url: None,
            failure_reason: None,
            reconciliation_required: false,
            order_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// `true` once the session reached `Paid`.
    #[must_use]
    pub fn is_paid(&self) -> bool {
        self.status == CheckoutStatus::Paid
    }

    /// `true` while the session can still move forward.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        !self.status.is_terminal()
    }

    /// `true` for a session still in `Created` after `max_age`: the process
    /// that inserted it never obtained a payment reference.
    #[must_use]
    pub fn is_abandoned(&self, now: DateTime<Utc>, max_age: std::time::Duration) -> bool {
        self.status == CheckoutStatus::Created
            && chrono::Duration::from_std(max_age)
                .is_ok_and(|max_age| now.signed_duration_since(self.created_at) > max_age)
    }
}

/// Result of [`crate::services::CheckoutSessionManager::create`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutStarted {
    pub session: CheckoutSession,
    /// Redirect target for the buyer.
    pub approval_url: String,
    /// `true` when an already-open session for the same cart was returned.
    pub reused: bool,
}

/// Query parameters the payment provider appends to the return URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConfirmPayload {
    /// Provider reference of the approved payment.
    pub token: String,
    /// Payer identifier, informational only.
    #[serde(rename = "PayerID", default)]
    pub payer_id: Option<String>,
}

impl ConfirmPayload {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            payer_id: None,
        }
    }
}

/// Result of [`crate::services::CheckoutSessionManager::confirm`]: the
/// session in its resolved state plus the orders attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutOutcome {
    pub session: CheckoutSession,
    pub orders: Vec<Order>,
}
