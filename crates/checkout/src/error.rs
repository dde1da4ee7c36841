//! Checkout error taxonomy.
//!
//! Precondition failures ([`CheckoutError::EmptyCart`],
//! [`CheckoutError::AddressIncomplete`]) are not hard failures: the calling
//! layer asks [`CheckoutError::remediation`] where to send the buyer.
//! Everything else surfaces as an explicit failure outcome.

use thiserror::Error;

use marketway_core::{CartId, CartLineId, CheckoutSessionId, VariationId};

use crate::db::RepositoryError;
use crate::payment::PaymentError;

/// Why an address does not pass the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressProblem {
    /// No address on file.
    #[error("no delivery address on file")]
    Missing,
    /// The country requires a state/region and none was given.
    #[error("a state or region is required for {country}")]
    MissingState {
        /// Country that requires the region.
        country: String,
    },
    /// Required form fields were blank.
    #[error("missing fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),
}

/// Where the buyer should be sent to fix a precondition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Remediation {
    /// Back to the cart page.
    Cart,
    /// To the delivery address form.
    DeliveryAddress,
}

/// Errors produced by checkout operations.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// The cart has no lines.
    #[error("cart {0} is empty")]
    EmptyCart(CartId),

    /// Delivery address is missing or incomplete.
    #[error("address incomplete: {0}")]
    AddressIncomplete(#[from] AddressProblem),

    /// The payment provider failed or timed out.
    #[error("payment provider unavailable: {0}")]
    ProviderUnavailable(#[source] PaymentError),

    /// No session matches the provider reference.
    #[error("no checkout session for provider reference {0}")]
    SessionNotFound(String),

    /// Orders already exist for this session.
    #[error("orders already materialized for session {0}")]
    AlreadyMaterialized(CheckoutSessionId),

    /// The provider captured a payment for a session that had already been
    /// closed; the buyer must be refunded.
    #[error("payment captured for closed session {0}, refund required")]
    CapturedAfterClose(CheckoutSessionId),

    /// An open session already exists for this cart and the policy rejects
    /// a second one.
    #[error("checkout already in progress for this cart (session {0})")]
    DuplicateSubmission(CheckoutSessionId),

    /// Quantity must be positive.
    #[error("quantity must be at least 1")]
    InvalidQuantity,

    /// The catalog does not know the variation.
    #[error("unknown product variation {0}")]
    UnknownVariation(VariationId),

    /// The cart has no such line.
    #[error("cart line {0} not found")]
    LineNotFound(CartLineId),

    /// Persistence failed.
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
}

impl CheckoutError {
    /// The remediation step for precondition errors, `None` otherwise.
    #[must_use]
    pub const fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::EmptyCart(_) => Some(Remediation::Cart),
            Self::AddressIncomplete(_) => Some(Remediation::DeliveryAddress),
            _ => None,
        }
    }
}

/// Result type alias for `CheckoutError`.
pub type Result<T> = std::result::Result<T, CheckoutError>;
