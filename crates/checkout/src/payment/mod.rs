//! Payment provider integration.
//!
//! Checkout talks to the provider in two steps: `create_payment` registers
//! an amount and returns an approval URL the buyer is redirected to, and
//! `capture` settles the approved payment when the buyer comes back.
//!
//! [`PayPalClient`] is the production adapter; [`ScriptedProvider`] answers
//! from a script for tests.

mod paypal;
mod scripted;

pub use paypal::PayPalClient;
pub use scripted::{ScriptedOutcome, ScriptedProvider};

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use marketway_core::Price;

/// Errors that can occur when interacting with the payment provider.
#[derive(Debug, Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body could not be parsed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The provider returned an error status.
    #[error("provider error (HTTP {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Provider error message or body.
        message: String,
    },

    /// Payment was not approved or could not be captured.
    #[error("payment declined: {0}")]
    Declined(String),

    /// The created payment carried no approval link.
    #[error("provider response has no approval link")]
    MissingApprovalLink,

    /// The provider did not answer in time.
    #[error("payment provider timed out")]
    Timeout,
}

/// Amount and redirect targets for a new payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    pub amount: Price,
    /// Where the provider sends the buyer after approval.
    pub return_url: Url,
    /// Where the provider sends the buyer after cancelling.
    pub cancel_url: Url,
    /// Merchant reference shown on the provider side (the session id).
    pub invoice_id: String,
    pub description: String,
}

/// A payment registered with the provider, awaiting buyer approval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedPayment {
    /// Provider-side reference; comes back as the `token` on return.
    pub reference: String,
    pub approval_url: String,
}

/// Result of a capture attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// `true` if funds were captured.
    pub success: bool,
    /// Provider id of the capture, recorded on every order.
    pub provider_order_id: Option<String>,
    /// Provider status string, kept for failure reasons.
    pub status: String,
}

/// External payment provider.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Register a payment and obtain the buyer approval URL.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError` if the provider rejects the request or is
    /// unreachable.
    async fn create_payment(
        &self,
        request: &PaymentRequest,
    ) -> Result<CreatedPayment, PaymentError>;

    /// Capture an approved payment.
    ///
    /// A declined payment is `Ok` with `success == false`; `Err` means the
    /// outcome is unknown.
    async fn capture(&self, reference: &str) -> Result<Capture, PaymentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_error_display() {
        let err = PaymentError::Api {
            status: 422,
            message: "UNPROCESSABLE_ENTITY".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "provider error (HTTP 422): UNPROCESSABLE_ENTITY"
        );
        assert_eq!(
            PaymentError::Timeout.to_string(),
            "payment provider timed out"
        );
    }
}
