//! Status enums for checkout sessions and orders.

use core::fmt;
use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// Lifecycle of a checkout session.
///
/// ```text
/// Created -> AwaitingPayment -> Paid
///    |              |
///    +--> Failed <--+
/// ```
///
/// `Paid` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "checkout.session_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum CheckoutStatus {
    #[default]
    Created,
    AwaitingPayment,
    Paid,
    Failed,
}

impl CheckoutStatus {
    /// Whether no further transition is permitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Paid | Self::Failed)
    }

    /// Whether `self -> next` is a forward edge of the state machine.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::AwaitingPayment | Self::Failed)
                | (Self::AwaitingPayment, Self::Paid | Self::Failed)
        )
    }

    /// Snake-case name, matching the database enum labels.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::AwaitingPayment => "awaiting_payment",
            Self::Paid => "paid",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CheckoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CheckoutStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "awaiting_payment" => Ok(Self::AwaitingPayment),
            "paid" => Ok(Self::Paid),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid checkout status: {s}")),
        }
    }
}

/// Order fulfillment status.
///
/// Orders are immutable after creation apart from this field, which is
/// owned by the fulfillment side of the marketplace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "postgres", derive(sqlx::Type))]
#[cfg_attr(
    feature = "postgres",
    sqlx(type_name = "checkout.order_status", rename_all = "snake_case")
)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[default]
    Placed,
    Fulfilled,
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions_only() {
        use CheckoutStatus::{AwaitingPayment, Created, Failed, Paid};

        assert!(Created.can_transition_to(AwaitingPayment));
        assert!(Created.can_transition_to(Failed));
        assert!(AwaitingPayment.can_transition_to(Paid));
        assert!(AwaitingPayment.can_transition_to(Failed));

        assert!(!Created.can_transition_to(Paid));
        assert!(!AwaitingPayment.can_transition_to(Created));
        assert!(!Paid.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(AwaitingPayment));
    }

    #[test]
    fn test_terminal_states() {
        assert!(CheckoutStatus::Paid.is_terminal());
        assert!(CheckoutStatus::Failed.is_terminal());
        assert!(!CheckoutStatus::Created.is_terminal());
        assert!(!CheckoutStatus::AwaitingPayment.is_terminal());
    }

    #[test]
    fn test_status_string_roundtrip() {
        for status in [
            CheckoutStatus::Created,
            CheckoutStatus::AwaitingPayment,
            CheckoutStatus::Paid,
            CheckoutStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<CheckoutStatus>(), Ok(status));
        }
        assert!("pending".parse::<CheckoutStatus>().is_err());
    }
}
