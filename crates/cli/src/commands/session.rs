//! Checkout session inspection.

use std::io::Write;

use marketway_checkout::db::{OrderRepository, SessionRepository};
use marketway_checkout::models::{CheckoutOutcome, CheckoutReceipt};
use marketway_core::CheckoutSessionId;

use super::{CommandError, connect};

/// Print a session, its orders and the receipt the buyer saw, as JSON.
pub async fn show(id: &str) -> Result<(), CommandError> {
    let id: CheckoutSessionId = id
        .parse()
        .map_err(|_| CommandError::InvalidId(id.to_owned()))?;

    let store = connect().await?;
    let session = store
        .get(id)
        .await?
        .ok_or_else(|| CommandError::NotFound(id.to_string()))?;
    let orders = store.orders_for_session(id).await?;

    let outcome = CheckoutOutcome { session, orders };
    let receipt = CheckoutReceipt::from_outcome(&outcome);
    let rendered = serde_json::to_string_pretty(&serde_json::json!({
        "session": outcome.session,
        "orders": outcome.orders,
        "receipt": receipt,
    }))?;

    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}").ok();
    Ok(())
}

/// Print failed sessions flagged for refund, oldest first, as JSON.
pub async fn refunds() -> Result<(), CommandError> {
    let store = connect().await?;
    let sessions = store.list_refund_required().await?;
    tracing::info!(count = sessions.len(), "Sessions awaiting refund");

    let rendered = serde_json::to_string_pretty(&sessions)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{rendered}").ok();
    Ok(())
}
