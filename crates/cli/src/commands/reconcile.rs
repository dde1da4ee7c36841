//! Reconciliation of paid sessions without orders.
//!
//! A session lands here when the payment was captured but order creation
//! failed afterwards. Running the command again is safe: sessions whose
//! orders already exist just have their flag cleared.

use std::sync::Arc;

use marketway_checkout::services::{OrderMaterializer, ReconcileReport};

use super::{CommandError, connect};

/// Materialize orders for every flagged session.
pub async fn run() -> Result<ReconcileReport, CommandError> {
    let store = Arc::new(connect().await?);
    let materializer = OrderMaterializer::new(store.clone(), store);

    let report = materializer.reconcile_pending().await?;
    tracing::info!(
        reconciled = report.reconciled,
        failed = report.failed,
        "Reconciliation finished"
    );
    Ok(report)
}
