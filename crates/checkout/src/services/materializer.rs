//! Order materialization: one order per seller for a paid session.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, info, instrument, warn};

use marketway_core::{CheckoutSessionId, OrderId, OrderStatus};

use crate::db::{OrderRepository, RepositoryError, SessionRepository};
use crate::error::{CheckoutError, Result};
use crate::models::{CheckoutSession, Order, OrderLine};

/// Counts from one reconciliation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Sessions whose orders now exist.
    pub reconciled: usize,
    /// Sessions still flagged.
    pub failed: usize,
}

/// Creates orders from a paid session's snapshot.
#[derive(Clone)]
pub struct OrderMaterializer {
    orders: Arc<dyn OrderRepository>,
    sessions: Arc<dyn SessionRepository>,
}

impl OrderMaterializer {
    #[must_use]
    pub fn new(orders: Arc<dyn OrderRepository>, sessions: Arc<dyn SessionRepository>) -> Self {
        Self { orders, sessions }
    }

    /// Create and persist one order per seller group of the snapshot.
    ///
    /// All orders of a session are written in one atomic insert.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::AlreadyMaterialized` if the session already
    /// has orders; a second call is a caller bug and writes nothing.
    #[instrument(skip(self, session), fields(session_id = %session.id))]
    pub async fn materialize(
        &self,
        session: &CheckoutSession,
        provider_order_id: Option<&str>,
    ) -> Result<Vec<Order>> {
        if !self.orders.orders_for_session(session.id).await?.is_empty() {
            return Err(CheckoutError::AlreadyMaterialized(session.id));
        }

        let orders = build_orders(session, provider_order_id);
        match self.orders.insert_for_session(session.id, &orders).await {
            Ok(()) => {}
            Err(RepositoryError::Conflict(_)) => {
                return Err(CheckoutError::AlreadyMaterialized(session.id));
            }
            Err(e) => return Err(e.into()),
        }

        info!(order_count = orders.len(), "Orders materialized");
        Ok(orders)
    }

    /// Orders already created for a session.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the lookup fails.
    pub async fn orders_for(&self, session: CheckoutSessionId) -> Result<Vec<Order>> {
        Ok(self.orders.orders_for_session(session).await?)
    }

    /// Retry materialization for every paid session flagged for
    /// reconciliation, clearing the flag on success.
    ///
    /// Reconciled orders carry the provider reference, since the capture id
    /// was lost with the failed attempt.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` if the flagged sessions cannot be
    /// listed. Per-session failures are logged and counted instead.
    #[instrument(skip(self))]
    pub async fn reconcile_pending(&self) -> Result<ReconcileReport> {
        let pending = self.sessions.list_reconciliation_required().await?;
        let mut report = ReconcileReport::default();

        for session in pending {
            let outcome = match self
                .materialize(&session, session.provider_reference.as_deref())
                .await
            {
                Ok(orders) => {
                    info!(session_id = %session.id, order_count = orders.len(), "Session reconciled");
                    Ok(())
                }
                Err(CheckoutError::AlreadyMaterialized(_)) => {
                    warn!(session_id = %session.id, "Orders already present, clearing flag");
                    Ok(())
                }
                Err(e) => Err(e),
            };

            let cleared = match outcome {
                Ok(()) => self
                    .sessions
                    .set_reconciliation_required(session.id, false)
                    .await
                    .map_err(CheckoutError::from),
                Err(e) => Err(e),
            };

            match cleared {
                Ok(()) => report.reconciled += 1,
                Err(e) => {
                    error!(session_id = %session.id, error = %e, "Reconciliation failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// One order per seller group, lines and totals copied from the snapshot.
#[must_use]
pub fn build_orders(session: &CheckoutSession, provider_order_id: Option<&str>) -> Vec<Order> {
    let created_at = Utc::now();

    session
        .snapshot
        .groups
        .iter()
        .map(|group| Order {
            id: OrderId::generate(),
            checkout_session_id: session.id,
            seller_id: group.seller_id,
            seller_name: group.seller_name.clone(),
            buyer_email: session.buyer_email.clone(),
            lines: group.lines.iter().map(OrderLine::from).collect(),
            subtotal: group.subtotal,
            tax: group.tax,
            shipping_cost: group.shipping_cost,
            total: group.total,
            currency: session.snapshot.currency,
            status: OrderStatus::Placed,
            provider_order_id: provider_order_id.map(str::to_owned),
            created_at,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use marketway_core::{CartId, CheckoutStatus, CurrencyCode, Email, SellerId, UserId, VariationId};

    use super::*;
    use crate::db::MemoryStore;
    use crate::models::{Buyer, CartLine, CatalogEntry, PricedCart, SellerGroup};

    fn group(seller: i32, cents: i64) -> SellerGroup {
        let line = CartLine::from_catalog(
            VariationId::new(seller),
            1,
            CatalogEntry {
                name: "Print".to_string(),
                unit_price: Decimal::new(cents, 2),
                seller_id: SellerId::new(seller),
                seller_name: format!("Studio {seller}"),
            },
        );
        SellerGroup {
            seller_id: line.seller_id,
            seller_name: line.seller_name.clone(),
            subtotal: line.line_total(),
            tax: Decimal::ZERO,
            shipping_cost: Decimal::ZERO,
            total: line.line_total(),
            lines: vec![line],
        }
    }

    async fn paid_session(store: &MemoryStore) -> CheckoutSession {
        let buyer = Buyer {
            id: UserId::new(3),
            email: Email::parse("grace@example.com").unwrap(),
        };
        let snapshot =
            PricedCart::from_groups(CurrencyCode::USD, vec![group(1, 3_000), group(2, 1_250)]);
        let mut session = CheckoutSession::new(&buyer, CartId::generate(), snapshot);
        store.insert(&session).await.unwrap();
        store
            .mark_awaiting_payment(session.id, "REF-9", "https://pay/9")
            .await
            .unwrap();
        store
            .transition(
                session.id,
                CheckoutStatus::AwaitingPayment,
                CheckoutStatus::Paid,
                None,
            )
            .await
            .unwrap();
        session.status = CheckoutStatus::Paid;
        session.provider_reference = Some("REF-9".to_string());
        session
    }

    fn materializer(store: &Arc<MemoryStore>) -> OrderMaterializer {
        OrderMaterializer::new(store.clone(), store.clone())
    }

    #[tokio::test]
    async fn test_one_order_per_seller() {
        let store = Arc::new(MemoryStore::new());
        let session = paid_session(&store).await;

        let orders = materializer(&store)
            .materialize(&session, Some("CAP-1"))
            .await
            .unwrap();

        assert_eq!(orders.len(), 2);
        assert_eq!(orders[0].total, Decimal::new(3_000, 2));
        assert_eq!(orders[1].total, Decimal::new(1_250, 2));
        assert!(orders.iter().all(|o| o.provider_order_id.as_deref() == Some("CAP-1")));
        assert_eq!(
            store.get(session.id).await.unwrap().unwrap().order_ids,
            orders.iter().map(|o| o.id).collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_second_materialize_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let session = paid_session(&store).await;
        let materializer = materializer(&store);

        materializer.materialize(&session, None).await.unwrap();
        assert!(matches!(
            materializer.materialize(&session, None).await,
            Err(CheckoutError::AlreadyMaterialized(id)) if id == session.id
        ));
        assert_eq!(store.order_count().await, 2);
    }

    #[tokio::test]
    async fn test_reconcile_clears_flag() {
        let store = Arc::new(MemoryStore::new());
        let session = paid_session(&store).await;
        store
            .set_reconciliation_required(session.id, true)
            .await
            .unwrap();

        let report = materializer(&store).reconcile_pending().await.unwrap();
        assert_eq!(report, ReconcileReport { reconciled: 1, failed: 0 });

        let stored = store.get(session.id).await.unwrap().unwrap();
        assert!(!stored.reconciliation_required);
        assert_eq!(stored.order_ids.len(), 2);

        let orders = store.orders_for_session(session.id).await.unwrap();
        assert!(orders.iter().all(|o| o.provider_order_id.as_deref() == Some("REF-9")));
    }
}
