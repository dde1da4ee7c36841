//! Checkout session state machine.
//!
//! ```text
//! Created --> AwaitingPayment --> Paid
//!    |              |
//!    +--> Failed <--+
//! ```
//!
//! `Paid` and `Failed` are terminal. Every transition is a compare-and-swap
//! in the session repository, and confirmations for the same provider
//! reference are additionally serialized in-process by [`SessionLocks`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use marketway_core::{CartId, CartLineId, CheckoutSessionId, CheckoutStatus};

use super::{AddressGate, CartAggregator, OrderMaterializer, SessionLocks};
use crate::config::{CheckoutSettings, DoubleSubmitPolicy};
use crate::db::{RepositoryError, SessionRepository};
use crate::error::{CheckoutError, Result};
use crate::models::{
    Address, Buyer, CheckoutOutcome, CheckoutSession, CheckoutStarted, ConfirmPayload, PricedCart,
};
use crate::payment::{PaymentError, PaymentProvider, PaymentRequest};

/// How long past the provider timeout a `Created` session may linger before
/// it is treated as abandoned.
const CREATED_GRACE: Duration = Duration::from_secs(30);

/// What an open session for the same cart means for a new submit.
enum OpenSession {
    /// Hand this session back.
    Reuse(CheckoutStarted),
    /// The open session was closed; create a new one from the same pricing.
    Replace,
    /// The open session resolved on its own while we waited; the cart may
    /// have lost its purchased units and must be priced again.
    Resolved,
}

/// What the review page shows before the buyer commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckoutPreview {
    pub address: Address,
    pub priced: PricedCart,
}

/// Drives a cart through payment to placed orders.
#[derive(Clone)]
pub struct CheckoutSessionManager {
    carts: CartAggregator,
    gate: AddressGate,
    sessions: Arc<dyn SessionRepository>,
    payments: Arc<dyn PaymentProvider>,
    materializer: OrderMaterializer,
    locks: SessionLocks,
    settings: CheckoutSettings,
}

impl CheckoutSessionManager {
    #[must_use]
    pub fn new(
        carts: CartAggregator,
        gate: AddressGate,
        sessions: Arc<dyn SessionRepository>,
        payments: Arc<dyn PaymentProvider>,
        materializer: OrderMaterializer,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            carts,
            gate,
            sessions,
            payments,
            materializer,
            locks: SessionLocks::new(),
            settings,
        }
    }

    /// Checkout entry: validate the preconditions and price the cart for
    /// review. Nothing is persisted.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::EmptyCart` or `CheckoutError::AddressIncomplete`;
    /// see [`CheckoutError::remediation`].
    #[instrument(skip(self, buyer), fields(user_id = %buyer.id, cart_id = %cart))]
    pub async fn begin_checkout(&self, buyer: &Buyer, cart: CartId) -> Result<CheckoutPreview> {
        let address = self.preconditions(buyer, cart).await?;
        let priced = self.carts.price_cart(cart, Some(&address)).await?;
        Ok(CheckoutPreview { address, priced })
    }

    /// Snapshot the cart into a new session and obtain the approval URL.
    ///
    /// An existing open session for the same cart is handled according to
    /// [`DoubleSubmitPolicy`].
    ///
    /// # Errors
    ///
    /// - `CheckoutError::EmptyCart` / `CheckoutError::AddressIncomplete`
    ///   before anything is persisted or the provider is called
    /// - `CheckoutError::DuplicateSubmission` when the policy refuses a
    ///   second session
    /// - `CheckoutError::ProviderUnavailable` if the provider fails or times
    ///   out; the session is then `Failed`
    #[instrument(skip(self, buyer), fields(user_id = %buyer.id, cart_id = %cart))]
    pub async fn create(&self, buyer: &Buyer, cart: CartId) -> Result<CheckoutStarted> {
        let address = self.preconditions(buyer, cart).await?;
        let mut priced = self.carts.price_cart(cart, Some(&address)).await?;

        if let Some(open) = self.sessions.find_open_for_cart(cart).await? {
            match self.resolve_open(open, &priced).await? {
                OpenSession::Reuse(started) => return Ok(started),
                OpenSession::Replace => {}
                OpenSession::Resolved => {
                    priced = self.carts.price_cart(cart, Some(&address)).await?;
                }
            }
        }

        let session = CheckoutSession::new(buyer, cart, priced);
        if let Err(e) = self.sessions.insert(&session).await {
            return match e {
                RepositoryError::Conflict(_) => self.after_insert_conflict(cart, e).await,
                e => Err(e.into()),
            };
        }
        info!(session_id = %session.id, total = %session.snapshot.total_price(), "Checkout session created");

        self.request_payment(session).await
    }

    /// Handle the buyer's return from the payment provider.
    ///
    /// Idempotent: a session that is already `Paid` or `Failed` is returned
    /// as is, without calling the provider or materializing again.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::SessionNotFound` if no session has the
    /// payload's reference.
    #[instrument(skip(self, payload), fields(reference = %payload.token))]
    pub async fn confirm(&self, payload: &ConfirmPayload) -> Result<CheckoutOutcome> {
        let _guard = self.locks.acquire(&payload.token).await;

        let session = self
            .sessions
            .find_by_provider_reference(&payload.token)
            .await?
            .ok_or_else(|| CheckoutError::SessionNotFound(payload.token.clone()))?;

        if session.status.is_terminal() {
            debug!(session_id = %session.id, status = %session.status, "Session already resolved");
            return self.outcome(session).await;
        }

        let capture = self
            .with_timeout(self.payments.capture(&payload.token))
            .await;

        match capture {
            Ok(capture) if capture.success => {
                self.settle_paid(session, capture.provider_order_id).await
            }
            Ok(capture) => {
                warn!(session_id = %session.id, status = %capture.status, "Payment not captured");
                let reason = format!("payment declined: {}", capture.status);
                self.settle_failed(session, &reason).await
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Payment capture failed");
                let reason = format!("payment provider error: {e}");
                self.settle_failed(session, &reason).await
            }
        }
    }

    /// Current state of a session and its orders.
    ///
    /// # Errors
    ///
    /// Returns `CheckoutError::Repository` with `RepositoryError::NotFound`
    /// for an unknown id.
    pub async fn session(&self, id: CheckoutSessionId) -> Result<CheckoutOutcome> {
        let session = self.reload(id).await?;
        self.outcome(session).await
    }

    async fn preconditions(&self, buyer: &Buyer, cart: CartId) -> Result<Address> {
        if self.carts.store().is_empty(cart).await? {
            return Err(CheckoutError::EmptyCart(cart));
        }
        self.gate.authorize(buyer).await
    }

    /// Apply the double-submit policy to an open session for the same cart.
    async fn resolve_open(
        &self,
        open: CheckoutSession,
        priced: &PricedCart,
    ) -> Result<OpenSession> {
        let max_age = self.settings.provider_timeout + CREATED_GRACE;
        if open.is_abandoned(Utc::now(), max_age) {
            warn!(session_id = %open.id, created_at = %open.created_at, "Expiring abandoned session");
            self.fail_created(open.id, "abandoned before payment was requested")
                .await;
            return Ok(OpenSession::Replace);
        }

        if self.settings.double_submit == DoubleSubmitPolicy::Reject
            || open.status == CheckoutStatus::Created
        {
            return Err(CheckoutError::DuplicateSubmission(open.id));
        }

        if open.snapshot == *priced
            && let Some(approval_url) = open.approval_url.clone()
        {
            debug!(session_id = %open.id, "Reusing open checkout session");
            return Ok(OpenSession::Reuse(CheckoutStarted {
                session: open,
                approval_url,
                reused: true,
            }));
        }

        // The cart changed since the open session was priced. A confirmation
        // holds the reference lock from capture until the session settles.
        let Some(reference) = open.provider_reference.as_deref() else {
            return Err(CheckoutError::DuplicateSubmission(open.id));
        };
        let _guard = self.locks.acquire(reference).await;

        let superseded = self
            .sessions
            .transition(
                open.id,
                CheckoutStatus::AwaitingPayment,
                CheckoutStatus::Failed,
                Some("superseded by a newer checkout"),
            )
            .await?;
        if superseded {
            info!(session_id = %open.id, from = "awaiting_payment", to = "failed", "Superseded stale session");
            Ok(OpenSession::Replace)
        } else {
            debug!(session_id = %open.id, "Open session resolved before it could be superseded");
            Ok(OpenSession::Resolved)
        }
    }

    /// A concurrent submit inserted its session first.
    async fn after_insert_conflict(
        &self,
        cart: CartId,
        conflict: RepositoryError,
    ) -> Result<CheckoutStarted> {
        let Some(open) = self.sessions.find_open_for_cart(cart).await? else {
            return Err(conflict.into());
        };

        match (self.settings.double_submit, open.approval_url.clone()) {
            (DoubleSubmitPolicy::Reuse, Some(approval_url))
                if open.status == CheckoutStatus::AwaitingPayment =>
            {
                Ok(CheckoutStarted {
                    session: open,
                    approval_url,
                    reused: true,
                })
            }
            _ => Err(CheckoutError::DuplicateSubmission(open.id)),
        }
    }

    async fn request_payment(&self, session: CheckoutSession) -> Result<CheckoutStarted> {
        let groups = session.snapshot.groups.len();
        let request = PaymentRequest {
            amount: session.snapshot.total_price(),
            return_url: self.settings.return_url.clone(),
            cancel_url: self.settings.cancel_url.clone(),
            invoice_id: session.id.to_string(),
            description: format!(
                "{} item(s) from {groups} seller(s)",
                session.snapshot.item_count()
            ),
        };

        let created = match self
            .with_timeout(self.payments.create_payment(&request))
            .await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Payment provider unavailable");
                let reason = format!("payment provider error: {e}");
                self.fail_created(session.id, &reason).await;
                return Err(CheckoutError::ProviderUnavailable(e));
            }
        };

        match self
            .sessions
            .mark_awaiting_payment(session.id, &created.reference, &created.approval_url)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                return Err(RepositoryError::Conflict(format!(
                    "session {} left Created concurrently",
                    session.id
                ))
                .into());
            }
            Err(e) => {
                self.fail_created(session.id, "could not record payment reference")
                    .await;
                return Err(e.into());
            }
        }
        info!(
            session_id = %session.id,
            from = "created",
            to = "awaiting_payment",
            reference = %created.reference,
            "Session transitioned"
        );

        Ok(CheckoutStarted {
            session: self.reload(session.id).await?,
            approval_url: created.approval_url,
            reused: false,
        })
    }

    /// Best-effort `Created -> Failed`; the caller already has an error.
    async fn fail_created(&self, id: CheckoutSessionId, reason: &str) {
        match self
            .sessions
            .transition(id, CheckoutStatus::Created, CheckoutStatus::Failed, Some(reason))
            .await
        {
            Ok(true) => info!(session_id = %id, from = "created", to = "failed", "Session transitioned"),
            Ok(false) => debug!(session_id = %id, "Session already left Created"),
            Err(e) => error!(session_id = %id, error = %e, "Failed to mark session failed"),
        }
    }

    async fn settle_paid(
        &self,
        session: CheckoutSession,
        provider_order_id: Option<String>,
    ) -> Result<CheckoutOutcome> {
        let won = self
            .sessions
            .transition(
                session.id,
                CheckoutStatus::AwaitingPayment,
                CheckoutStatus::Paid,
                None,
            )
            .await?;
        if !won {
            let current = self.reload(session.id).await?;
            if current.status != CheckoutStatus::Failed {
                debug!(session_id = %session.id, "Another confirmation resolved the session");
                return self.outcome(current).await;
            }

            // Closed elsewhere while the capture was in flight: the money
            // moved but there is nothing left to fulfil.
            let e = CheckoutError::CapturedAfterClose(session.id);
            error!(
                session_id = %session.id,
                failure_reason = current.failure_reason.as_deref().unwrap_or_default(),
                provider_order_id = provider_order_id.as_deref().unwrap_or_default(),
                "Payment captured for a closed session; flagging for refund"
            );
            sentry::capture_error(&e);
            self.flag_for_review(session.id).await;

            let current = self.reload(session.id).await?;
            return self.outcome(current).await;
        }
        info!(session_id = %session.id, from = "awaiting_payment", to = "paid", "Session transitioned");

        let paid = CheckoutSession {
            status: CheckoutStatus::Paid,
            ..session
        };
        match self
            .materializer
            .materialize(&paid, provider_order_id.as_deref())
            .await
        {
            Ok(_) => self.clear_purchased(&paid).await,
            Err(e) => {
                error!(
                    session_id = %paid.id,
                    error = %e,
                    "Payment captured but orders were not created; flagging for reconciliation"
                );
                sentry::capture_error(&e);
                self.flag_for_review(paid.id).await;
            }
        }

        let current = self.reload(paid.id).await?;
        self.outcome(current).await
    }

    async fn flag_for_review(&self, id: CheckoutSessionId) {
        if let Err(e) = self.sessions.set_reconciliation_required(id, true).await {
            error!(session_id = %id, error = %e, "Failed to flag session for reconciliation");
            sentry::capture_error(&e);
        }
    }

    async fn settle_failed(&self, session: CheckoutSession, reason: &str) -> Result<CheckoutOutcome> {
        let moved = self
            .sessions
            .transition(
                session.id,
                CheckoutStatus::AwaitingPayment,
                CheckoutStatus::Failed,
                Some(reason),
            )
            .await?;
        if moved {
            info!(session_id = %session.id, from = "awaiting_payment", to = "failed", "Session transitioned");
        }

        let current = self.reload(session.id).await?;
        self.outcome(current).await
    }

    /// Take the purchased units out of the live cart. Anything added after
    /// the snapshot stays, including units merged into a purchased line.
    async fn clear_purchased(&self, session: &CheckoutSession) {
        let lines: Vec<(CartLineId, u32)> = session
            .snapshot
            .lines()
            .map(|l| (l.id, l.quantity))
            .collect();
        if let Err(e) = self
            .carts
            .store()
            .remove_lines(session.cart_id, &lines)
            .await
        {
            warn!(session_id = %session.id, error = %e, "Failed to clear purchased cart lines");
        }
    }

    async fn reload(&self, id: CheckoutSessionId) -> Result<CheckoutSession> {
        Ok(self
            .sessions
            .get(id)
            .await?
            .ok_or(RepositoryError::NotFound)?)
    }

    async fn outcome(&self, session: CheckoutSession) -> Result<CheckoutOutcome> {
        let orders = if session.is_paid() {
            self.materializer.orders_for(session.id).await?
        } else {
            Vec::new()
        };
        Ok(CheckoutOutcome { session, orders })
    }

    async fn with_timeout<T>(
        &self,
        call: impl Future<Output = std::result::Result<T, PaymentError>>,
    ) -> std::result::Result<T, PaymentError> {
        tokio::time::timeout(self.settings.provider_timeout, call)
            .await
            .unwrap_or(Err(PaymentError::Timeout))
    }
}
