//! Provider failures, timeouts, unknown references and reconciliation.

#![allow(clippy::unwrap_used, clippy::indexing_slicing)]

use std::time::Duration;

use marketway_checkout::CheckoutError;
use marketway_checkout::db::SessionRepository;
use marketway_checkout::models::{CheckoutReceipt, ConfirmPayload, ReceiptOutcome};
use marketway_checkout::payment::{PaymentError, ScriptedOutcome};
use marketway_core::{CartId, CheckoutStatus};
use marketway_integration_tests::{PRINT, TOTE, TestContext, TestOptions, buyer};

// =============================================================================
// create()
// =============================================================================

#[tokio::test]
async fn test_provider_error_fails_the_session() {
    let ctx = TestContext::new().await;
    let buyer = buyer(1);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;
    ctx.provider.set_create(ScriptedOutcome::Error).await;

    let err = ctx.manager.create(&buyer, cart).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::ProviderUnavailable(PaymentError::Api { status: 503, .. })
    ));
    assert_eq!(err.remediation(), None);

    // Nothing is left open for this cart.
    assert!(ctx.store.find_open_for_cart(cart).await.unwrap().is_none());
    assert_eq!(ctx.store.session_count().await, 1);

    // Once the provider recovers a fresh attempt goes through.
    ctx.provider.set_create(ScriptedOutcome::Succeed).await;
    let started = ctx.manager.create(&buyer, cart).await.unwrap();
    assert_eq!(started.session.status, CheckoutStatus::AwaitingPayment);
    assert_eq!(ctx.store.session_count().await, 2);
}

#[tokio::test]
async fn test_provider_timeout_fails_the_session() {
    let ctx = TestContext::with_options(TestOptions {
        provider_timeout: Duration::from_millis(50),
        ..TestOptions::default()
    })
    .await;
    let buyer = buyer(2);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;
    ctx.provider.set_create(ScriptedOutcome::Hang).await;

    let err = ctx.manager.create(&buyer, cart).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::ProviderUnavailable(PaymentError::Timeout)
    ));
    assert!(ctx.store.find_open_for_cart(cart).await.unwrap().is_none());
}

// =============================================================================
// confirm()
// =============================================================================

#[tokio::test]
async fn test_unknown_reference_is_session_not_found() {
    let ctx = TestContext::new().await;

    let err = ctx
        .manager
        .confirm(&ConfirmPayload::new("NO-SUCH-TOKEN"))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::SessionNotFound(ref t) if t == "NO-SUCH-TOKEN"));
    assert_eq!(ctx.provider.capture_calls(), 0);
    assert_eq!(CheckoutReceipt::failed().outcome, ReceiptOutcome::Failed);
}

#[tokio::test]
async fn test_declined_capture_fails_once() {
    let ctx = TestContext::new().await;
    let buyer = buyer(3);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let started = ctx.manager.create(&buyer, cart).await.unwrap();
    ctx.provider.set_capture(ScriptedOutcome::Decline).await;
    let payload = ConfirmPayload::new(started.session.provider_reference.unwrap());

    let outcome = ctx.manager.confirm(&payload).await.unwrap();
    assert_eq!(outcome.session.status, CheckoutStatus::Failed);
    assert!(outcome.orders.is_empty());
    assert!(
        outcome
            .session
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("INSTRUMENT_DECLINED")
    );
    assert_eq!(
        CheckoutReceipt::from_outcome(&outcome).outcome,
        ReceiptOutcome::Failed
    );

    // Terminal: a retried callback does not capture again, even if the
    // provider would now succeed.
    ctx.provider.set_capture(ScriptedOutcome::Succeed).await;
    let again = ctx.manager.confirm(&payload).await.unwrap();
    assert_eq!(again, outcome);
    assert_eq!(ctx.provider.capture_calls(), 1);
    assert_eq!(ctx.store.order_count().await, 0);

    // The cart was not purchased.
    assert_eq!(ctx.aggregator.summary(cart).await.unwrap().count, 1);
}

#[tokio::test]
async fn test_capture_timeout_fails_the_session() {
    let ctx = TestContext::with_options(TestOptions {
        provider_timeout: Duration::from_millis(50),
        ..TestOptions::default()
    })
    .await;
    let buyer = buyer(4);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let started = ctx.manager.create(&buyer, cart).await.unwrap();
    ctx.provider.set_capture(ScriptedOutcome::Hang).await;

    let outcome = ctx
        .manager
        .confirm(&ConfirmPayload::new(
            started.session.provider_reference.unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.session.status, CheckoutStatus::Failed);
    assert!(
        outcome
            .session
            .failure_reason
            .as_deref()
            .unwrap()
            .contains("timed out")
    );
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_paid_without_orders_is_flagged_then_reconciled() {
    let ctx = TestContext::new().await;
    let buyer = buyer(5);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1), (PRINT, 1)]).await;

    let started = ctx.manager.create(&buyer, cart).await.unwrap();
    let payload = ConfirmPayload::new(started.session.provider_reference.unwrap());

    ctx.orders.fail_inserts(true);
    let outcome = ctx.manager.confirm(&payload).await.unwrap();

    // The payment is recorded even though the orders are not.
    assert_eq!(outcome.session.status, CheckoutStatus::Paid);
    assert!(outcome.session.reconciliation_required);
    assert!(outcome.orders.is_empty());
    let receipt = CheckoutReceipt::from_outcome(&outcome);
    assert_eq!(receipt.outcome, ReceiptOutcome::Success);
    assert_eq!(receipt.order_count, 0);

    // The cart keeps its lines until the orders exist.
    assert_eq!(ctx.aggregator.summary(cart).await.unwrap().count, 2);

    ctx.orders.fail_inserts(false);
    let report = ctx.materializer.reconcile_pending().await.unwrap();
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.failed, 0);

    let resolved = ctx.manager.confirm(&payload).await.unwrap();
    assert!(!resolved.session.reconciliation_required);
    assert_eq!(resolved.orders.len(), 2);
    assert_eq!(ctx.provider.capture_calls(), 1);

    // Nothing left to do.
    let report = ctx.materializer.reconcile_pending().await.unwrap();
    assert_eq!(report.reconciled, 0);
}

#[tokio::test]
async fn test_reconcile_keeps_flag_while_still_failing() {
    let ctx = TestContext::new().await;
    let buyer = buyer(6);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let started = ctx.manager.create(&buyer, cart).await.unwrap();
    ctx.orders.fail_inserts(true);
    ctx.manager
        .confirm(&ConfirmPayload::new(
            started.session.provider_reference.unwrap(),
        ))
        .await
        .unwrap();

    let report = ctx.materializer.reconcile_pending().await.unwrap();
    assert_eq!(report.reconciled, 0);
    assert_eq!(report.failed, 1);

    let pending = ctx.store.list_reconciliation_required().await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, started.session.id);
}
