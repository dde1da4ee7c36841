//! Double-submit handling for `create()` under both policies.

#![allow(clippy::unwrap_used)]

use chrono::Utc;

use marketway_checkout::CheckoutError;
use marketway_checkout::config::DoubleSubmitPolicy;
use marketway_checkout::db::SessionRepository;
use marketway_checkout::models::{CheckoutSession, ConfirmPayload};
use marketway_core::{CartId, CheckoutStatus};
use marketway_integration_tests::{POUCH, PRINT, TOTE, TestContext, TestOptions, buyer};

async fn context(policy: DoubleSubmitPolicy) -> TestContext {
    TestContext::with_options(TestOptions {
        double_submit: policy,
        ..TestOptions::default()
    })
    .await
}

// =============================================================================
// Reuse (default)
// =============================================================================

#[tokio::test]
async fn test_reuse_returns_open_session_for_unchanged_cart() {
    let ctx = context(DoubleSubmitPolicy::Reuse).await;
    let buyer = buyer(1);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let first = ctx.manager.create(&buyer, cart).await.unwrap();
    let second = ctx.manager.create(&buyer, cart).await.unwrap();

    assert!(second.reused);
    assert_eq!(second.session.id, first.session.id);
    assert_eq!(second.approval_url, first.approval_url);
    assert_eq!(ctx.provider.create_calls(), 1);
    assert_eq!(ctx.store.session_count().await, 1);
}

#[tokio::test]
async fn test_reuse_supersedes_session_for_changed_cart() {
    let ctx = context(DoubleSubmitPolicy::Reuse).await;
    let buyer = buyer(2);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let stale = ctx.manager.create(&buyer, cart).await.unwrap();
    ctx.fill(cart, &[(POUCH, 1)]).await;
    let fresh = ctx.manager.create(&buyer, cart).await.unwrap();

    assert!(!fresh.reused);
    assert_ne!(fresh.session.id, stale.session.id);
    assert!(fresh.session.snapshot.total > stale.session.snapshot.total);

    let superseded = ctx.store.get(stale.session.id).await.unwrap().unwrap();
    assert_eq!(superseded.status, CheckoutStatus::Failed);
    assert!(superseded.failure_reason.unwrap().contains("superseded"));

    // Approving the stale payment afterwards captures nothing.
    let outcome = ctx
        .manager
        .confirm(&ConfirmPayload::new(
            stale.session.provider_reference.unwrap(),
        ))
        .await
        .unwrap();
    assert_eq!(outcome.session.status, CheckoutStatus::Failed);
    assert_eq!(ctx.provider.capture_calls(), 0);
}

#[tokio::test]
async fn test_abandoned_created_session_is_expired() {
    let ctx = context(DoubleSubmitPolicy::Reuse).await;
    let buyer = buyer(5);
    let cart = CartId::generate();
    let address = ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    // A process inserted this session and died before asking the provider.
    let priced = ctx.aggregator.price_cart(cart, Some(&address)).await.unwrap();
    let mut stranded = CheckoutSession::new(&buyer, cart, priced);
    stranded.created_at = Utc::now() - chrono::Duration::minutes(10);
    ctx.store.insert(&stranded).await.unwrap();

    let started = ctx.manager.create(&buyer, cart).await.unwrap();

    assert_ne!(started.session.id, stranded.id);
    assert_eq!(started.session.status, CheckoutStatus::AwaitingPayment);
    let expired = ctx.store.get(stranded.id).await.unwrap().unwrap();
    assert_eq!(expired.status, CheckoutStatus::Failed);
    assert!(expired.failure_reason.unwrap().contains("abandoned"));
}

#[tokio::test]
async fn test_recent_created_session_still_blocks() {
    let ctx = context(DoubleSubmitPolicy::Reuse).await;
    let buyer = buyer(6);
    let cart = CartId::generate();
    let address = ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let priced = ctx.aggregator.price_cart(cart, Some(&address)).await.unwrap();
    let pending = CheckoutSession::new(&buyer, cart, priced);
    ctx.store.insert(&pending).await.unwrap();

    let err = ctx.manager.create(&buyer, cart).await.unwrap_err();
    assert!(matches!(err, CheckoutError::DuplicateSubmission(id) if id == pending.id));
    assert_eq!(ctx.provider.create_calls(), 0);
}

// =============================================================================
// Reject
// =============================================================================

#[tokio::test]
async fn test_reject_refuses_second_session() {
    let ctx = context(DoubleSubmitPolicy::Reject).await;
    let buyer = buyer(3);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let first = ctx.manager.create(&buyer, cart).await.unwrap();
    let err = ctx.manager.create(&buyer, cart).await.unwrap_err();

    assert!(matches!(err, CheckoutError::DuplicateSubmission(id) if id == first.session.id));
    assert_eq!(err.remediation(), None);
    assert_eq!(ctx.provider.create_calls(), 1);
    assert_eq!(ctx.store.session_count().await, 1);
}

#[tokio::test]
async fn test_reject_allows_new_session_after_resolution() {
    let ctx = context(DoubleSubmitPolicy::Reject).await;
    let buyer = buyer(4);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let first = ctx.manager.create(&buyer, cart).await.unwrap();
    ctx.manager
        .confirm(&ConfirmPayload::new(
            first.session.provider_reference.unwrap(),
        ))
        .await
        .unwrap();

    // The paid lines left the cart; a new purchase starts a new session.
    ctx.fill(cart, &[(PRINT, 1)]).await;
    let second = ctx.manager.create(&buyer, cart).await.unwrap();
    assert_ne!(second.session.id, first.session.id);
    assert_eq!(ctx.store.session_count().await, 2);
}
