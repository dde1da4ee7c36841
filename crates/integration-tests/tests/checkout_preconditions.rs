//! Checkout entry preconditions: empty cart and address gate.
//!
//! Both are recoverable: the error carries the remediation step and nothing
//! is persisted or sent to the payment provider.

#![allow(clippy::unwrap_used)]

use marketway_checkout::error::AddressProblem;
use marketway_checkout::{CheckoutError, Remediation};
use marketway_core::CartId;
use marketway_integration_tests::{TOTE, TestContext, buyer};

#[tokio::test]
async fn test_empty_cart_never_creates_a_session() {
    let ctx = TestContext::new().await;
    let buyer = buyer(1);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;

    let err = ctx.manager.create(&buyer, cart).await.unwrap_err();
    assert!(matches!(err, CheckoutError::EmptyCart(id) if id == cart));
    assert_eq!(err.remediation(), Some(Remediation::Cart));

    let err = ctx.manager.begin_checkout(&buyer, cart).await.unwrap_err();
    assert_eq!(err.remediation(), Some(Remediation::Cart));

    assert_eq!(ctx.store.session_count().await, 0);
    assert_eq!(ctx.provider.create_calls(), 0);
}

#[tokio::test]
async fn test_emptied_cart_is_empty_again() {
    let ctx = TestContext::new().await;
    let buyer = buyer(2);
    let cart = CartId::generate();
    ctx.set_address(&buyer, "US", Some("OR")).await;
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let line = ctx.aggregator.price_cart(cart, None).await.unwrap();
    let line_id = line.lines().next().unwrap().id;
    ctx.aggregator.remove_item(cart, line_id).await.unwrap();

    assert!(matches!(
        ctx.manager.create(&buyer, cart).await,
        Err(CheckoutError::EmptyCart(_))
    ));
    assert_eq!(ctx.store.session_count().await, 0);
}

#[tokio::test]
async fn test_missing_address_redirects_to_form() {
    let ctx = TestContext::new().await;
    let buyer = buyer(3);
    let cart = CartId::generate();
    ctx.fill(cart, &[(TOTE, 1)]).await;

    let err = ctx.manager.create(&buyer, cart).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::AddressIncomplete(AddressProblem::Missing)
    ));
    assert_eq!(err.remediation(), Some(Remediation::DeliveryAddress));
    assert_eq!(ctx.provider.create_calls(), 0);
}

#[tokio::test]
async fn test_region_required_before_any_provider_call() {
    let ctx = TestContext::new().await;
    let buyer = buyer(4);
    let cart = CartId::generate();
    ctx.fill(cart, &[(TOTE, 1)]).await;
    ctx.set_address(&buyer, "CA", None).await;

    let err = ctx.manager.create(&buyer, cart).await.unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::AddressIncomplete(AddressProblem::MissingState { ref country })
            if country == "CA"
    ));
    assert_eq!(err.remediation(), Some(Remediation::DeliveryAddress));
    assert_eq!(ctx.provider.create_calls(), 0);
    assert_eq!(ctx.store.session_count().await, 0);

    // The gate is re-checked on every attempt, so fixing the form unblocks it.
    let fixed = ctx.set_address(&buyer, "CA", Some("QC")).await;
    let started = ctx.manager.create(&buyer, cart).await.unwrap();
    assert_eq!(ctx.provider.create_calls(), 1);

    let again = ctx.set_address(&buyer, "CA", Some("QC")).await;
    assert_eq!(fixed.id, again.id);
    assert!(started.approval_url.contains(
        started.session.provider_reference.as_deref().unwrap()
    ));
}
