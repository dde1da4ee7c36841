//! Production wiring of the checkout components.

use std::sync::Arc;

use sqlx::PgPool;

use crate::cart::{CartStore, Catalog};
use crate::config::CheckoutConfig;
use crate::db::PgStore;
use crate::payment::{PayPalClient, PaymentError};
use crate::pricing::FlatRatePricing;
use crate::services::{AddressGate, CartAggregator, CheckoutSessionManager, OrderMaterializer};

/// Checkout components shared across request handlers.
///
/// Cheaply cloneable via `Arc`. The cart store and catalog belong to the
/// surrounding storefront and are passed in.
#[derive(Clone)]
pub struct CheckoutState {
    inner: Arc<CheckoutStateInner>,
}

struct CheckoutStateInner {
    config: CheckoutConfig,
    store: Arc<PgStore>,
    aggregator: CartAggregator,
    gate: AddressGate,
    materializer: OrderMaterializer,
    manager: CheckoutSessionManager,
}

impl CheckoutState {
    /// Build every component over `PostgreSQL` and `PayPal`.
    ///
    /// # Errors
    ///
    /// Returns `PaymentError::Http` if the `PayPal` HTTP client cannot be
    /// built.
    pub fn new(
        config: CheckoutConfig,
        pool: PgPool,
        carts: Arc<dyn CartStore>,
        catalog: Arc<dyn Catalog>,
    ) -> Result<Self, PaymentError> {
        let settings = config.checkout.clone();
        let store = Arc::new(PgStore::new(pool));
        let payments = Arc::new(PayPalClient::new(&config.paypal, settings.provider_timeout)?);

        let aggregator = CartAggregator::new(
            carts,
            catalog,
            Arc::new(FlatRatePricing::from_settings(&config.pricing)),
            settings.currency,
        );
        let gate = AddressGate::new(store.clone(), settings.state_required_countries.clone());
        let materializer = OrderMaterializer::new(store.clone(), store.clone());
        let manager = CheckoutSessionManager::new(
            aggregator.clone(),
            gate.clone(),
            store.clone(),
            payments,
            materializer.clone(),
            settings,
        );

        Ok(Self {
            inner: Arc::new(CheckoutStateInner {
                config,
                store,
                aggregator,
                gate,
                materializer,
                manager,
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &CheckoutConfig {
        &self.inner.config
    }

    /// Repositories, for read-only views such as order history.
    #[must_use]
    pub fn store(&self) -> &PgStore {
        &self.inner.store
    }

    /// Cart page operations.
    #[must_use]
    pub fn carts(&self) -> &CartAggregator {
        &self.inner.aggregator
    }

    /// Delivery address form.
    #[must_use]
    pub fn addresses(&self) -> &AddressGate {
        &self.inner.gate
    }

    #[must_use]
    pub fn materializer(&self) -> &OrderMaterializer {
        &self.inner.materializer
    }

    /// Checkout entry, session creation and confirmation.
    #[must_use]
    pub fn checkout(&self) -> &CheckoutSessionManager {
        &self.inner.manager
    }
}
