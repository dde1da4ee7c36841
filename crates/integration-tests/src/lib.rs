//! Integration tests for Marketway checkout.
//!
//! # Running Tests
//!
//! ```bash
//! # In-memory scenarios
//! cargo test -p marketway-integration-tests
//!
//! # Including the PostgreSQL round trip
//! CHECKOUT_DATABASE_URL=postgres://localhost/marketway_test \
//!     cargo test -p marketway-integration-tests -- --include-ignored
//! ```
//!
//! # Test Categories
//!
//! - `checkout_flow` - Happy path, per-seller orders, idempotent confirm
//! - `checkout_preconditions` - Empty cart and address gate
//! - `checkout_failures` - Provider errors, timeouts, reconciliation
//! - `checkout_concurrency` - Racing confirmations and submits
//! - `double_submit` - Both double-submit policies
//! - `postgres_store` - `PgStore` round trip (ignored by default)
//!
//! [`TestContext`] wires every component over in-memory adapters and a
//! [`ScriptedProvider`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use url::Url;

use marketway_checkout::cart::{MemoryCartStore, MemoryCatalog};
use marketway_checkout::config::{CheckoutSettings, DoubleSubmitPolicy};
use marketway_checkout::db::{MemoryStore, OrderRepository, RepositoryError};
use marketway_checkout::models::{Address, AddressFields, Buyer, CartLine, CatalogEntry, Order};
use marketway_checkout::payment::ScriptedProvider;
use marketway_checkout::pricing::{PricingCalculator, Quote};
use marketway_checkout::services::{
    AddressGate, CartAggregator, CheckoutSessionManager, OrderMaterializer,
};
use marketway_core::{CartId, CheckoutSessionId, CurrencyCode, Email, SellerId, UserId, VariationId};

/// Seller 1, unit price 10.00.
pub const TOTE: VariationId = VariationId::new(101);
/// Seller 1, unit price 5.00.
pub const POUCH: VariationId = VariationId::new(102);
/// Seller 2, unit price 12.50.
pub const PRINT: VariationId = VariationId::new(201);

pub const CANVAS_CO: SellerId = SellerId::new(1);
pub const INK_AND_PAPER: SellerId = SellerId::new(2);

/// Tax and shipping for one seller.
#[derive(Debug, Clone, Copy, Default)]
pub struct SellerRates {
    pub tax: Decimal,
    pub domestic_shipping: Decimal,
    pub international_shipping: Decimal,
}

/// Fixed per-seller tax; shipping depends on whether the address is in
/// the US. No address, no shipping.
#[derive(Debug, Default)]
pub struct FixedQuotes {
    rates: HashMap<SellerId, SellerRates>,
}

impl FixedQuotes {
    /// Canvas Co charges 2.00 tax and 3.00 (US) / 9.00 (elsewhere)
    /// shipping; Ink & Paper charges nothing.
    #[must_use]
    pub fn marketplace() -> Self {
        let mut rates = HashMap::new();
        rates.insert(
            CANVAS_CO,
            SellerRates {
                tax: Decimal::new(200, 2),
                domestic_shipping: Decimal::new(300, 2),
                international_shipping: Decimal::new(900, 2),
            },
        );
        rates.insert(INK_AND_PAPER, SellerRates::default());
        Self { rates }
    }
}

impl PricingCalculator for FixedQuotes {
    fn quote(&self, lines: &[CartLine], address: Option<&Address>) -> Quote {
        let Some(rates) = lines.first().and_then(|l| self.rates.get(&l.seller_id)) else {
            return Quote::default();
        };

        let shipping_cost = match address {
            None => Decimal::ZERO,
            Some(a) if a.country == "US" => rates.domestic_shipping,
            Some(_) => rates.international_shipping,
        };

        Quote {
            tax: rates.tax,
            shipping_cost,
        }
    }
}

/// Order repository that can be told to fail inserts.
pub struct FlakyOrders {
    inner: Arc<MemoryStore>,
    failing: AtomicBool,
}

impl FlakyOrders {
    #[must_use]
    pub const fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
        }
    }

    pub fn fail_inserts(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl OrderRepository for FlakyOrders {
    async fn insert_for_session(
        &self,
        session: CheckoutSessionId,
        orders: &[Order],
    ) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.insert_for_session(session, orders).await
    }

    async fn orders_for_session(
        &self,
        session: CheckoutSessionId,
    ) -> Result<Vec<Order>, RepositoryError> {
        self.inner.orders_for_session(session).await
    }
}

/// Knobs for [`TestContext::with_options`].
#[derive(Debug, Clone, Copy)]
pub struct TestOptions {
    pub double_submit: DoubleSubmitPolicy,
    pub provider_timeout: Duration,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            double_submit: DoubleSubmitPolicy::Reuse,
            provider_timeout: Duration::from_secs(2),
        }
    }
}

/// Every checkout component over shared in-memory adapters.
pub struct TestContext {
    pub carts: Arc<MemoryCartStore>,
    pub store: Arc<MemoryStore>,
    pub orders: Arc<FlakyOrders>,
    pub provider: Arc<ScriptedProvider>,
    pub aggregator: CartAggregator,
    pub gate: AddressGate,
    pub materializer: OrderMaterializer,
    pub manager: CheckoutSessionManager,
    pub settings: CheckoutSettings,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_options(TestOptions::default()).await
    }

    /// # Panics
    ///
    /// Panics if the fixed test URLs do not parse.
    #[allow(clippy::unwrap_used)]
    pub async fn with_options(options: TestOptions) -> Self {
        let carts = Arc::new(MemoryCartStore::new());
        let store = Arc::new(MemoryStore::new());
        let orders = Arc::new(FlakyOrders::new(store.clone()));
        let provider = Arc::new(ScriptedProvider::new());

        let settings = CheckoutSettings {
            currency: CurrencyCode::USD,
            return_url: Url::parse("https://shop.test/checkout/success").unwrap(),
            cancel_url: Url::parse("https://shop.test/checkout/cancel").unwrap(),
            state_required_countries: vec!["CA".to_string()],
            double_submit: options.double_submit,
            provider_timeout: options.provider_timeout,
        };

        let aggregator = CartAggregator::new(
            carts.clone(),
            Arc::new(seeded_catalog().await),
            Arc::new(FixedQuotes::marketplace()),
            settings.currency,
        );
        let gate = AddressGate::new(store.clone(), settings.state_required_countries.clone());
        let materializer = OrderMaterializer::new(orders.clone(), store.clone());
        let manager = CheckoutSessionManager::new(
            aggregator.clone(),
            gate.clone(),
            store.clone(),
            provider.clone(),
            materializer.clone(),
            settings.clone(),
        );

        Self {
            carts,
            store,
            orders,
            provider,
            aggregator,
            gate,
            materializer,
            manager,
            settings,
        }
    }

    /// A second manager over the same storage and provider, with its own
    /// lock registry (a second process).
    #[must_use]
    pub fn second_process(&self) -> CheckoutSessionManager {
        CheckoutSessionManager::new(
            self.aggregator.clone(),
            self.gate.clone(),
            self.store.clone(),
            self.provider.clone(),
            self.materializer.clone(),
            self.settings.clone(),
        )
    }

    /// Save a delivery address for `buyer`.
    ///
    /// # Panics
    ///
    /// Panics if the address is rejected.
    #[allow(clippy::unwrap_used)]
    pub async fn set_address(&self, buyer: &Buyer, country: &str, state: Option<&str>) -> Address {
        self.gate
            .upsert(buyer.id, &address_fields(country, state))
            .await
            .unwrap()
    }

    /// Add items to a cart.
    ///
    /// # Panics
    ///
    /// Panics if a variation is unknown.
    #[allow(clippy::unwrap_used)]
    pub async fn fill(&self, cart: CartId, items: &[(VariationId, u32)]) {
        for &(variation, quantity) in items {
            self.aggregator
                .add_item(cart, variation, quantity)
                .await
                .unwrap();
        }
    }
}

/// Catalog with the three marketplace variations.
pub async fn seeded_catalog() -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    let entries = [
        (TOTE, "Canvas tote", 1_000, CANVAS_CO, "Canvas Co"),
        (POUCH, "Zip pouch", 500, CANVAS_CO, "Canvas Co"),
        (PRINT, "Risograph print", 1_250, INK_AND_PAPER, "Ink & Paper"),
    ];
    for (variation, name, cents, seller_id, seller_name) in entries {
        catalog
            .insert(
                variation,
                CatalogEntry {
                    name: name.to_string(),
                    unit_price: Decimal::new(cents, 2),
                    seller_id,
                    seller_name: seller_name.to_string(),
                },
            )
            .await;
    }
    catalog
}

/// A buyer with a fixed email.
///
/// # Panics
///
/// Never; the email literal is valid.
#[must_use]
#[allow(clippy::unwrap_used)]
pub fn buyer(id: i32) -> Buyer {
    Buyer {
        id: UserId::new(id),
        email: Email::parse(&format!("buyer{id}@example.com")).unwrap(),
    }
}

#[must_use]
pub fn address_fields(country: &str, state: Option<&str>) -> AddressFields {
    AddressFields {
        full_name: "Ada Lovelace".to_string(),
        street: "12 Analytical Way".to_string(),
        city: "Portland".to_string(),
        state: state.map(str::to_string),
        postal_code: "97201".to_string(),
        country: country.to_string(),
        phone: None,
    }
}

/// `Decimal` from a cent amount.
#[must_use]
pub fn cents(amount: i64) -> Decimal {
    Decimal::new(amount, 2)
}
