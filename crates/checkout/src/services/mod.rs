//! Checkout components.
//!
//! # Services
//!
//! - `cart_aggregator` - Seller-grouped cart pricing and cart edits
//! - `address_gate` - Delivery address requirement and upsert
//! - `checkout` - Session state machine (`create` / `confirm`)
//! - `materializer` - Per-seller order creation and reconciliation
//! - `locks` - In-process confirmation locks

pub mod address_gate;
pub mod cart_aggregator;
pub mod checkout;
pub mod locks;
pub mod materializer;

pub use address_gate::AddressGate;
pub use cart_aggregator::CartAggregator;
pub use checkout::{CheckoutPreview, CheckoutSessionManager};
pub use locks::SessionLocks;
pub use materializer::{OrderMaterializer, ReconcileReport, build_orders};
