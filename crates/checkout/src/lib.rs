//! Marketway Checkout library.
//!
//! Turns a shopping cart into placed, paid orders. The crate is organised
//! around four components, leaves first:
//!
//! 1. [`services::CartAggregator`] - prices cart lines, grouped by seller
//! 2. [`services::AddressGate`] - requires a shippable delivery address
//! 3. [`services::CheckoutSessionManager`] - the checkout state machine
//! 4. [`services::OrderMaterializer`] - one order per seller once paid
//!
//! # Flow
//!
//! ```text
//! CartAggregator -> AddressGate -> CheckoutSessionManager::create
//!     -> (buyer approves with the payment provider)
//!     -> CheckoutSessionManager::confirm -> OrderMaterializer
//! ```
//!
//! External collaborators are traits: [`cart::CartStore`], [`cart::Catalog`],
//! [`pricing::PricingCalculator`], [`payment::PaymentProvider`] and the
//! repositories in [`db`]. In-memory implementations live next to each trait;
//! [`db::PgStore`] and [`payment::PayPalClient`] are the production adapters,
//! wired together by [`CheckoutState`].

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cart;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod payment;
pub mod pricing;
pub mod services;
pub mod state;

pub use error::{CheckoutError, Remediation};
pub use state::CheckoutState;
