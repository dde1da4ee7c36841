//! Domain models for checkout.
//!
//! These types represent validated domain objects separate from database row
//! types. Row conversions live in [`crate::db`].

pub mod address;
pub mod cart;
pub mod order;
pub mod receipt;
pub mod session;

pub use address::{Address, AddressFields, Buyer};
pub use cart::{CartLine, CartSummary, CatalogEntry, PricedCart, SellerGroup};
pub use order::{Order, OrderLine};
pub use receipt::{CheckoutReceipt, ReceiptOutcome};
pub use session::{CheckoutOutcome, CheckoutSession, CheckoutStarted, ConfirmPayload};
