//! # till-core: Pure Logic for the Sale Pipeline
//!
//! Everything in this crate is deterministic and free of I/O. The async
//! services in `till-sync` and the storage in `till-db` build on these types.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     Offline Sale Pipeline                               │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                 Operator layer (PosSession)                     │   │
//! │  │    add_item ──► validate ──► open/advance ──► process_sale      │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ till-core (THIS CRATE) ★                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐  ┌───────────┐  │   │
//! │  │   │   cart    │  │   stock   │  │ checkout  │  │   types   │  │   │
//! │  │   │ CartLine  │  │ availabil-│  │ Validation│  │ SyncOp    │  │   │
//! │  │   │ Summary   │  │ ity check │  │ → Details │  │ OfflineSal│  │   │
//! │  │   └───────────┘  └───────────┘  └───────────┘  └───────────┘  │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS           │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (CartLine, SyncOperation, OfflineSaleRecord, ...)
//! - [`money`] - Money type with integer arithmetic
//! - [`cart`] - The cart aggregate and its derived summary
//! - [`stock`] - Availability check producing a `StockValidationResult`
//! - [`checkout`] - Checkout step transitions
//! - [`error`] - Domain error types
//! - [`validation`] - Input validation
//!
//! ## Example Usage
//!
//! ```rust
//! use std::collections::HashMap;
//! use till_core::cart::Cart;
//! use till_core::stock::check_availability;
//! use till_core::types::CartLine;
//!
//! let mut cart = Cart::new();
//! cart.add_line(CartLine::new("b", "Product B", 10, 250, 2)).unwrap();
//!
//! let availability = HashMap::from([("b".to_string(), 2)]);
//! let result = check_availability(cart.lines(), &availability);
//!
//! assert!(!result.is_valid);
//! assert_eq!(result.insufficient_items[0].missing, 8);
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod cart;
pub mod checkout;
pub mod error;
pub mod money;
pub mod stock;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use cart::Cart;
pub use checkout::{CheckoutStateMachine, CheckoutStep, SaleDetails};
pub use error::{CoreError, CoreResult, ValidationError};
pub use money::Money;
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Maximum distinct lines allowed in a single cart.
pub const MAX_CART_LINES: usize = 100;

/// Maximum quantity of a single line.
///
/// Catches typing 1000 instead of 10 at the register.
pub const MAX_ITEM_QUANTITY: i64 = 999;

/// Default number of sync attempts before an operation is exhausted.
pub const DEFAULT_MAX_RETRIES: i64 = 5;

/// Queue priority for revenue-affecting operations (sale creation).
pub const PRIORITY_SALE: i64 = 100;

/// Queue priority for best-effort metadata updates.
pub const PRIORITY_METADATA: i64 = 10;

/// Entity name used for sale creation operations.
pub const ENTITY_SALE: &str = "sale";
