//! # Error Types
//!
//! Domain-specific error types for till-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  till-core errors (this file)                                          │
//! │  ├── CoreError        - Cart and checkout rule violations               │
//! │  └── ValidationError  - Input validation failures                       │
//! │                                                                         │
//! │  till-db errors                                                         │
//! │  └── DbError          - Local storage failures                          │
//! │                                                                         │
//! │  till-sync errors                                                       │
//! │  └── SyncError        - Pipeline taxonomy surfaced to the operator      │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → operator notification │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::checkout::CheckoutStep;

// =============================================================================
// Core Error
// =============================================================================

/// Cart and checkout rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The product is not in the cart.
    #[error("Product {0} is not in the cart")]
    ProductNotInCart(String),

    /// Cart has exceeded maximum allowed lines.
    #[error("Cart cannot have more than {max} lines")]
    CartTooLarge { max: usize },

    /// Line quantity exceeds maximum allowed.
    #[error("Quantity {requested} exceeds maximum allowed ({max})")]
    QuantityTooLarge { requested: i64, max: i64 },

    /// The cart is held by an in-flight submission.
    ///
    /// ## When This Occurs
    /// Between the start of `process_sale` and its outcome. The cart is
    /// released as soon as the sale is confirmed, queued or aborted.
    #[error("Cart is locked while a sale is being submitted")]
    CartLocked,

    /// No checkout is open.
    #[error("No checkout in progress")]
    CheckoutNotOpen,

    /// A checkout is already open.
    #[error("A checkout is already in progress at step {0}")]
    CheckoutAlreadyOpen(CheckoutStep),

    /// A step transition is not allowed from the current step.
    #[error("Cannot move from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// Online checkout cannot leave the validation step with invalid stock.
    ///
    /// ## User Workflow
    /// ```text
    /// Validation step (online)
    ///      │
    ///      ▼
    /// Last result: is_valid = false (or no result yet)
    ///      │
    ///      ▼
    /// StockNotValidated ─► UI keeps the cashier on the validation screen
    /// ```
    #[error("Stock must be validated before continuing: {0}")]
    StockNotValidated(String),

    /// A submission is in flight; the checkout cannot be cancelled or
    /// submitted again.
    #[error("A sale submission is already in flight")]
    SubmissionInFlight,

    /// A sale payload could not be encoded or decoded.
    #[error("Invalid sale payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Value must not be negative.
    #[error("{field} must not be negative")]
    Negative { field: String },
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CoreError::QuantityTooLarge {
            requested: 1000,
            max: 999,
        };
        assert_eq!(
            err.to_string(),
            "Quantity 1000 exceeds maximum allowed (999)"
        );

        let err = CoreError::CheckoutAlreadyOpen(CheckoutStep::Details);
        assert_eq!(
            err.to_string(),
            "A checkout is already in progress at step details"
        );
    }

    #[test]
    fn test_validation_converts_to_core_error() {
        let validation_err = ValidationError::Required {
            field: "product_id".to_string(),
        };
        let core_err: CoreError = validation_err.into();
        assert!(matches!(core_err, CoreError::Validation(_)));
    }
}
