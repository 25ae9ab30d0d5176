//! # Validation Module
//!
//! Input validation for cart edits and checkout details.
//!
//! ## Where These Run
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Operator input                                                         │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  THIS MODULE: shape checks (ids, quantities, prices, note length)      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  stock::check_availability: quantity vs availability                    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite CHECK / NOT NULL constraints                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A quantity above the known availability is NOT an input error here; the
//! cart keeps it and stock validation reports it.
//!
//! ## Usage
//! ```rust
//! use till_core::validation::{validate_product_id, validate_quantity};
//!
//! validate_product_id("COKE-330").unwrap();
//! validate_quantity(5).unwrap();
//! assert!(validate_quantity(-1).is_err());
//! ```

use crate::error::ValidationError;
use crate::types::CartLine;
use crate::MAX_ITEM_QUANTITY;

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Maximum length of a product or customer id.
pub const MAX_ID_LEN: usize = 64;

/// Maximum length of a sale note.
pub const MAX_NOTE_LEN: usize = 500;

// =============================================================================
// String Validators
// =============================================================================

fn validate_id(field: &str, id: &str) -> ValidationResult<()> {
    let id = id.trim();

    if id.is_empty() {
        return Err(ValidationError::Required {
            field: field.to_string(),
        });
    }

    if id.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field: field.to_string(),
            max: MAX_ID_LEN,
        });
    }

    Ok(())
}

/// Validates a product id.
pub fn validate_product_id(id: &str) -> ValidationResult<()> {
    validate_id("product_id", id)
}

/// Normalizes an optional customer id: blank becomes `None`.
///
/// ## Example
/// ```rust
/// use till_core::validation::normalize_customer_id;
///
/// assert_eq!(normalize_customer_id(Some("  ".into())).unwrap(), None);
/// assert_eq!(
///     normalize_customer_id(Some(" c-1 ".into())).unwrap(),
///     Some("c-1".to_string())
/// );
/// ```
pub fn normalize_customer_id(customer_id: Option<String>) -> ValidationResult<Option<String>> {
    match customer_id.map(|c| c.trim().to_string()) {
        Some(c) if c.is_empty() => Ok(None),
        Some(c) => {
            validate_id("customer_id", &c)?;
            Ok(Some(c))
        }
        None => Ok(None),
    }
}

/// Normalizes an optional sale note: blank becomes `None`.
pub fn normalize_note(note: Option<String>) -> ValidationResult<Option<String>> {
    match note.map(|n| n.trim().to_string()) {
        Some(n) if n.is_empty() => Ok(None),
        Some(n) if n.chars().count() > MAX_NOTE_LEN => Err(ValidationError::TooLong {
            field: "note".to_string(),
            max: MAX_NOTE_LEN,
        }),
        other => Ok(other),
    }
}

// =============================================================================
// Numeric Validators
// =============================================================================

/// Validates a requested line quantity.
///
/// ## Rules
/// - Must not be negative (0 removes the line)
/// - Must not exceed MAX_ITEM_QUANTITY (999)
pub fn validate_quantity(qty: i64) -> ValidationResult<()> {
    if qty < 0 {
        return Err(ValidationError::Negative {
            field: "quantity".to_string(),
        });
    }

    if qty > MAX_ITEM_QUANTITY {
        return Err(ValidationError::OutOfRange {
            field: "quantity".to_string(),
            min: 0,
            max: MAX_ITEM_QUANTITY,
        });
    }

    Ok(())
}

/// Validates a price in cents. Zero is allowed (free items).
pub fn validate_price_cents(cents: i64) -> ValidationResult<()> {
    if cents < 0 {
        return Err(ValidationError::Negative {
            field: "unit_price".to_string(),
        });
    }

    Ok(())
}

/// Validates a whole cart line before it enters the cart.
pub fn validate_line(line: &CartLine) -> ValidationResult<()> {
    validate_product_id(&line.product_id)?;
    validate_quantity(line.quantity)?;
    validate_price_cents(line.unit_price_cents)?;

    if line.max_available < 0 {
        return Err(ValidationError::Negative {
            field: "max_available".to_string(),
        });
    }

    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_product_id() {
        assert!(validate_product_id("COKE-330").is_ok());
        assert!(validate_product_id("").is_err());
        assert!(validate_product_id("   ").is_err());
        assert!(validate_product_id(&"A".repeat(65)).is_err());
    }

    #[test]
    fn test_validate_quantity() {
        assert!(validate_quantity(0).is_ok());
        assert!(validate_quantity(999).is_ok());
        assert!(validate_quantity(-1).is_err());
        assert!(validate_quantity(1000).is_err());
    }

    #[test]
    fn test_line_may_exceed_availability() {
        let line = CartLine::new("b", "Product B", 10, 250, 2);
        assert!(validate_line(&line).is_ok());
        assert!(line.exceeds_available());
    }

    #[test]
    fn test_invalid_lines() {
        assert!(validate_line(&CartLine::new("b", "B", 1, -5, 2)).is_err());
        assert!(validate_line(&CartLine::new("b", "B", 1, 5, -2)).is_err());
        assert!(validate_line(&CartLine::new("", "B", 1, 5, 2)).is_err());
    }

    #[test]
    fn test_normalize_note() {
        assert_eq!(normalize_note(None).unwrap(), None);
        assert_eq!(normalize_note(Some(" ".into())).unwrap(), None);
        assert_eq!(
            normalize_note(Some(" table 4 ".into())).unwrap(),
            Some("table 4".to_string())
        );
        assert!(normalize_note(Some("x".repeat(501))).is_err());
    }
}
