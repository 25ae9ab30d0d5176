//! # Stock Availability Check
//!
//! The pure half of stock validation. Given the requested lines and a fixed
//! availability map, the result depends on nothing else.
//!
//! ```text
//! lines ──┐
//!         ├──► check_availability() ──► StockValidationResult
//! map ────┘        (no I/O, no clock apart from checked_at)
//! ```
//!
//! Where the map comes from (stock service or snapshot cache) is decided
//! by the validation engine in `till-sync`.

use std::collections::HashMap;

use chrono::Utc;

use crate::types::{
    AvailabilitySource, CartLine, InsufficientItem, StockSnapshot, StockValidationResult,
    ValidationFailure,
};

/// Checks every line against `availability`.
///
/// Products missing from the map fall back to the line's own
/// `max_available`. The returned result is marked `Live`.
pub fn check_availability(
    lines: &[CartLine],
    availability: &HashMap<String, i64>,
) -> StockValidationResult {
    if lines.is_empty() {
        return StockValidationResult::empty_cart();
    }

    let insufficient_items: Vec<InsufficientItem> = lines
        .iter()
        .filter_map(|line| {
            let available = availability
                .get(&line.product_id)
                .copied()
                .unwrap_or(line.max_available)
                .max(0);

            (line.quantity > available).then(|| InsufficientItem {
                product_id: line.product_id.clone(),
                product_name: line.product_name.clone(),
                required: line.quantity,
                available,
                missing: line.quantity - available,
            })
        })
        .collect();

    let is_valid = insufficient_items.is_empty();
    let error_message = (!is_valid).then(|| describe_shortage(&insufficient_items));

    StockValidationResult {
        is_valid,
        error_message,
        failure: (!is_valid).then_some(ValidationFailure::InsufficientStock),
        insufficient_items,
        source: AvailabilitySource::Live,
        stale_as_of: None,
        checked_at: Utc::now(),
    }
}

/// Checks `lines` against cached snapshots.
///
/// The result is marked `Cached`, stamped with the oldest snapshot that
/// contributed to it.
pub fn check_against_snapshots(
    lines: &[CartLine],
    snapshots: &[StockSnapshot],
) -> StockValidationResult {
    let availability: HashMap<String, i64> = snapshots
        .iter()
        .map(|s| (s.product_id.clone(), s.available))
        .collect();
    let oldest = snapshots
        .iter()
        .filter(|s| lines.iter().any(|l| l.product_id == s.product_id))
        .map(|s| s.updated_at)
        .min();

    check_availability(lines, &availability).from_cache(oldest)
}

fn describe_shortage(items: &[InsufficientItem]) -> String {
    let parts: Vec<String> = items
        .iter()
        .map(|i| {
            format!(
                "{} (requested {}, available {})",
                i.product_name, i.required, i.available
            )
        })
        .collect();
    format!("Insufficient stock: {}", parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn line(id: &str, qty: i64, max: i64) -> CartLine {
        CartLine::new(id, format!("Product {}", id.to_uppercase()), qty, 100, max)
    }

    #[test]
    fn test_all_lines_available_is_valid() {
        let lines = vec![line("a", 3, 5), line("c", 1, 1)];
        let availability = HashMap::from([("a".to_string(), 5), ("c".to_string(), 4)]);

        let result = check_availability(&lines, &availability);
        assert!(result.is_valid);
        assert!(result.insufficient_items.is_empty());
        assert!(result.error_message.is_none());
        assert!(result.failure.is_none());
    }

    #[test]
    fn test_lists_exactly_the_short_lines() {
        let lines = vec![line("a", 3, 5), line("b", 10, 2), line("c", 7, 9)];
        let availability = HashMap::from([
            ("a".to_string(), 5),
            ("b".to_string(), 2),
            ("c".to_string(), 4),
        ]);

        let result = check_availability(&lines, &availability);
        assert!(!result.is_valid);
        assert_eq!(result.failure, Some(ValidationFailure::InsufficientStock));

        let short: Vec<(&str, i64, i64, i64)> = result
            .insufficient_items
            .iter()
            .map(|i| (i.product_id.as_str(), i.required, i.available, i.missing))
            .collect();
        assert_eq!(short, vec![("b", 10, 2, 8), ("c", 7, 4, 3)]);
    }

    #[test]
    fn test_product_b_shortage() {
        let lines = vec![line("b", 10, 2)];
        let result = check_availability(&lines, &HashMap::from([("b".to_string(), 2)]));

        assert_eq!(
            result.insufficient_items,
            vec![InsufficientItem {
                product_id: "b".to_string(),
                product_name: "Product B".to_string(),
                required: 10,
                available: 2,
                missing: 8,
            }]
        );
        assert!(result
            .error_message
            .unwrap()
            .contains("Product B (requested 10, available 2)"));
    }

    #[test]
    fn test_empty_cart_is_distinct_from_stock_error() {
        let result = check_availability(&[], &HashMap::new());
        assert!(!result.is_valid);
        assert!(result.is_empty_cart());
        assert!(result.insufficient_items.is_empty());
    }

    #[test]
    fn test_missing_product_uses_line_availability() {
        let lines = vec![line("a", 3, 5), line("b", 3, 2)];
        let result = check_availability(&lines, &HashMap::new());
        assert_eq!(result.insufficient_items.len(), 1);
        assert_eq!(result.insufficient_items[0].product_id, "b");
    }

    #[test]
    fn test_negative_availability_counts_as_zero() {
        let lines = vec![line("a", 1, 5)];
        let result = check_availability(&lines, &HashMap::from([("a".to_string(), -3)]));
        assert_eq!(result.insufficient_items[0].available, 0);
        assert_eq!(result.insufficient_items[0].missing, 1);
    }

    #[test]
    fn test_deterministic_for_fixed_snapshot() {
        let lines = vec![line("a", 3, 5), line("b", 10, 2)];
        let availability = HashMap::from([("a".to_string(), 1)]);
        let first = check_availability(&lines, &availability);
        let second = check_availability(&lines, &availability);
        assert_eq!(first.is_valid, second.is_valid);
        assert_eq!(first.insufficient_items, second.insufficient_items);
        assert_eq!(first.error_message, second.error_message);
    }

    #[test]
    fn test_snapshot_result_is_marked_cached() {
        let now = Utc::now();
        let snapshots = vec![
            StockSnapshot {
                product_id: "a".to_string(),
                available: 5,
                updated_at: now - Duration::minutes(10),
            },
            StockSnapshot {
                product_id: "z".to_string(),
                available: 0,
                updated_at: now - Duration::days(3),
            },
        ];

        let result = check_against_snapshots(&[line("a", 3, 0)], &snapshots);
        assert!(result.is_valid);
        assert_eq!(result.source, AvailabilitySource::Cached);
        assert_eq!(result.stale_as_of, Some(now - Duration::minutes(10)));
        assert!(!result.is_server_confirmed());
    }
}
