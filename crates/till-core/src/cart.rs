//! # Cart
//!
//! The cart aggregate: line items plus the derived summary.
//!
//! ## Cart Operations Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Operator action          Cart call             Effect                  │
//! │  ───────────────          ─────────             ──────                  │
//! │  Scan product ──────────► add_line() ─────────► merge or push line      │
//! │  Change quantity ───────► update_quantity() ──► lines[i].quantity = n   │
//! │  Remove line ───────────► remove_line() ──────► lines.remove(i)         │
//! │  Clear ─────────────────► clear() ────────────► lines.clear()           │
//! │  Any read ──────────────► summary() ──────────► recomputed each time    │
//! │                                                                         │
//! │  Every successful mutation bumps `revision`. A validation started at   │
//! │  revision N is stale once the cart is at N+1.                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Invariants
//! - Lines are unique by `product_id` (adding again increases quantity)
//! - Quantity is never negative; setting it to 0 removes the line
//! - No mutation while a submission holds the lock

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::{CartLine, CartSummary};
use crate::validation::{validate_line, validate_product_id, validate_quantity};
use crate::{MAX_CART_LINES, MAX_ITEM_QUANTITY};

/// The operator's cart.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Cart {
    lines: Vec<CartLine>,
    revision: u64,
    locked: bool,
}

impl Cart {
    /// Creates a new empty cart.
    pub fn new() -> Self {
        Cart::default()
    }

    /// Adds a line, or increases the quantity of an existing one.
    ///
    /// Price, name and availability of an existing line are refreshed from
    /// the incoming line.
    pub fn add_line(&mut self, line: CartLine) -> CoreResult<()> {
        self.ensure_unlocked()?;
        validate_line(&line)?;

        if let Some(existing) = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == line.product_id)
        {
            let new_qty = existing.quantity + line.quantity;
            if new_qty > MAX_ITEM_QUANTITY {
                return Err(CoreError::QuantityTooLarge {
                    requested: new_qty,
                    max: MAX_ITEM_QUANTITY,
                });
            }
            existing.quantity = new_qty;
            existing.product_name = line.product_name;
            existing.unit_price_cents = line.unit_price_cents;
            existing.max_available = line.max_available;
        } else {
            if self.lines.len() >= MAX_CART_LINES {
                return Err(CoreError::CartTooLarge {
                    max: MAX_CART_LINES,
                });
            }
            if line.quantity == 0 {
                return Ok(());
            }
            self.lines.push(line);
        }

        self.touch();
        Ok(())
    }

    /// Sets the quantity of a line. Zero removes it.
    pub fn update_quantity(&mut self, product_id: &str, quantity: i64) -> CoreResult<()> {
        self.ensure_unlocked()?;
        validate_product_id(product_id)?;
        validate_quantity(quantity)?;

        if quantity == 0 {
            return self.remove_line(product_id);
        }

        let line = self
            .lines
            .iter_mut()
            .find(|l| l.product_id == product_id)
            .ok_or_else(|| CoreError::ProductNotInCart(product_id.to_string()))?;
        line.quantity = quantity;

        self.touch();
        Ok(())
    }

    /// Removes a line by product id.
    pub fn remove_line(&mut self, product_id: &str) -> CoreResult<()> {
        self.ensure_unlocked()?;
        let before = self.lines.len();
        self.lines.retain(|l| l.product_id != product_id);

        if self.lines.len() == before {
            return Err(CoreError::ProductNotInCart(product_id.to_string()));
        }

        self.touch();
        Ok(())
    }

    /// Removes every line.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.ensure_unlocked()?;
        self.lines.clear();
        self.touch();
        Ok(())
    }

    /// Current lines.
    pub fn lines(&self) -> &[CartLine] {
        &self.lines
    }

    /// Derived totals, recomputed on every call.
    pub fn summary(&self) -> CartSummary {
        let total: Money = self.lines.iter().map(CartLine::line_total).sum();
        CartSummary {
            item_count: self.lines.iter().map(|l| l.quantity).sum(),
            total_amount_cents: total.cents(),
            has_items: !self.lines.is_empty(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Monotonic counter of successful mutations.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Locks the cart for the duration of a submission.
    pub fn lock(&mut self) -> CoreResult<()> {
        self.ensure_unlocked()?;
        self.locked = true;
        Ok(())
    }

    pub fn unlock(&mut self) {
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Empties the cart as part of completing a sale, releasing the lock.
    pub fn complete_sale(&mut self) {
        self.locked = false;
        self.lines.clear();
        self.touch();
    }

    fn ensure_unlocked(&self) -> CoreResult<()> {
        if self.locked {
            return Err(CoreError::CartLocked);
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.revision = self.revision.wrapping_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(id: &str, qty: i64, price: i64, max: i64) -> CartLine {
        CartLine::new(id, format!("Product {}", id.to_uppercase()), qty, price, max)
    }

    #[test]
    fn test_add_same_product_increases_quantity() {
        let mut cart = Cart::new();
        cart.add_line(line("a", 2, 999, 10)).unwrap();
        cart.add_line(line("a", 3, 999, 10)).unwrap();

        assert_eq!(cart.lines().len(), 1);
        assert_eq!(cart.lines()[0].quantity, 5);
    }

    #[test]
    fn test_summary_is_derived() {
        let mut cart = Cart::new();
        assert_eq!(cart.summary(), CartSummary::default());

        cart.add_line(line("a", 3, 250, 5)).unwrap();
        cart.add_line(line("b", 2, 100, 5)).unwrap();
        let summary = cart.summary();
        assert_eq!(summary.item_count, 5);
        assert_eq!(summary.total_amount_cents, 950);
        assert!(summary.has_items);

        cart.update_quantity("a", 1).unwrap();
        assert_eq!(cart.summary().total_amount_cents, 450);
    }

    #[test]
    fn test_quantity_above_availability_is_kept() {
        let mut cart = Cart::new();
        cart.add_line(line("b", 10, 250, 2)).unwrap();
        assert!(cart.lines()[0].exceeds_available());
    }

    #[test]
    fn test_zero_quantity_removes_line() {
        let mut cart = Cart::new();
        cart.add_line(line("a", 3, 250, 5)).unwrap();
        cart.update_quantity("a", 0).unwrap();
        assert!(cart.is_empty());
        assert!(matches!(
            cart.update_quantity("a", 1),
            Err(CoreError::ProductNotInCart(_))
        ));
    }

    #[test]
    fn test_negative_quantity_rejected() {
        let mut cart = Cart::new();
        cart.add_line(line("a", 3, 250, 5)).unwrap();
        assert!(matches!(
            cart.update_quantity("a", -1),
            Err(CoreError::Validation(_))
        ));
        assert_eq!(cart.lines()[0].quantity, 3);
    }

    #[test]
    fn test_merged_quantity_limit() {
        let mut cart = Cart::new();
        cart.add_line(line("a", 990, 1, 999)).unwrap();
        assert!(matches!(
            cart.add_line(line("a", 10, 1, 999)),
            Err(CoreError::QuantityTooLarge { requested: 1000, .. })
        ));
    }

    #[test]
    fn test_revision_tracks_mutations() {
        let mut cart = Cart::new();
        let r0 = cart.revision();
        cart.add_line(line("a", 1, 100, 5)).unwrap();
        let r1 = cart.revision();
        assert!(r1 > r0);

        let _ = cart.remove_line("missing");
        assert_eq!(cart.revision(), r1);
    }

    #[test]
    fn test_locked_cart_rejects_edits() {
        let mut cart = Cart::new();
        cart.add_line(line("a", 1, 100, 5)).unwrap();
        cart.lock().unwrap();

        assert!(matches!(cart.add_line(line("b", 1, 1, 1)), Err(CoreError::CartLocked)));
        assert!(matches!(cart.update_quantity("a", 2), Err(CoreError::CartLocked)));
        assert!(matches!(cart.clear(), Err(CoreError::CartLocked)));
        assert!(matches!(cart.lock(), Err(CoreError::CartLocked)));

        cart.unlock();
        cart.update_quantity("a", 2).unwrap();

        cart.lock().unwrap();
        cart.complete_sale();
        assert!(cart.is_empty());
        assert!(!cart.is_locked());
    }
}
