//! # Checkout State Machine
//!
//! Step transitions of a checkout. Deciding *what* to submit and *where*
//! (server or local queue) is the job of the session in `till-sync`; this
//! type only knows which moves are legal.
//!
//! ## States
//! ```text
//!            open()
//!   (closed) ──────► Validation ──advance──► Details ──advance──► Confirmation
//!      ▲                 ▲  ◄────back─────────  ▲  ◄─────back──────────  │
//!      │                 │                      │                        │
//!      │                 │ reject_submission    │               begin_submit
//!      │                 │                      │                        ▼
//!      │                 └──────────────────────┴────────────── (submitting)
//!      │                                                                 │
//!      └──────────── cancel() (not while submitting) / finish_submit ◄───┘
//! ```
//!
//! ## Guard
//! `Validation → Details` needs a valid stock result while online. Offline
//! it is always allowed; the cashier is never blocked by an outage.

use std::fmt;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::StockValidationResult;

/// A checkout step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutStep {
    Validation,
    Details,
    Confirmation,
}

impl fmt::Display for CheckoutStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CheckoutStep::Validation => "validation",
            CheckoutStep::Details => "details",
            CheckoutStep::Confirmation => "confirmation",
        };
        f.write_str(s)
    }
}

/// Optional customer and note captured at the details step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct SaleDetails {
    pub customer_id: Option<String>,
    pub note: Option<String>,
}

/// Checkout transitions.
#[derive(Debug, Clone, Default)]
pub struct CheckoutStateMachine {
    step: Option<CheckoutStep>,
    submitting: bool,
    details: SaleDetails,
    rejection: Option<StockValidationResult>,
}

impl CheckoutStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current step, `None` when no checkout is open.
    pub fn step(&self) -> Option<CheckoutStep> {
        self.step
    }

    pub fn is_open(&self) -> bool {
        self.step.is_some()
    }

    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    pub fn details(&self) -> &SaleDetails {
        &self.details
    }

    /// Result of the re-validation that sent the checkout back, if any.
    pub fn rejection(&self) -> Option<&StockValidationResult> {
        self.rejection.as_ref()
    }

    /// Starts a checkout at `Validation`.
    pub fn open(&mut self) -> CoreResult<CheckoutStep> {
        if let Some(step) = self.step {
            return Err(CoreError::CheckoutAlreadyOpen(step));
        }
        self.step = Some(CheckoutStep::Validation);
        self.details = SaleDetails::default();
        self.rejection = None;
        Ok(CheckoutStep::Validation)
    }

    /// Moves one step forward.
    ///
    /// `validation` is the latest result for the current cart contents, or
    /// `None` if there is none.
    pub fn advance(
        &mut self,
        online: bool,
        validation: Option<&StockValidationResult>,
    ) -> CoreResult<CheckoutStep> {
        let step = self.current_idle_step()?;

        let next = match step {
            CheckoutStep::Validation => {
                if online {
                    match validation {
                        Some(v) if v.is_valid => {}
                        Some(v) => {
                            return Err(CoreError::StockNotValidated(
                                v.error_message
                                    .clone()
                                    .unwrap_or_else(|| "stock check failed".to_string()),
                            ))
                        }
                        None => {
                            return Err(CoreError::StockNotValidated(
                                "no validation for the current cart".to_string(),
                            ))
                        }
                    }
                }
                CheckoutStep::Details
            }
            CheckoutStep::Details => CheckoutStep::Confirmation,
            CheckoutStep::Confirmation => {
                return Err(CoreError::InvalidTransition {
                    from: step.to_string(),
                    to: "beyond confirmation".to_string(),
                })
            }
        };

        self.step = Some(next);
        Ok(next)
    }

    /// Moves one step back. Never re-runs validation.
    pub fn back(&mut self) -> CoreResult<CheckoutStep> {
        let step = self.current_idle_step()?;

        let previous = match step {
            CheckoutStep::Confirmation => CheckoutStep::Details,
            CheckoutStep::Details => CheckoutStep::Validation,
            CheckoutStep::Validation => {
                return Err(CoreError::InvalidTransition {
                    from: step.to_string(),
                    to: "before validation".to_string(),
                })
            }
        };

        self.step = Some(previous);
        Ok(previous)
    }

    /// Records customer and note. Allowed at any idle step.
    pub fn set_details(&mut self, details: SaleDetails) -> CoreResult<()> {
        self.current_idle_step()?;
        self.details = details;
        Ok(())
    }

    /// Abandons the checkout, discarding details. No durable side effects.
    pub fn cancel(&mut self) -> CoreResult<()> {
        self.current_idle_step()?;
        self.reset();
        Ok(())
    }

    /// Enters the submitting state from `Confirmation`.
    pub fn begin_submit(&mut self) -> CoreResult<SaleDetails> {
        let step = self.current_idle_step()?;
        if step != CheckoutStep::Confirmation {
            return Err(CoreError::InvalidTransition {
                from: step.to_string(),
                to: "submit".to_string(),
            });
        }
        self.submitting = true;
        Ok(self.details.clone())
    }

    /// The sale was confirmed or queued. Closes the checkout.
    pub fn finish_submit(&mut self) {
        self.reset();
    }

    /// Final re-validation failed: back to `Validation` with the new result.
    pub fn reject_submission(&mut self, result: StockValidationResult) {
        self.submitting = false;
        self.step = Some(CheckoutStep::Validation);
        self.rejection = Some(result);
    }

    /// Submission could not complete (nothing persisted). Stays at
    /// `Confirmation` so the operator can retry.
    pub fn abort_submission(&mut self) {
        self.submitting = false;
    }

    fn current_idle_step(&self) -> CoreResult<CheckoutStep> {
        if self.submitting {
            return Err(CoreError::SubmissionInFlight);
        }
        self.step.ok_or(CoreError::CheckoutNotOpen)
    }

    fn reset(&mut self) {
        self.step = None;
        self.submitting = false;
        self.details = SaleDetails::default();
        self.rejection = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stock::check_availability;
    use crate::types::CartLine;
    use std::collections::HashMap;

    fn valid() -> StockValidationResult {
        check_availability(
            &[CartLine::new("a", "Product A", 3, 100, 5)],
            &HashMap::from([("a".to_string(), 5)]),
        )
    }

    fn invalid() -> StockValidationResult {
        check_availability(
            &[CartLine::new("b", "Product B", 10, 100, 2)],
            &HashMap::from([("b".to_string(), 2)]),
        )
    }

    #[test]
    fn test_online_invalid_cannot_reach_details() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();

        let err = checkout.advance(true, Some(&invalid())).unwrap_err();
        assert!(matches!(err, CoreError::StockNotValidated(_)));
        assert!(matches!(
            checkout.advance(true, None),
            Err(CoreError::StockNotValidated(_))
        ));
        assert_eq!(checkout.step(), Some(CheckoutStep::Validation));
    }

    #[test]
    fn test_online_valid_reaches_details() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        assert_eq!(
            checkout.advance(true, Some(&valid())).unwrap(),
            CheckoutStep::Details
        );
    }

    #[test]
    fn test_offline_advances_unconditionally() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        assert_eq!(
            checkout.advance(false, Some(&invalid())).unwrap(),
            CheckoutStep::Details
        );

        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        assert_eq!(checkout.advance(false, None).unwrap(), CheckoutStep::Details);
        assert_eq!(
            checkout.advance(false, None).unwrap(),
            CheckoutStep::Confirmation
        );
    }

    #[test]
    fn test_back_is_always_allowed() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        checkout.advance(true, Some(&valid())).unwrap();
        checkout.advance(true, None).unwrap();

        assert_eq!(checkout.back().unwrap(), CheckoutStep::Details);
        assert_eq!(checkout.back().unwrap(), CheckoutStep::Validation);
        assert!(matches!(
            checkout.back(),
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_cancel_discards_details() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        checkout.advance(false, None).unwrap();
        checkout
            .set_details(SaleDetails {
                customer_id: Some("c-1".into()),
                note: Some("no onions".into()),
            })
            .unwrap();

        checkout.cancel().unwrap();
        assert!(!checkout.is_open());
        assert_eq!(checkout.details(), &SaleDetails::default());
        assert!(matches!(checkout.cancel(), Err(CoreError::CheckoutNotOpen)));
    }

    #[test]
    fn test_no_cancel_or_edit_while_submitting() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        checkout.advance(false, None).unwrap();
        checkout.advance(false, None).unwrap();
        checkout.begin_submit().unwrap();

        assert!(matches!(checkout.cancel(), Err(CoreError::SubmissionInFlight)));
        assert!(matches!(checkout.back(), Err(CoreError::SubmissionInFlight)));
        assert!(matches!(
            checkout.begin_submit(),
            Err(CoreError::SubmissionInFlight)
        ));

        checkout.finish_submit();
        assert!(!checkout.is_open());
        assert!(!checkout.is_submitting());
    }

    #[test]
    fn test_submit_only_from_confirmation() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        assert!(matches!(
            checkout.begin_submit(),
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_rejected_submission_returns_to_validation() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        checkout.advance(false, None).unwrap();
        checkout.advance(false, None).unwrap();
        checkout.begin_submit().unwrap();

        checkout.reject_submission(invalid());
        assert_eq!(checkout.step(), Some(CheckoutStep::Validation));
        assert!(!checkout.is_submitting());
        assert_eq!(checkout.rejection().unwrap().insufficient_items[0].missing, 8);
    }

    #[test]
    fn test_open_twice_fails() {
        let mut checkout = CheckoutStateMachine::new();
        checkout.open().unwrap();
        assert!(matches!(
            checkout.open(),
            Err(CoreError::CheckoutAlreadyOpen(CheckoutStep::Validation))
        ));
    }
}
