//! Delivery attempt with classified recovery.

pub mod attempt;
pub mod outcome;
pub mod policy;

pub use attempt::{Deliverer, CONTACT_ADD_FAILED};
pub use outcome::{FailureClass, Outcome, OutcomeStatus};
pub use policy::{GiveUpReason, Recovery, RetryCounters, RetryPolicy};
