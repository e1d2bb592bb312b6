//! Application workflows: create and cancel.
//!
//! Workflows orchestrate the aggregate and the ports. Every port call is
//! bounded by the caller's [`Deadline`](crate::deadline::Deadline).

mod cancel;
mod create;
mod error;

pub use cancel::{CancelOutcome, CancelSubscription, RefundMode, RefundSettlement};
pub use create::{CreateSubscription, CreateSubscriptionRequest};
pub use error::{RefundFailure, WorkflowError};
