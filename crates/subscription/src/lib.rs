//! Subscription domain module.
//!
//! This crate contains the business rules for a purchased subscription,
//! implemented purely as deterministic domain logic (no IO, no HTTP, no storage).

pub mod events;
pub mod proration;
pub mod subscription;

pub use events::{SubscriptionCancelled, SubscriptionCreated};
pub use proration::{days_elapsed, prorated_refund};
pub use subscription::{Subscription, SubscriptionStatus, AGGREGATE_TYPE};
