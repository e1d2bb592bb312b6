//! Ports: the narrow capability traits workflows depend on.
//!
//! - `SubscriptionRepository`: load, prepare, and conditionally commit subscriptions
//! - `BillingClient`: customer eligibility and refund settlement
//!
//! Adapters live in `crate::repository` and `crate::billing`.

pub mod billing;
pub mod repository;

pub use billing::{BillingClient, BillingError};
pub use repository::{PendingWrite, RepositoryError, SubscriptionRepository, WriteCondition};
