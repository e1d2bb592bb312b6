//! Infrastructure layer: ports, adapters, workflows, refund outbox, config.
//!
//! The domain crates stay pure; everything here talks to the outside world
//! (Postgres, the billing service, the clock) through narrow traits.

pub mod billing;
pub mod config;
pub mod deadline;
pub mod outbox;
pub mod ports;
pub mod repository;
pub mod workflows;


pub use deadline::{Deadline, DeadlineExceeded};
pub use ports::{BillingClient, BillingError, PendingWrite, RepositoryError, SubscriptionRepository, WriteCondition};
pub use workflows::{
    CancelOutcome, CancelSubscription, CreateSubscription, CreateSubscriptionRequest, RefundFailure,
    RefundMode, RefundSettlement, WorkflowError,
};
