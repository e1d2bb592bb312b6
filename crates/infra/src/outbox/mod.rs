//! Transactional outbox for refund settlement.
//!
//! ## Design
//!
//! - The cancellation workflow writes the `subscription.cancelled` envelope
//!   into the outbox in the same repository batch as the status change
//! - `RefundProcessor` claims due messages and calls billing with a
//!   per-attempt deadline
//! - Transient failures retry with bounded exponential backoff
//! - Permanent failures and exhausted retries dead-letter for manual
//!   reconciliation (list + requeue)

pub mod postgres;
pub mod processor;
pub mod store;
pub mod types;

pub use postgres::PostgresOutboxStore;
pub use processor::{ProcessorStats, RefundProcessor, RefundProcessorConfig, RefundProcessorHandle};
pub use store::{InMemoryOutboxStore, OutboxStore};
pub use types::{DeliveryAttempt, OutboxError, OutboxMessage, OutboxMessageId, OutboxStatus, RetryPolicy};
