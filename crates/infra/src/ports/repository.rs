use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use submgr_core::SubscriptionId;
use submgr_subscription::{Subscription, SubscriptionStatus};

use crate::deadline::DeadlineExceeded;
use crate::outbox::OutboxMessage;
use crate::repository::SubscriptionRecord;

/// Repository failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RepositoryError {
    #[error("subscription not found: {0}")]
    NotFound(SubscriptionId),

    /// The conditional write lost: the stored status no longer matches.
    #[error("conditional write failed for {id}: expected {expected}")]
    Conflict { id: SubscriptionId, expected: String },

    #[error("repository timed out during {0}")]
    Timeout(&'static str),

    #[error("storage error: {message}")]
    Storage { message: String, transient: bool },

    #[error("corrupt record for subscription {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>, transient: bool) -> Self {
        Self::Storage {
            message: message.into(),
            transient,
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            RepositoryError::Timeout(_) => true,
            RepositoryError::Storage { transient, .. } => *transient,
            _ => false,
        }
    }
}

impl From<DeadlineExceeded> for RepositoryError {
    fn from(value: DeadlineExceeded) -> Self {
        RepositoryError::Timeout(value.operation)
    }
}

/// Precondition a subscription write must satisfy at commit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteCondition {
    /// No row with this id may exist yet.
    Absent,
    /// The stored row must currently carry this status.
    StatusIs(SubscriptionStatus),
}

impl WriteCondition {
    /// Condition implied by the status the aggregate is being written with.
    ///
    /// `Active` can only be reached by creation; `Cancelled` only from `Active`.
    pub fn for_status(status: SubscriptionStatus) -> Self {
        match status {
            SubscriptionStatus::Active => WriteCondition::Absent,
            SubscriptionStatus::Cancelled => WriteCondition::StatusIs(SubscriptionStatus::Active),
        }
    }
}

impl fmt::Display for WriteCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteCondition::Absent => f.write_str("no existing row"),
            WriteCondition::StatusIs(status) => write!(f, "status {status}"),
        }
    }
}

/// A prepared, not yet committed write.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    Subscription {
        record: SubscriptionRecord,
        condition: WriteCondition,
    },
    /// Outbox message committed atomically with the subscription writes in the same batch.
    Outbox(OutboxMessage),
}

impl PendingWrite {
    pub fn for_subscription(subscription: &Subscription) -> Self {
        PendingWrite::Subscription {
            record: SubscriptionRecord::from(subscription),
            condition: WriteCondition::for_status(subscription.status()),
        }
    }
}

/// Persistence port for the subscription aggregate.
///
/// `save` only prepares; nothing is visible until `apply` commits the batch.
/// `apply` is all-or-nothing: if any condition fails, no write in the batch lands.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Subscription, RepositoryError>;

    fn save(&self, subscription: &Subscription) -> Result<PendingWrite, RepositoryError> {
        Ok(PendingWrite::for_subscription(subscription))
    }

    async fn apply(&self, writes: Vec<PendingWrite>) -> Result<(), RepositoryError>;
}

#[async_trait]
impl<S> SubscriptionRepository for Arc<S>
where
    S: SubscriptionRepository + ?Sized,
{
    async fn find_by_id(&self, id: &SubscriptionId) -> Result<Subscription, RepositoryError> {
        (**self).find_by_id(id).await
    }

    fn save(&self, subscription: &Subscription) -> Result<PendingWrite, RepositoryError> {
        (**self).save(subscription)
    }

    async fn apply(&self, writes: Vec<PendingWrite>) -> Result<(), RepositoryError> {
        (**self).apply(writes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_condition_follows_lifecycle() {
        assert_eq!(
            WriteCondition::for_status(SubscriptionStatus::Active),
            WriteCondition::Absent
        );
        assert_eq!(
            WriteCondition::for_status(SubscriptionStatus::Cancelled),
            WriteCondition::StatusIs(SubscriptionStatus::Active)
        );
        assert_eq!(
            WriteCondition::StatusIs(SubscriptionStatus::Active).to_string(),
            "status ACTIVE"
        );
    }

    #[test]
    fn transient_classification() {
        assert!(RepositoryError::Timeout("find_by_id").is_transient());
        assert!(RepositoryError::storage("connection reset", true).is_transient());
        assert!(!RepositoryError::storage("syntax error", false).is_transient());
        assert!(!RepositoryError::NotFound(SubscriptionId::new("sub-1")).is_transient());
        assert!(
            !RepositoryError::Conflict {
                id: SubscriptionId::new("sub-1"),
                expected: "status ACTIVE".to_string(),
            }
            .is_transient()
        );
    }
}
