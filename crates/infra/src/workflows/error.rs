use thiserror::Error;

use submgr_core::{DomainError, SubscriptionId};
use submgr_events::EnvelopeError;

use crate::ports::{BillingError, RepositoryError};

/// Workflow failure.
///
/// Domain errors pass through verbatim so callers can match on
/// `InvalidCustomer`, `NotFound`, `AlreadyCancelled` and friends; port errors
/// are wrapped with the operation and subject but keep their classification.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("{operation} failed for subscription {subscription_id}: {source}")]
    Repository {
        operation: &'static str,
        subscription_id: SubscriptionId,
        #[source]
        source: RepositoryError,
    },

    #[error("billing {operation} failed for {context}: {source}")]
    Billing {
        operation: &'static str,
        context: String,
        #[source]
        source: BillingError,
    },

    #[error("event envelope error: {0}")]
    Event(#[from] EnvelopeError),
}

impl WorkflowError {
    pub(crate) fn repository(
        operation: &'static str,
        subscription_id: &SubscriptionId,
        source: RepositoryError,
    ) -> Self {
        Self::Repository {
            operation,
            subscription_id: subscription_id.clone(),
            source,
        }
    }

    /// Retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            WorkflowError::Repository { source, .. } => source.is_transient(),
            WorkflowError::Billing { source, .. } => source.is_transient(),
            WorkflowError::Domain(_) | WorkflowError::Event(_) => false,
        }
    }

    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            WorkflowError::Domain(e) => Some(e),
            _ => None,
        }
    }
}

/// Cancellation committed but the refund did not settle.
///
/// Not a workflow error: the subscription is `Cancelled` regardless, and this
/// value tells the caller which refund still needs reconciling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("refund of {amount_cents} cents for subscription {subscription_id} failed: {source}")]
pub struct RefundFailure {
    pub subscription_id: SubscriptionId,
    pub amount_cents: i64,
    #[source]
    pub source: BillingError,
}

impl RefundFailure {
    pub fn is_transient(&self) -> bool {
        self.source.is_transient()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_errors_pass_through_unchanged() {
        let err = WorkflowError::from(DomainError::already_cancelled("sub-1"));
        assert_eq!(err.to_string(), "subscription already cancelled: sub-1");
        assert_eq!(err.domain(), Some(&DomainError::already_cancelled("sub-1")));
        assert!(!err.is_transient());
    }

    #[test]
    fn wrapped_port_errors_keep_classification() {
        let id = SubscriptionId::new("sub-1");
        let err = WorkflowError::repository("apply", &id, RepositoryError::Timeout("apply"));
        assert!(err.is_transient());
        assert!(err.to_string().contains("sub-1"));

        let err = WorkflowError::Billing {
            operation: "validate_customer",
            context: "customer cust-1".to_string(),
            source: BillingError::Permanent {
                status: Some(400),
                message: "bad request".to_string(),
            },
        };
        assert!(!err.is_transient());
        assert!(err.domain().is_none());
    }

    #[test]
    fn refund_failure_reports_subject_and_amount() {
        let failure = RefundFailure {
            subscription_id: SubscriptionId::new("sub-123"),
            amount_cents: 1600,
            source: BillingError::Transient("503".to_string()),
        };
        assert!(failure.is_transient());
        let text = failure.to_string();
        assert!(text.contains("sub-123"));
        assert!(text.contains("1600"));
    }
}
