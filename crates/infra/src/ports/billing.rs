use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use submgr_core::CustomerId;

use crate::deadline::DeadlineExceeded;

/// Billing-service failure, classified for retry decisions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BillingError {
    /// The customer is not eligible for a subscription.
    #[error("customer {0} rejected by billing")]
    CustomerRejected(CustomerId),

    /// Network failure or 5xx-class response.
    #[error("billing unavailable: {0}")]
    Transient(String),

    /// 4xx-class response or otherwise unretryable request.
    #[error("billing rejected request (status {status:?}): {message}")]
    Permanent { status: Option<u16>, message: String },

    #[error("billing timed out during {0}")]
    Timeout(&'static str),
}

impl BillingError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BillingError::Transient(_) | BillingError::Timeout(_))
    }
}

impl From<DeadlineExceeded> for BillingError {
    fn from(value: DeadlineExceeded) -> Self {
        BillingError::Timeout(value.operation)
    }
}

/// External billing service.
#[async_trait]
pub trait BillingClient: Send + Sync {
    async fn validate_customer(&self, customer_id: &CustomerId) -> Result<(), BillingError>;

    /// Settle a refund of `amount_cents` (always > 0 when called by workflows).
    async fn process_refund(&self, amount_cents: i64) -> Result<(), BillingError>;
}

#[async_trait]
impl<B> BillingClient for Arc<B>
where
    B: BillingClient + ?Sized,
{
    async fn validate_customer(&self, customer_id: &CustomerId) -> Result<(), BillingError> {
        (**self).validate_customer(customer_id).await
    }

    async fn process_refund(&self, amount_cents: i64) -> Result<(), BillingError> {
        (**self).process_refund(amount_cents).await
    }
}
