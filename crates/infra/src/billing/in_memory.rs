use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use submgr_core::CustomerId;

use crate::ports::{BillingClient, BillingError};

/// In-memory billing for tests/dev.
///
/// Accepts every customer unless an eligibility list is given. Refund
/// outcomes can be scripted: queued errors are returned one per call before
/// calls start succeeding again.
#[derive(Debug, Default)]
pub struct InMemoryBillingClient {
    eligible: Option<HashSet<CustomerId>>,
    scripted_failures: Mutex<VecDeque<BillingError>>,
    settled: Mutex<Vec<i64>>,
    refund_calls: AtomicUsize,
    refund_delay: Option<Duration>,
    validate_delay: Option<Duration>,
}

impl InMemoryBillingClient {
    /// Billing that accepts every customer.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Billing that only accepts the given customers.
    pub fn with_eligible<I, C>(customers: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<CustomerId>,
    {
        Self {
            eligible: Some(customers.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Delay every refund call (for deadline tests).
    pub fn with_refund_delay(mut self, delay: Duration) -> Self {
        self.refund_delay = Some(delay);
        self
    }

    /// Delay every eligibility check (for deadline tests).
    pub fn with_validate_delay(mut self, delay: Duration) -> Self {
        self.validate_delay = Some(delay);
        self
    }

    /// Queue errors for the next refund calls, in order.
    pub fn fail_next_refunds(&self, errors: impl IntoIterator<Item = BillingError>) {
        if let Ok(mut queue) = self.scripted_failures.lock() {
            queue.extend(errors);
        }
    }

    /// Amounts of successfully settled refunds, in call order.
    pub fn settled_refunds(&self) -> Vec<i64> {
        self.settled.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// Every refund call made, successful or not.
    pub fn refund_calls(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BillingClient for InMemoryBillingClient {
    async fn validate_customer(&self, customer_id: &CustomerId) -> Result<(), BillingError> {
        if let Some(delay) = self.validate_delay {
            tokio::time::sleep(delay).await;
        }

        match &self.eligible {
            Some(eligible) if !eligible.contains(customer_id) => {
                Err(BillingError::CustomerRejected(customer_id.clone()))
            }
            _ => Ok(()),
        }
    }

    async fn process_refund(&self, amount_cents: i64) -> Result<(), BillingError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);

        if let Some(delay) = self.refund_delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .scripted_failures
            .lock()
            .map_err(|_| BillingError::Transient("billing state poisoned".to_string()))?
            .pop_front();
        if let Some(err) = scripted {
            return Err(err);
        }

        self.settled
            .lock()
            .map_err(|_| BillingError::Transient("billing state poisoned".to_string()))?
            .push(amount_cents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eligibility_list_is_enforced() {
        let billing = InMemoryBillingClient::with_eligible(["cust-123"]);
        billing.validate_customer(&CustomerId::new("cust-123")).await.unwrap();

        let err = billing
            .validate_customer(&CustomerId::new("cust-999"))
            .await
            .unwrap_err();
        assert_eq!(err, BillingError::CustomerRejected(CustomerId::new("cust-999")));
    }

    #[tokio::test]
    async fn scripted_failures_run_before_success() {
        let billing = InMemoryBillingClient::accept_all();
        billing.fail_next_refunds([BillingError::Transient("503".to_string())]);

        assert!(billing.process_refund(1600).await.is_err());
        billing.process_refund(1600).await.unwrap();

        assert_eq!(billing.refund_calls(), 2);
        assert_eq!(billing.settled_refunds(), vec![1600]);
    }
}
