use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{Span, info, instrument};

use submgr_core::{Clock, CustomerId, DomainError, PlanId, SubscriptionId};
use submgr_subscription::{Subscription, SubscriptionCreated};

use crate::deadline::Deadline;
use crate::ports::{BillingClient, BillingError, SubscriptionRepository};

use super::error::WorkflowError;

/// Input for [`CreateSubscription::execute`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSubscriptionRequest {
    pub customer_id: CustomerId,
    pub plan_id: PlanId,
    pub price_cents: i64,
}

/// Create a subscription after billing confirms the customer.
///
/// All-or-nothing: nothing is written unless the eligibility check and
/// construction succeed, and the single insert either commits or does not.
pub struct CreateSubscription<R, B> {
    repository: R,
    billing: B,
    clock: Arc<dyn Clock>,
}

impl<R, B> CreateSubscription<R, B>
where
    R: SubscriptionRepository,
    B: BillingClient,
{
    pub fn new(repository: R, billing: B, clock: Arc<dyn Clock>) -> Self {
        Self {
            repository,
            billing,
            clock,
        }
    }

    #[instrument(
        skip(self, request, deadline),
        fields(
            customer_id = %request.customer_id,
            plan_id = %request.plan_id,
            price_cents = request.price_cents,
            subscription_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn execute(
        &self,
        request: CreateSubscriptionRequest,
        deadline: Deadline,
    ) -> Result<(Subscription, SubscriptionCreated), WorkflowError> {
        let CreateSubscriptionRequest {
            customer_id,
            plan_id,
            price_cents,
        } = request;

        deadline
            .run("validate_customer", self.billing.validate_customer(&customer_id))
            .await
            .map_err(|e| match e {
                BillingError::CustomerRejected(id) => {
                    WorkflowError::Domain(DomainError::invalid_customer(format!("customer {id} is not eligible")))
                }
                source => WorkflowError::Billing {
                    operation: "validate_customer",
                    context: format!("customer {customer_id}"),
                    source,
                },
            })?;

        let id = SubscriptionId::generate();
        Span::current().record("subscription_id", id.as_str());

        let (subscription, event) = Subscription::create(id, customer_id, plan_id, price_cents, &*self.clock)?;

        let write = self
            .repository
            .save(&subscription)
            .map_err(|e| WorkflowError::repository("save", subscription.id(), e))?;

        deadline
            .run("apply", self.repository.apply(vec![write]))
            .await
            .map_err(|e| WorkflowError::repository("apply", subscription.id(), e))?;

        info!(
            subscription_id = %subscription.id(),
            customer_id = %subscription.customer_id(),
            price_cents = subscription.price_cents(),
            "subscription created"
        );

        Ok((subscription, event))
    }
}
