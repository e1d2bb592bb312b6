use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use submgr_core::{CustomerId, PlanId, SubscriptionId};
use submgr_events::Event;

/// Event: SubscriptionCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCreated {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    pub plan_id: PlanId,
    /// Price in smallest currency unit (cents).
    pub price_cents: i64,
    pub created_at: DateTime<Utc>,
}

/// Event: SubscriptionCancelled.
///
/// Carries everything the refund processor needs, so it never has to
/// re-read the aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionCancelled {
    pub subscription_id: SubscriptionId,
    pub customer_id: CustomerId,
    /// Prorated refund in smallest currency unit (cents).
    pub refund_cents: i64,
    pub cancelled_at: DateTime<Utc>,
}

impl SubscriptionCreated {
    pub const EVENT_TYPE: &'static str = "subscription.created";
}

impl SubscriptionCancelled {
    pub const EVENT_TYPE: &'static str = "subscription.cancelled";
}

impl Event for SubscriptionCreated {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn aggregate_id(&self) -> &str {
        self.subscription_id.as_str()
    }
}

impl Event for SubscriptionCancelled {
    fn event_type(&self) -> &'static str {
        Self::EVENT_TYPE
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.cancelled_at
    }

    fn aggregate_id(&self) -> &str {
        self.subscription_id.as_str()
    }
}
