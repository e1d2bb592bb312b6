use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::Row;

use submgr_core::{CustomerId, PlanId, SubscriptionId};
use submgr_subscription::{Subscription, SubscriptionStatus};

use crate::ports::RepositoryError;

/// Persisted row shape for a subscription.
///
/// `status` is kept as its stored string so a bad value surfaces as
/// `RepositoryError::Corrupt` at rehydration instead of failing the row decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: String,
    pub customer_id: String,
    pub plan_id: String,
    pub price_cents: i64,
    pub status: String,
    pub start_date: DateTime<Utc>,
}

impl From<&Subscription> for SubscriptionRecord {
    fn from(subscription: &Subscription) -> Self {
        Self {
            id: subscription.id().as_str().to_string(),
            customer_id: subscription.customer_id().as_str().to_string(),
            plan_id: subscription.plan_id().as_str().to_string(),
            price_cents: subscription.price_cents(),
            status: subscription.status().as_str().to_string(),
            start_date: subscription.start_date(),
        }
    }
}

impl TryFrom<SubscriptionRecord> for Subscription {
    type Error = RepositoryError;

    fn try_from(record: SubscriptionRecord) -> Result<Self, Self::Error> {
        let status: SubscriptionStatus = record
            .status
            .parse()
            .map_err(|reason| RepositoryError::Corrupt {
                id: record.id.clone(),
                reason,
            })?;

        Ok(Subscription::reconstruct(
            SubscriptionId::new(record.id),
            CustomerId::new(record.customer_id),
            PlanId::new(record.plan_id),
            record.price_cents,
            status,
            record.start_date,
        ))
    }
}

impl<'r> sqlx::FromRow<'r, sqlx::postgres::PgRow> for SubscriptionRecord {
    fn from_row(row: &'r sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        Ok(SubscriptionRecord {
            id: row.try_get("id")?,
            customer_id: row.try_get("customer_id")?,
            plan_id: row.try_get("plan_id")?,
            price_cents: row.try_get("price_cents")?,
            status: row.try_get("status")?,
            start_date: row.try_get("start_date")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use submgr_core::FixedClock;

    #[test]
    fn record_round_trips_through_the_aggregate() {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let (subscription, _) = Subscription::create(
            SubscriptionId::new("sub-123"),
            CustomerId::new("cust-456"),
            PlanId::new("plan-789"),
            3000,
            &clock,
        )
        .unwrap();

        let record = SubscriptionRecord::from(&subscription);
        assert_eq!(record.status, "ACTIVE");
        assert_eq!(record.price_cents, 3000);

        let restored = Subscription::try_from(record).unwrap();
        assert_eq!(restored, subscription);
    }

    #[test]
    fn unknown_status_is_reported_as_corrupt() {
        let record = SubscriptionRecord {
            id: "sub-1".to_string(),
            customer_id: "cust-1".to_string(),
            plan_id: "plan-1".to_string(),
            price_cents: 100,
            status: "PAUSED".to_string(),
            start_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        };

        match Subscription::try_from(record) {
            Err(RepositoryError::Corrupt { id, reason }) => {
                assert_eq!(id, "sub-1");
                assert!(reason.contains("PAUSED"));
            }
            other => panic!("expected Corrupt, got {other:?}"),
        }
    }
}
