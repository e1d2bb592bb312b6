use std::num::NonZeroU32;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use submgr_core::{Clock, CustomerId, DomainError, DomainResult, PlanId, SubscriptionId};

use crate::events::{SubscriptionCancelled, SubscriptionCreated};
use crate::proration::{days_elapsed, prorated_refund};

/// Aggregate type tag used in event envelopes.
pub const AGGREGATE_TYPE: &str = "subscription";

/// Subscription status lifecycle: `Active → Cancelled`, exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
}

impl SubscriptionStatus {
    /// Persisted representation (`ACTIVE` / `CANCELLED`).
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "ACTIVE",
            SubscriptionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SubscriptionStatus::Cancelled)
    }
}

impl core::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(SubscriptionStatus::Active),
            "CANCELLED" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("unknown subscription status '{other}'")),
        }
    }
}

/// Aggregate root: Subscription.
///
/// Fields are private; the only mutation after construction is [`Subscription::cancel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: SubscriptionId,
    customer_id: CustomerId,
    plan_id: PlanId,
    price_cents: i64,
    status: SubscriptionStatus,
    start_date: DateTime<Utc>,
}

impl Subscription {
    /// Create a new, active subscription starting now.
    ///
    /// Validation order: customer, plan, price.
    pub fn create(
        id: SubscriptionId,
        customer_id: CustomerId,
        plan_id: PlanId,
        price_cents: i64,
        clock: &dyn Clock,
    ) -> DomainResult<(Self, SubscriptionCreated)> {
        if customer_id.is_blank() {
            return Err(DomainError::invalid_customer("customer id cannot be empty"));
        }
        if plan_id.is_blank() {
            return Err(DomainError::invalid_plan("plan id cannot be empty"));
        }
        if price_cents <= 0 {
            return Err(DomainError::InvalidPrice(price_cents));
        }

        let now = clock.now();
        let event = SubscriptionCreated {
            subscription_id: id.clone(),
            customer_id: customer_id.clone(),
            plan_id: plan_id.clone(),
            price_cents,
            created_at: now,
        };

        let subscription = Self {
            id,
            customer_id,
            plan_id,
            price_cents,
            status: SubscriptionStatus::Active,
            start_date: now,
        };

        Ok((subscription, event))
    }

    /// Rehydrate from trusted storage.
    ///
    /// No invariant is re-checked: the row passed validation when it was first
    /// created. Only repository adapters should call this.
    pub fn reconstruct(
        id: SubscriptionId,
        customer_id: CustomerId,
        plan_id: PlanId,
        price_cents: i64,
        status: SubscriptionStatus,
        start_date: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            plan_id,
            price_cents,
            status,
            start_date,
        }
    }

    /// Cancel the subscription and compute the prorated refund.
    ///
    /// Fails with `AlreadyCancelled` (leaving state untouched) when the
    /// subscription is already in its terminal state.
    pub fn cancel(
        &mut self,
        clock: &dyn Clock,
        billing_cycle_days: NonZeroU32,
    ) -> DomainResult<SubscriptionCancelled> {
        if self.status.is_terminal() {
            return Err(DomainError::already_cancelled(self.id.as_str()));
        }

        let now = clock.now();
        let elapsed = days_elapsed(self.start_date, now);
        let refund_cents = prorated_refund(self.price_cents, elapsed, billing_cycle_days);

        self.status = SubscriptionStatus::Cancelled;

        Ok(SubscriptionCancelled {
            subscription_id: self.id.clone(),
            customer_id: self.customer_id.clone(),
            refund_cents,
            cancelled_at: now,
        })
    }

    pub fn id(&self) -> &SubscriptionId {
        &self.id
    }

    pub fn customer_id(&self) -> &CustomerId {
        &self.customer_id
    }

    pub fn plan_id(&self) -> &PlanId {
        &self.plan_id
    }

    pub fn price_cents(&self) -> i64 {
        self.price_cents
    }

    pub fn status(&self) -> SubscriptionStatus {
        self.status
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;
    use submgr_core::FixedClock;

    fn thirty_days() -> NonZeroU32 {
        NonZeroU32::new(30).unwrap()
    }

    fn jan_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn active(price_cents: i64, start: DateTime<Utc>) -> Subscription {
        Subscription::reconstruct(
            SubscriptionId::from("sub-123"),
            CustomerId::from("cust-456"),
            PlanId::from("plan-789"),
            price_cents,
            SubscriptionStatus::Active,
            start,
        )
    }

    #[test]
    fn create_emits_created_event() {
        let clock = FixedClock::new(jan_first());
        let (sub, event) = Subscription::create(
            SubscriptionId::from("sub-1"),
            CustomerId::from("cust-123"),
            PlanId::from("plan-premium"),
            3000,
            &clock,
        )
        .unwrap();

        assert_eq!(sub.status(), SubscriptionStatus::Active);
        assert_eq!(sub.start_date(), jan_first());
        assert_eq!(sub.price_cents(), 3000);

        assert_eq!(event.subscription_id, SubscriptionId::from("sub-1"));
        assert_eq!(event.customer_id, CustomerId::from("cust-123"));
        assert_eq!(event.plan_id, PlanId::from("plan-premium"));
        assert_eq!(event.price_cents, 3000);
        assert_eq!(event.created_at, jan_first());
    }

    #[test]
    fn create_rejects_invalid_input() {
        let clock = FixedClock::new(jan_first());
        let attempt = |customer: &str, plan: &str, price: i64| {
            Subscription::create(
                SubscriptionId::from("sub-1"),
                CustomerId::from(customer),
                PlanId::from(plan),
                price,
                &clock,
            )
        };

        assert!(matches!(attempt("", "plan", 100), Err(DomainError::InvalidCustomer(_))));
        assert!(matches!(attempt("cust", "", 100), Err(DomainError::InvalidPlan(_))));
        assert!(matches!(attempt("cust", "plan", 0), Err(DomainError::InvalidPrice(0))));
        assert!(matches!(attempt("cust", "plan", -1), Err(DomainError::InvalidPrice(-1))));
        // Customer is checked before plan and price.
        assert!(matches!(attempt("", "", 0), Err(DomainError::InvalidCustomer(_))));
    }

    #[test]
    fn cancel_after_fourteen_days_refunds_sixteen_days() {
        let mut sub = active(3000, jan_first());
        let cancel_at = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();

        let event = sub.cancel(&FixedClock::new(cancel_at), thirty_days()).unwrap();

        assert_eq!(event.refund_cents, 1600);
        assert_eq!(event.cancelled_at, cancel_at);
        assert_eq!(event.subscription_id, SubscriptionId::from("sub-123"));
        assert_eq!(event.customer_id, CustomerId::from("cust-456"));
        assert_eq!(sub.status(), SubscriptionStatus::Cancelled);
    }

    #[test]
    fn cancel_twice_is_rejected_and_leaves_state() {
        let mut sub = active(3000, jan_first());
        let clock = FixedClock::new(jan_first() + Duration::days(3));

        sub.cancel(&clock, thirty_days()).unwrap();
        let before = sub.clone();

        let err = sub.cancel(&clock, thirty_days()).unwrap_err();
        assert_eq!(err, DomainError::AlreadyCancelled("sub-123".to_string()));
        assert_eq!(sub, before);
    }

    #[test]
    fn cancel_with_clock_behind_start_refunds_everything() {
        let mut sub = active(3000, jan_first());
        let clock = FixedClock::new(jan_first() - Duration::days(2));

        let event = sub.cancel(&clock, thirty_days()).unwrap();
        assert_eq!(event.refund_cents, 3000);
    }

    #[test]
    fn cancel_reference_table() {
        for (days, expected) in [(15, 1500), (1, 2900), (30, 0), (45, 0), (0, 3000)] {
            let mut sub = active(3000, jan_first());
            let clock = FixedClock::new(jan_first() + Duration::days(days));
            let event = sub.cancel(&clock, thirty_days()).unwrap();
            assert_eq!(event.refund_cents, expected, "days elapsed: {days}");
        }
    }

    #[test]
    fn status_round_trips_through_persisted_form() {
        for status in [SubscriptionStatus::Active, SubscriptionStatus::Cancelled] {
            assert_eq!(status.as_str().parse::<SubscriptionStatus>().unwrap(), status);
        }
        assert!("PAUSED".parse::<SubscriptionStatus>().is_err());
        assert_eq!(
            serde_json::to_string(&SubscriptionStatus::Cancelled).unwrap(),
            "\"CANCELLED\""
        );
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: any valid input constructs an active subscription starting now.
        #[test]
        fn valid_input_always_constructs(
            customer in "[a-z0-9-]{1,24}",
            plan in "[a-z0-9-]{1,24}",
            price in 1i64..100_000_000i64,
            offset_secs in 0i64..10_000_000i64,
        ) {
            let now = jan_first() + Duration::seconds(offset_secs);
            let (sub, event) = Subscription::create(
                SubscriptionId::generate(),
                CustomerId::from(customer.as_str()),
                PlanId::from(plan.as_str()),
                price,
                &FixedClock::new(now),
            ).unwrap();

            prop_assert_eq!(sub.status(), SubscriptionStatus::Active);
            prop_assert_eq!(sub.start_date(), now);
            prop_assert_eq!(event.created_at, now);
        }

        /// Property: reconstructing from a created aggregate's fields is lossless.
        #[test]
        fn reconstruct_round_trips(
            customer in "[a-z0-9-]{1,24}",
            plan in "[a-z0-9-]{1,24}",
            price in 1i64..100_000_000i64,
        ) {
            let (original, _) = Subscription::create(
                SubscriptionId::generate(),
                CustomerId::from(customer.as_str()),
                PlanId::from(plan.as_str()),
                price,
                &FixedClock::new(jan_first()),
            ).unwrap();

            let rebuilt = Subscription::reconstruct(
                original.id().clone(),
                original.customer_id().clone(),
                original.plan_id().clone(),
                original.price_cents(),
                original.status(),
                original.start_date(),
            );

            prop_assert_eq!(rebuilt.id(), original.id());
            prop_assert_eq!(rebuilt.customer_id(), original.customer_id());
            prop_assert_eq!(rebuilt.plan_id(), original.plan_id());
            prop_assert_eq!(rebuilt.price_cents(), original.price_cents());
            prop_assert_eq!(rebuilt.status(), original.status());
            prop_assert_eq!(rebuilt.start_date(), original.start_date());
        }

        /// Property: a blank customer is rejected first, whatever the plan and price.
        #[test]
        fn blank_customer_always_rejected(
            customer in "[ \t]{0,8}",
            plan in "[ a-z0-9-]{0,24}",
            price in any::<i64>(),
        ) {
            let result = Subscription::create(
                SubscriptionId::generate(),
                CustomerId::from(customer.as_str()),
                PlanId::from(plan.as_str()),
                price,
                &FixedClock::new(jan_first()),
            );
            prop_assert!(matches!(result, Err(DomainError::InvalidCustomer(_))));
        }

        /// Property: with a valid customer, a blank plan is rejected before the price.
        #[test]
        fn blank_plan_always_rejected(
            customer in "[a-z0-9-]{1,24}",
            plan in "[ \t]{0,8}",
            price in any::<i64>(),
        ) {
            let result = Subscription::create(
                SubscriptionId::generate(),
                CustomerId::from(customer.as_str()),
                PlanId::from(plan.as_str()),
                price,
                &FixedClock::new(jan_first()),
            );
            prop_assert!(matches!(result, Err(DomainError::InvalidPlan(_))));
        }

        /// Property: non-positive prices are always rejected.
        #[test]
        fn non_positive_price_rejected(price in i64::MIN..=0i64) {
            let result = Subscription::create(
                SubscriptionId::generate(),
                CustomerId::from("cust"),
                PlanId::from("plan"),
                price,
                &FixedClock::new(jan_first()),
            );
            prop_assert_eq!(result.unwrap_err(), DomainError::InvalidPrice(price));
        }
    }
}
