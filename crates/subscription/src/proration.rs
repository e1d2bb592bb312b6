//! Prorated refund calculation.
//!
//! All amounts are integer cents. Division truncates, so any rounding error
//! lands in the customer's favour by at most one cent below the exact share,
//! and the result never exceeds the original price.

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};

/// Whole days between `start` and `now`, floored.
///
/// A clock running behind `start` yields zero rather than a negative count.
pub fn days_elapsed(start: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    let hours = (now - start).num_hours();
    if hours <= 0 {
        return 0;
    }
    hours / 24
}

/// Refund owed for the unused part of a billing cycle.
///
/// `days_elapsed` is clamped into `0..=cycle_days` before prorating, so a
/// cancellation after one full cycle refunds nothing.
pub fn prorated_refund(price_cents: i64, days_elapsed: i64, cycle_days: NonZeroU32) -> i64 {
    let cycle = i64::from(cycle_days.get());
    let used = days_elapsed.clamp(0, cycle);
    let unused = cycle - used;

    let refund = (i128::from(price_cents) * i128::from(unused)) / i128::from(cycle);

    // `unused <= cycle` keeps the quotient within `0..=price`.
    refund.clamp(0, i128::from(price_cents.max(0))) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn cycle(days: u32) -> NonZeroU32 {
        NonZeroU32::new(days).unwrap()
    }

    fn jan_first() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn thirty_day_cycle_reference_values() {
        let c = cycle(30);
        assert_eq!(prorated_refund(3000, 15, c), 1500);
        assert_eq!(prorated_refund(3000, 1, c), 2900);
        assert_eq!(prorated_refund(3000, 30, c), 0);
        assert_eq!(prorated_refund(3000, 45, c), 0);
        assert_eq!(prorated_refund(3000, 0, c), 3000);
        assert_eq!(prorated_refund(3000, 14, c), 1600);
    }

    #[test]
    fn truncates_fractional_cents() {
        // 1000 * 29 / 30 = 966.66..
        assert_eq!(prorated_refund(1000, 1, cycle(30)), 966);
    }

    #[test]
    fn days_elapsed_floors_partial_days() {
        let start = jan_first();
        assert_eq!(days_elapsed(start, start), 0);
        assert_eq!(days_elapsed(start, start + Duration::hours(23)), 0);
        assert_eq!(days_elapsed(start, start + Duration::hours(47)), 1);
        assert_eq!(days_elapsed(start, start + Duration::days(14)), 14);
    }

    #[test]
    fn days_elapsed_never_negative() {
        let start = jan_first();
        assert_eq!(days_elapsed(start, start - Duration::days(3)), 0);
        assert_eq!(days_elapsed(start, start - Duration::minutes(1)), 0);
    }

    #[test]
    fn huge_prices_do_not_overflow() {
        assert_eq!(prorated_refund(i64::MAX, 0, cycle(365)), i64::MAX);
        assert!(prorated_refund(i64::MAX, 1, cycle(365)) < i64::MAX);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: a refund is never negative and never exceeds the price.
        #[test]
        fn refund_is_bounded_by_price(
            price in 1i64..10_000_000i64,
            days in -1_000i64..1_000i64,
            cycle_days in 1u32..400u32,
        ) {
            let refund = prorated_refund(price, days, cycle(cycle_days));
            prop_assert!(refund >= 0);
            prop_assert!(refund <= price);
        }

        /// Property: using more of the cycle never increases the refund.
        #[test]
        fn refund_is_non_increasing_in_elapsed_days(
            price in 1i64..10_000_000i64,
            days in 0i64..400i64,
            cycle_days in 1u32..400u32,
        ) {
            let c = cycle(cycle_days);
            prop_assert!(prorated_refund(price, days + 1, c) <= prorated_refund(price, days, c));
        }

        /// Property: no time used means a full refund; a full cycle means none.
        #[test]
        fn cycle_boundaries(price in 1i64..10_000_000i64, cycle_days in 1u32..400u32) {
            let c = cycle(cycle_days);
            prop_assert_eq!(prorated_refund(price, 0, c), price);
            prop_assert_eq!(prorated_refund(price, i64::from(cycle_days), c), 0);
        }

        /// Property: a clock behind the start date is treated as zero elapsed days.
        #[test]
        fn clock_skew_behind_start_yields_zero_days(minutes_behind in 1i64..100_000i64) {
            let start = jan_first();
            prop_assert_eq!(days_elapsed(start, start - Duration::minutes(minutes_behind)), 0);
        }
    }
}
