//! Property-based tests for the engine's pure logic
//!
//! These cover the arithmetic the lifecycle depends on: fixed-point money
//! parsing, calendar-month window computation and allowance decisions.
//! Invariants here must hold for all inputs, not just the curated cases in
//! the scenario suite; a bug in the window math silently corrupts every
//! allowance decision, which is why it gets the proptest treatment.

use chrono::{DateTime, Datelike, Timelike, Utc};
use proptest::prelude::*;

use voucher_engine::allowance::{decide, month_window};
use voucher_engine::money::Money;

/// Strategy to generate an instant between 2020 and 2099
fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (1_577_836_800i64..4_102_444_800).prop_map(|secs| {
        DateTime::from_timestamp(secs, 0).expect("seconds range is within chrono bounds")
    })
}

proptest! {
    /// Property: formatting an amount and parsing it back is the identity.
    /// Monetary values must survive the trip through their display form
    /// without drift.
    #[test]
    fn prop_money_display_parse_round_trip(minor in 0u64..100_000_000_000_000) {
        let amount = Money::from_minor(minor);
        let reparsed = Money::parse(&amount.to_string()).unwrap();

        prop_assert_eq!(amount, reparsed);
    }

    /// Property: parsing never panics and junk with alphabetic characters is
    /// always rejected
    #[test]
    fn prop_money_rejects_non_numeric_input(input in "[0-9]{0,4}[a-z]{1,4}[0-9]{0,4}") {
        prop_assert!(Money::parse(&input).is_err());
    }

    /// Property: every instant falls inside its own month window, and the
    /// window starts at the first instant of a month
    #[test]
    fn prop_instant_lies_within_its_month_window(now in instant_strategy()) {
        let (start, end) = month_window(now);

        prop_assert!(start <= now);
        prop_assert!(now < end);
        prop_assert_eq!(start.day(), 1);
        prop_assert_eq!((start.hour(), start.minute(), start.second()), (0, 0, 0));
        prop_assert_eq!(start.month(), now.month());
        prop_assert_eq!(start.year(), now.year());
    }

    /// Property: month windows tile the timeline with no gap and no overlap.
    /// The exclusive end of one window is exactly the start of the next.
    #[test]
    fn prop_month_windows_abut(now in instant_strategy()) {
        let (_, end) = month_window(now);
        let (next_start, next_end) = month_window(end);

        prop_assert_eq!(next_start, end);
        prop_assert!(end < next_end);
    }

    /// Property: an unset cap always allows and never reports a remainder
    #[test]
    fn prop_unset_cap_is_unlimited(issued in 0u64..1_000_000, requested in 0u64..1_000) {
        let decision = decide(None, issued, requested);

        prop_assert!(decision.allowed);
        prop_assert_eq!(decision.remaining, None);
        prop_assert_eq!(decision.current_month_issued, issued);
    }

    /// Property: with a cap set, the decision is exactly
    /// `issued + requested <= cap` and the remainder never underflows
    #[test]
    fn prop_capped_decision_is_exact(
        cap in 0u32..10_000,
        issued in 0u64..20_000,
        requested in 0u64..100,
    ) {
        let decision = decide(Some(cap), issued, requested);

        prop_assert_eq!(decision.allowed, issued + requested <= u64::from(cap));
        prop_assert_eq!(
            decision.remaining,
            Some(u64::from(cap).saturating_sub(issued))
        );
    }
}
