//! Calendar-month issuance allowance
//!
//! Nothing here is persisted: the window is recomputed from the wall clock on
//! every check and the issued count is derived from voucher issuance
//! timestamps. Unused allowance from a prior month simply ceases to exist.
use chrono::{DateTime, Datelike, TimeZone, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllowanceDecision {
    pub allowed: bool,
    pub current_month_issued: u64,
    /// `None` means the business has no configured cap (unlimited issuance).
    pub remaining: Option<u64>,
}

/// Calendar-month bounds around `now`: the first instant of the month and the
/// first instant of the next month (exclusive upper bound). Not a rolling
/// 30-day window.
pub fn month_window(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .expect("first instant of a month is a valid utc timestamp");

    let (next_year, next_month) = if now.month() == 12 {
        (now.year() + 1, 1)
    } else {
        (now.year(), now.month() + 1)
    };
    let end = Utc
        .with_ymd_and_hms(next_year, next_month, 1, 0, 0, 0)
        .single()
        .expect("first instant of a month is a valid utc timestamp");

    (start, end)
}

pub fn decide(cap: Option<u32>, issued_this_month: u64, requested: u64) -> AllowanceDecision {
    match cap {
        None => AllowanceDecision {
            allowed: true,
            current_month_issued: issued_this_month,
            remaining: None,
        },
        Some(cap) => {
            let cap = u64::from(cap);
            AllowanceDecision {
                allowed: issued_this_month + requested <= cap,
                current_month_issued: issued_this_month,
                remaining: Some(cap.saturating_sub(issued_this_month)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_covers_the_whole_month() {
        let mid_march = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        let (start, end) = month_window(mid_march);

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
        assert!(start <= mid_march && mid_march < end);
    }

    #[test]
    fn december_rolls_into_january() {
        let new_years_eve = Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap();
        let (start, end) = month_window(new_years_eve);

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn unset_cap_always_allows() {
        let decision = decide(None, 1_000_000, 1);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, None);
    }

    #[test]
    fn cap_is_inclusive() {
        // 4 issued, cap 5: one more fits exactly
        assert!(decide(Some(5), 4, 1).allowed);
        // 5 issued, cap 5: denied, zero remaining
        let decision = decide(Some(5), 5, 1);
        assert!(!decision.allowed);
        assert_eq!(decision.current_month_issued, 5);
        assert_eq!(decision.remaining, Some(0));
    }
}
