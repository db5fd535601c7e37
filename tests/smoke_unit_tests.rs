//! Smoke screen unit tests for the voucher engine components
//!
//! These tests span the codebase, testing behavior in isolation from the
//! end-to-end scenarios. They are intended as smoke-screen coverage and
//! generally test the happy path of each component.

use chrono::{TimeZone, Utc};

use voucher_engine::{
    allowance::{decide, month_window},
    audit::{AuditAction, AuditEntry},
    deal::TimeStamp,
    money::Money,
    utils::new_uuid_to_bech32,
    voucher::{Voucher, VoucherStatus},
};

// UTILS MODULE TESTS
#[cfg(test)]
mod utils_tests {
    use super::*;

    /// new_uuid_to_bech32 generates valid bech32-encoded strings with the
    /// correct human-readable prefix
    #[test]
    fn generates_valid_bech32_with_hrp() {
        let result = new_uuid_to_bech32("vch");
        assert!(result.is_ok());

        let encoded = result.unwrap();
        assert!(encoded.starts_with("vch1"));
        assert!(encoded.len() > 10);
    }

    #[test]
    fn handles_empty_hrp() {
        // Empty string should fail
        let result = new_uuid_to_bech32("");
        assert!(result.is_err());
    }

    /// Multiple calls generate unique identifiers
    #[test]
    fn generates_unique_ids() {
        let id1 = new_uuid_to_bech32("vch").unwrap();
        let id2 = new_uuid_to_bech32("vch").unwrap();
        let id3 = new_uuid_to_bech32("vch").unwrap();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    /// Different HRPs produce different encoded strings
    #[test]
    fn different_hrps_produce_different_encodings() {
        let voucher_token = new_uuid_to_bech32("vch").unwrap();
        let business_id = new_uuid_to_bech32("biz").unwrap();

        assert!(voucher_token.starts_with("vch"));
        assert!(business_id.starts_with("biz"));
        assert_ne!(voucher_token, business_id);
    }
}

// MONEY MODULE TESTS
#[cfg(test)]
mod money_tests {
    use super::*;

    #[test]
    fn minor_units_survive_formatting() {
        let price = Money::parse("9.99").unwrap();
        assert_eq!(price.minor(), 999);
        assert_eq!(price.to_string(), "9.99");
    }

    #[test]
    fn comparison_is_exact_integer_equality() {
        // the classic float trap: 0.1 + 0.2
        let a = Money::parse("0.10").unwrap();
        let b = Money::parse("0.20").unwrap();
        let sum = Money::from_minor(a.minor() + b.minor());

        assert_eq!(sum, Money::parse("0.30").unwrap());
    }
}

// ALLOWANCE MODULE TESTS
#[cfg(test)]
mod allowance_tests {
    use super::*;

    #[test]
    fn window_is_calendar_month_not_rolling() {
        // late in a 31-day month: a rolling 30-day window would reach into
        // February, the calendar window must not
        let now = Utc.with_ymd_and_hms(2026, 3, 31, 18, 0, 0).unwrap();
        let (start, end) = month_window(now);

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn decision_reports_count_and_remaining() {
        let decision = decide(Some(10), 7, 1);
        assert!(decision.allowed);
        assert_eq!(decision.current_month_issued, 7);
        assert_eq!(decision.remaining, Some(3));
    }
}

// VOUCHER MODULE TESTS
#[cfg(test)]
mod voucher_tests {
    use super::*;

    #[test]
    fn assignability_tracks_status_and_expiry() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let mut voucher = Voucher {
            token: "vch1smoke".into(),
            deal_id: "deal1smoke".into(),
            business_id: "biz1smoke".into(),
            status: VoucherStatus::Issued,
            issued_at: TimeStamp::from(now),
            expires_at: Some(TimeStamp::new_with(2026, 3, 20, 0, 0, 0)),
            redeemed_at: None,
        };

        assert!(voucher.is_assignable(now));

        voucher.status = VoucherStatus::Redeemed;
        assert!(!voucher.is_assignable(now));

        voucher.status = VoucherStatus::Issued;
        let past_expiry = Utc.with_ymd_and_hms(2026, 3, 20, 0, 0, 0).unwrap();
        assert!(voucher.is_expired(past_expiry));
        assert!(!voucher.is_assignable(past_expiry));
    }
}

// AUDIT MODULE TESTS
#[cfg(test)]
mod audit_tests {
    use super::*;

    #[test]
    fn sealing_round_trips_through_cbor() {
        let entry = AuditEntry::new(
            "vch1smoke".into(),
            "biz1smoke".into(),
            TimeStamp::new_with(2026, 3, 10, 12, 0, 0),
            AuditAction::Redeemed {
                vendor_id: "user1smoke".into(),
            },
        );

        let (hash, cbor) = entry.seal().unwrap();
        assert_eq!(hash.len(), 64); // hex-encoded sha256

        let decoded: AuditEntry = minicbor::decode(&cbor).unwrap();
        assert_eq!(entry, decoded);
    }
}
