//! Voucher lifecycle records and the append-only rows that hang off them
use chrono::{DateTime, Utc};

use crate::deal::TimeStamp;
use crate::money::Money;

/// Stored voucher status. Transitions are strictly monotonic:
/// `Issued -> Assigned -> Redeemed`, never backwards. Expiry is a derived
/// condition of `expires_at` against the current time, not a stored state.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoucherStatus {
    #[n(0)]
    Issued,
    #[n(1)]
    Assigned,
    #[n(2)]
    Redeemed,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Voucher {
    #[n(0)]
    pub token: String, // bech32-encoded uuid7, "vch" prefix; the redemption token
    #[n(1)]
    pub deal_id: String,
    #[n(2)]
    pub business_id: String,
    #[n(3)]
    pub status: VoucherStatus,
    #[n(4)]
    pub issued_at: TimeStamp<Utc>,
    #[n(5)]
    pub expires_at: Option<TimeStamp<Utc>>,
    #[n(6)]
    pub redeemed_at: Option<TimeStamp<Utc>>,
}

impl Voucher {
    /// A voucher is expired once `now` reaches `expires_at`. Redemption
    /// requires the current time to be strictly before the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at
            .as_ref()
            .is_some_and(|at| at.to_datetime_utc() <= now)
    }
    /// Eligible for purchase assignment: still issued and not yet expired.
    pub fn is_assignable(&self, now: DateTime<Utc>) -> bool {
        self.status == VoucherStatus::Issued && !self.is_expired(now)
    }
}

/// 1:1 mapping from an externally supplied reference to the voucher its
/// issuance produced. Written in the same transaction as the voucher, so a
/// record without a voucher is never observable.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct IdempotencyRecord {
    #[n(0)]
    pub reference: String,
    #[n(1)]
    pub voucher_token: String,
    #[n(2)]
    pub business_id: String,
    #[n(3)]
    pub deal_id: String,
    #[n(4)]
    pub registered_at: TimeStamp<Utc>,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Purchase {
    #[n(0)]
    pub id: String, // bech32-encoded uuid7, "pur" prefix
    #[n(1)]
    pub customer_id: String,
    #[n(2)]
    pub deal_id: String,
    #[n(3)]
    pub voucher_token: String,
    #[n(4)]
    pub payment_reference: String, // opaque provider reference, unique system-wide
    #[n(5)]
    pub amount_paid: Money,
    #[n(6)]
    pub purchased_at: TimeStamp<Utc>,
}

/// Immutable record of the terminal transition. The value fields snapshot the
/// deal at redemption time and are decoupled from any later deal edits.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    #[n(0)]
    pub voucher_token: String,
    #[n(1)]
    pub deal_id: String,
    #[n(2)]
    pub business_id: String,
    #[n(3)]
    pub vendor_id: String,
    #[n(4)]
    pub redeemed_at: TimeStamp<Utc>,
    #[n(5)]
    pub original_value: Money,
    #[n(6)]
    pub deal_price: Money,
}
