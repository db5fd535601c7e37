//! Catalog records: businesses and the deals they publish
use std::cmp::Ordering;

use chrono::{DateTime, TimeZone, Utc};

use crate::money::Money;

#[derive(Debug, PartialEq, Eq, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

// Ordering delegates to the inner instant; a derive would demand `Utc: Ord`,
// which chrono's zone markers do not implement.
impl PartialOrd for TimeStamp<Utc> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TimeStamp<Utc> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Business {
    #[n(0)]
    pub id: String, // bech32-encoded uuid7, "biz" prefix
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub owner_id: String, // verified vendor identity from the auth collaborator
    #[n(3)]
    pub monthly_allowance: Option<u32>, // None means unlimited issuance
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DealStatus {
    #[n(0)]
    Inactive,
    #[n(1)]
    Active,
    #[n(2)]
    Archived,
}

/// A time-bounded discount offer published by a business. Vouchers may only be
/// issued while the deal is `Active`.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Deal {
    #[n(0)]
    pub id: String, // bech32-encoded uuid7, "deal" prefix
    #[n(1)]
    pub business_id: String,
    #[n(2)]
    pub title: String,
    #[n(3)]
    pub status: DealStatus,
    #[n(4)]
    pub original_value: Money,
    #[n(5)]
    pub deal_price: Money,
    #[n(6)]
    pub redeem_from: Option<TimeStamp<Utc>>,
    #[n(7)]
    pub redeem_until: Option<TimeStamp<Utc>>, // becomes the voucher expiry
    #[n(8)]
    pub quantity_cap: Option<u32>,
    #[n(9)]
    pub issued_total: u32,
}

impl Deal {
    pub fn is_active(&self) -> bool {
        self.status == DealStatus::Active
    }
    pub fn sold_out(&self) -> bool {
        self.quantity_cap
            .is_some_and(|cap| self.issued_total >= cap)
    }
}
