use crate::money::Money;

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("business not found")]
    BusinessNotFound,
    #[error("deal not found")]
    DealNotFound,
    #[error("deal or business not found for the given validation reference")]
    ValidationNotFound,
    #[error("deal is not active")]
    DealNotActive,
    #[error("deal has reached its voucher quantity cap")]
    DealSoldOut,
    #[error("monthly voucher allowance exceeded ({issued} issued, {remaining} remaining)")]
    AllowanceExceeded { issued: u64, remaining: u64 },
    #[error("amount paid {paid} does not match deal price {price}")]
    AmountMismatch { paid: Money, price: Money },
    #[error("no issued voucher available for this deal")]
    NoVoucherAvailable,
    #[error("payment reference has already been used")]
    PaymentAlreadyUsed,
    #[error("voucher not found")]
    VoucherNotFound,
    #[error("voucher does not belong to the calling vendor's business")]
    OwnershipMismatch,
    #[error("voucher has already been redeemed")]
    AlreadyRedeemed,
    #[error("voucher is not in a redeemable state")]
    NotRedeemable,
    #[error("voucher has expired")]
    Expired,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("codec failure: {0}")]
    Codec(String),
    #[error("internal: {0}")]
    Internal(String),
    #[error(transparent)]
    Storage(#[from] sled::Error),
}
