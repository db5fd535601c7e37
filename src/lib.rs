pub mod allowance;
pub mod audit;
pub mod clock;
pub mod deal;
pub mod error;
pub mod money;
pub mod service;
pub mod store;
pub mod utils;
pub mod voucher;
