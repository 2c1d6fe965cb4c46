//! Phone OTP authentication service.
//!
//! Issues short-lived SMS verification codes, verifies them under
//! expiry/attempt/single-use invariants, registers accounts, authenticates
//! returning users, and mints signed session cookies.

pub mod api;
pub mod cli;
pub mod token;
