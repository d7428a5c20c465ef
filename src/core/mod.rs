//! Foundational types shared by every subsystem: identifiers, errors,
//! configuration, and the external collaborators (token ledger, clock,
//! event sink) the engine is driven through.

pub mod account;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;

/// Token amount in indivisible base units.
pub type Amount = u128;

/// 100% expressed in basis points.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Convert a basis-point figure to a percentage for display.
pub fn bps_to_percent(bps: u128) -> rust_decimal::Decimal {
    rust_decimal::Decimal::from_i128_with_scale(bps as i128, 2)
}
