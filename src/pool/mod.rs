//! Pooled liquidity that funds merchant disbursements and pays
//! providers a utilization-linked yield.

pub mod liquidity;
