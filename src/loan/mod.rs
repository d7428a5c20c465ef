//! Loan records, schedule math and the lifecycle engine.

pub mod engine;
pub mod model;
pub mod schedule;
