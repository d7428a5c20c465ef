//! Randomized end-to-end runs of the lending engine.

pub mod portfolio;
