//! Credit scoring: per-user profiles, the store that serializes their
//! updates, and the eligibility and pricing rules that read them.

pub mod eligibility;
pub mod profile;
pub mod store;
