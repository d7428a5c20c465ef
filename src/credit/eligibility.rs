//! Eligibility checks and risk-based pricing.
//!
//! Both functions are pure: they read a profile snapshot (or just a
//! score) and never touch shared state.

use crate::core::Amount;
use crate::credit::profile::{CreditProfile, MAX_SCORE};
use serde::{Deserialize, Serialize};

/// Scores below this are declined outright.
pub const MIN_ELIGIBLE_SCORE: u16 = 600;

/// Borrowers with more open loans than this are declined.
pub const MAX_ACTIVE_LOANS: u32 = 5;

/// Annual rate before any score or term adjustment.
pub const BASE_RATE_BPS: u32 = 1_200;

pub const REASON_SCORE_TOO_LOW: &str = "Credit score too low";
pub const REASON_TOO_MANY_LOANS: &str = "Too many active loans";
pub const REASON_ELIGIBLE: &str = "Eligible";

/// Outcome of an eligibility check. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EligibilityResult {
    pub eligible: bool,
    pub score: u16,
    /// Credit limit; zero when not eligible.
    pub max_amount: Amount,
    pub reason: String,
}

impl EligibilityResult {
    fn declined(score: u16, reason: &str) -> Self {
        Self {
            eligible: false,
            score,
            max_amount: 0,
            reason: reason.to_string(),
        }
    }
}

/// History multiplier in percent: 120 above 95% on-time, 110 above 90%,
/// otherwise 100.
fn history_multiplier_pct(on_time_rate_bps: u32) -> u128 {
    if on_time_rate_bps > 9_500 {
        120
    } else if on_time_rate_bps > 9_000 {
        110
    } else {
        100
    }
}

/// Decide whether `profile` may take a new loan and how large.
///
/// `max_amount = (score - 600) / (850 - 600) * base_unit * multiplier`,
/// evaluated with a single truncating division at the end.
///
/// # Examples
///
/// ```
/// use installment_engine::core::account::AccountId;
/// use installment_engine::credit::eligibility::verify_eligibility;
/// use installment_engine::credit::profile::CreditProfile;
///
/// let mut profile = CreditProfile::new(AccountId::new("bob"), Default::default());
/// profile.credit_score = 590;
/// let result = verify_eligibility(&profile, 10_000);
/// assert!(!result.eligible);
/// assert_eq!(result.reason, "Credit score too low");
/// assert_eq!(result.max_amount, 0);
/// ```
pub fn verify_eligibility(profile: &CreditProfile, base_unit: Amount) -> EligibilityResult {
    let score = profile.credit_score;
    if score < MIN_ELIGIBLE_SCORE {
        return EligibilityResult::declined(score, REASON_SCORE_TOO_LOW);
    }
    if profile.active_loans > MAX_ACTIVE_LOANS {
        return EligibilityResult::declined(score, REASON_TOO_MANY_LOANS);
    }

    let span = (MAX_SCORE - MIN_ELIGIBLE_SCORE) as u128;
    let above_floor = (score - MIN_ELIGIBLE_SCORE) as u128;
    let multiplier = history_multiplier_pct(profile.on_time_payment_rate);
    let max_amount = above_floor * base_unit * multiplier / (span * 100);

    EligibilityResult {
        eligible: true,
        score,
        max_amount,
        reason: REASON_ELIGIBLE.to_string(),
    }
}

/// Annual interest rate in basis points for a score and term.
///
/// Starts at 1200 bps. Score band: ×0.90 at 750+, ×0.95 at 700+,
/// ×1.10 below 650. Term: ×1.05 above 12 months, ×0.95 at 6 or fewer.
/// Each step truncates.
pub fn calculate_interest_rate(score: u16, term_months: u32) -> u32 {
    let mut rate = BASE_RATE_BPS;

    if score >= 750 {
        rate = rate * 90 / 100;
    } else if score >= 700 {
        rate = rate * 95 / 100;
    } else if score < 650 {
        rate = rate * 110 / 100;
    }

    if term_months > 12 {
        rate = rate * 105 / 100;
    } else if term_months <= 6 {
        rate = rate * 95 / 100;
    }

    rate
}
