//! Installment schedule arithmetic.
//!
//! All math is integer with truncating division. Whatever truncation
//! leaves over is added to the final installment, so a schedule always
//! sums exactly to the amount it spreads.

use crate::core::{Amount, BPS_DENOMINATOR};
use crate::loan::model::{Installment, InstallmentStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const MONTHS_PER_YEAR: u128 = 12;

/// Derived amounts for a new loan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub principal_after_deposit: Amount,
    pub total_interest: Amount,
    /// Principal plus interest; the deposit is part of this.
    pub total_amount: Amount,
    /// Regular installment; the last one may be larger.
    pub monthly_amount: Amount,
}

impl LoanTerms {
    /// Sum of all installments: everything except the deposit.
    pub fn financed_amount(&self) -> Amount {
        self.principal_after_deposit + self.total_interest
    }
}

/// Simple interest on the financed part of the principal.
///
/// ```
/// use installment_engine::loan::schedule::compute_terms;
///
/// let terms = compute_terms(1_200, 0, 12, 1_200);
/// assert_eq!(terms.total_interest, 144);
/// assert_eq!(terms.monthly_amount, 112);
/// ```
pub fn compute_terms(
    principal: Amount,
    deposit: Amount,
    term_months: u32,
    rate_bps: u32,
) -> LoanTerms {
    let principal_after_deposit = principal.saturating_sub(deposit);
    let months = term_months.max(1) as u128;
    let total_interest =
        principal_after_deposit * rate_bps as u128 * months / (BPS_DENOMINATOR * MONTHS_PER_YEAR);
    let monthly_amount = (principal_after_deposit + total_interest) / months;
    LoanTerms {
        principal_after_deposit,
        total_interest,
        total_amount: principal + total_interest,
        monthly_amount,
    }
}

/// Interest avoided by paying `amount` early with `remaining_months` left.
/// Informational only; nothing is re-priced.
pub fn interest_saved(amount: Amount, rate_bps: u32, remaining_months: u32) -> Amount {
    amount * rate_bps as u128 * remaining_months as u128 / (BPS_DENOMINATOR * MONTHS_PER_YEAR)
}

/// Spread `total` over `count` parts; the last part absorbs the remainder.
pub fn split_evenly(total: Amount, count: usize) -> Vec<Amount> {
    if count == 0 {
        return Vec::new();
    }
    let each = total / count as u128;
    let mut parts = vec![each; count];
    if let Some(last) = parts.last_mut() {
        *last += total - each * count as u128;
    }
    parts
}

/// Build `term_months` pending installments at a fixed cadence after `start`.
pub fn build_schedule(
    start: DateTime<Utc>,
    interval_days: i64,
    term_months: u32,
    financed: Amount,
) -> Vec<Installment> {
    split_evenly(financed, term_months as usize)
        .into_iter()
        .enumerate()
        .map(|(i, amount)| {
            let number = i as u32 + 1;
            Installment {
                number,
                due_at: start + Duration::days(interval_days * number as i64),
                amount,
                status: InstallmentStatus::Pending,
                paid_at: None,
                reference: None,
            }
        })
        .collect()
}

/// Redistribute `remaining` flat over every unpaid installment.
pub fn reamortize(installments: &mut [Installment], remaining: Amount) {
    let mut unpaid: Vec<&mut Installment> = installments
        .iter_mut()
        .filter(|i| i.status.is_outstanding())
        .collect();
    let parts = split_evenly(remaining, unpaid.len());
    for (installment, amount) in unpaid.iter_mut().zip(parts) {
        installment.amount = amount;
    }
}
