use crate::core::account::AccountId;
use crate::core::{bps_to_percent, Amount, BPS_DENOMINATOR};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lowest possible credit score.
pub const MIN_SCORE: u16 = 300;

/// Highest possible credit score.
pub const MAX_SCORE: u16 = 850;

/// Score given to a user on their first loan.
pub const DEFAULT_SCORE: u16 = 650;

/// What a payment was for, as recorded in loan history and credit stats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentType {
    Deposit,
    Installment,
    EarlyPayment,
    LateFee,
}

/// Why a score moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScoreReason {
    OnTimePayment,
    LatePayment,
    LoanCompleted,
    LoanDefaulted,
}

impl ScoreReason {
    /// Signed score delta applied for this reason.
    pub fn delta(self) -> i32 {
        match self {
            Self::OnTimePayment => 2,
            Self::LatePayment => -10,
            Self::LoanCompleted => 10,
            Self::LoanDefaulted => -100,
        }
    }
}

/// Audit entry written on every score update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreChange {
    pub before: u16,
    pub after: u16,
    pub reason: ScoreReason,
    pub at: DateTime<Utc>,
}

/// Per-user creditworthiness record.
///
/// Counters keep `active_loans == total_loans - completed_loans -
/// defaulted_loans`; the score never leaves `[MIN_SCORE, MAX_SCORE]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditProfile {
    pub owner: AccountId,
    pub credit_score: u16,
    pub total_loans: u32,
    pub active_loans: u32,
    pub completed_loans: u32,
    pub defaulted_loans: u32,
    pub total_financed: Amount,
    /// Share of payments made on time, in basis points.
    pub on_time_payment_rate: u32,
    pub total_payments: u32,
    pub on_time_payments: u32,
    pub joined_at: DateTime<Utc>,
    pub verified: bool,
    pub score_history: Vec<ScoreChange>,
}

impl CreditProfile {
    pub fn new(owner: AccountId, joined_at: DateTime<Utc>) -> Self {
        Self {
            owner,
            credit_score: DEFAULT_SCORE,
            total_loans: 0,
            active_loans: 0,
            completed_loans: 0,
            defaulted_loans: 0,
            total_financed: 0,
            on_time_payment_rate: BPS_DENOMINATOR as u32,
            total_payments: 0,
            on_time_payments: 0,
            joined_at,
            verified: false,
            score_history: Vec::new(),
        }
    }

    /// Move the score by `reason.delta()`, clamped, and log the change.
    /// Returns `(before, after)`.
    pub fn adjust_score(&mut self, reason: ScoreReason, at: DateTime<Utc>) -> (u16, u16) {
        let before = self.credit_score;
        let after = (before as i32 + reason.delta()).clamp(MIN_SCORE as i32, MAX_SCORE as i32) as u16;
        self.credit_score = after;
        self.score_history.push(ScoreChange {
            before,
            after,
            reason,
            at,
        });
        (before, after)
    }

    pub fn record_payment(&mut self, on_time: bool) {
        self.total_payments += 1;
        if on_time {
            self.on_time_payments += 1;
        }
        self.on_time_payment_rate =
            (self.on_time_payments as u64 * BPS_DENOMINATOR as u64 / self.total_payments as u64) as u32;
    }

    pub fn open_loan(&mut self, principal: Amount) {
        self.total_loans += 1;
        self.active_loans += 1;
        self.total_financed += principal;
    }

    pub fn close_completed(&mut self) {
        self.active_loans = self.active_loans.saturating_sub(1);
        self.completed_loans += 1;
    }

    pub fn close_defaulted(&mut self) {
        self.active_loans = self.active_loans.saturating_sub(1);
        self.defaulted_loans += 1;
    }

    /// Whether the loan counters agree with each other.
    pub fn is_consistent(&self) -> bool {
        self.completed_loans + self.defaulted_loans <= self.total_loans
            && self.active_loans == self.total_loans - self.completed_loans - self.defaulted_loans
    }

    pub fn on_time_percent(&self) -> Decimal {
        bps_to_percent(self.on_time_payment_rate as u128)
    }
}
