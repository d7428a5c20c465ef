use crate::core::account::AccountId;
use crate::core::error::{LendingError, Result};
use crate::core::Amount;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunable parameters of the engine.
///
/// Every field has a default, so a JSON override file only needs the
/// keys it wants to change.
///
/// # Examples
///
/// ```
/// use installment_engine::core::config::EngineConfig;
///
/// let config: EngineConfig = serde_json::from_str(r#"{ "grace_period_days": 5 }"#).unwrap();
/// assert_eq!(config.grace_period_days, 5);
/// assert_eq!(config.late_fee_bps, 500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Account allowed to default loans and verify users.
    pub admin: AccountId,
    /// Token account holding pooled liquidity.
    pub pool_account: AccountId,
    /// Token account holding borrower deposits until refund.
    pub escrow_account: AccountId,
    /// Days between consecutive installment due dates.
    pub installment_interval_days: i64,
    /// Days after a due date before a late fee accrues.
    pub grace_period_days: i64,
    /// Late fee in basis points of the installment amount.
    pub late_fee_bps: u32,
    /// Credit limit scale at a perfect score with neutral history.
    pub credit_base_unit: Amount,
    /// Smallest accepted liquidity deposit.
    pub minimum_liquidity: Amount,
    /// Share of each repayment booked as pool interest, in basis points.
    pub repayment_yield_bps: u32,
    pub min_term_months: u32,
    pub max_term_months: u32,
    /// Largest deposit a borrower may put down, in basis points of principal.
    pub max_deposit_bps: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            admin: AccountId::new("admin"),
            pool_account: AccountId::new("liquidity-pool"),
            escrow_account: AccountId::new("deposit-escrow"),
            installment_interval_days: 30,
            grace_period_days: 3,
            late_fee_bps: 500,
            credit_base_unit: 10_000,
            minimum_liquidity: 100,
            repayment_yield_bps: 100,
            min_term_months: 1,
            max_term_months: 36,
            max_deposit_bps: 5_000,
        }
    }
}

impl EngineConfig {
    /// Read overrides from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            LendingError::validation(format!("cannot read config '{}': {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| LendingError::validation(format!("invalid config JSON: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.installment_interval_days <= 0 {
            return Err(LendingError::validation(
                "installment interval must be at least one day",
            ));
        }
        if self.grace_period_days < 0 {
            return Err(LendingError::validation("grace period cannot be negative"));
        }
        if self.min_term_months == 0 || self.min_term_months > self.max_term_months {
            return Err(LendingError::validation(format!(
                "invalid term range {}..={}",
                self.min_term_months, self.max_term_months
            )));
        }
        if self.max_deposit_bps >= 10_000 {
            return Err(LendingError::validation(
                "maximum deposit must stay below 100% of principal",
            ));
        }
        if self.pool_account == self.escrow_account {
            return Err(LendingError::validation(
                "pool and escrow accounts must differ",
            ));
        }
        Ok(())
    }
}
