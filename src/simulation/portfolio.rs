//! Random portfolio simulation.
//!
//! Funds a pool, then walks a population of random borrowers through
//! complete loan lifecycles: origination, deposit, scheduled or late
//! installments, early payoff and default. Useful for exercising the
//! engine end to end and for benchmarking.

use crate::core::account::{AccountId, LoanId};
use crate::core::clock::{Clock, ManualClock};
use crate::core::config::EngineConfig;
use crate::core::error::{LendingError, Result};
use crate::core::events::RecordingSink;
use crate::core::ledger::InMemoryTokenLedger;
use crate::core::Amount;
use crate::loan::model::LoanStatus;
use crate::manager::LoanManager;
use crate::pool::liquidity::PoolStats;
use chrono::Duration;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const START_EPOCH_SECS: i64 = 1_700_000_000;

/// Days past the due date a late borrower pays.
const LATE_BY_DAYS: i64 = 5;

/// Shape of a simulated portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub borrowers: usize,
    pub merchants: usize,
    pub providers: usize,
    /// Liquidity each provider deposits before lending starts.
    pub liquidity_per_provider: Amount,
    pub min_principal: Amount,
    pub max_principal: Amount,
    pub min_term_months: u32,
    pub max_term_months: u32,
    /// Deposit sizes to draw from, in basis points of principal.
    pub deposit_choices_bps: Vec<u32>,
    /// Chance per installment that the borrower pays after the grace window.
    pub late_probability: f64,
    /// Chance per installment that the borrower pays off the rest instead.
    pub early_payoff_probability: f64,
    /// Chance per installment that the borrower stops paying for good.
    pub default_probability: f64,
    /// Fixed seed for reproducible runs.
    pub seed: Option<u64>,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            borrowers: 50,
            merchants: 5,
            providers: 3,
            liquidity_per_provider: 50_000,
            min_principal: 200,
            max_principal: 2_000,
            min_term_months: 3,
            max_term_months: 12,
            deposit_choices_bps: vec![0, 1_000, 2_000],
            late_probability: 0.1,
            early_payoff_probability: 0.03,
            default_probability: 0.01,
            seed: None,
        }
    }
}

/// What happened over a simulated run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
    pub loans_created: usize,
    /// Borrowers turned away by eligibility.
    pub declined: usize,
    /// Loans cancelled because the pool could not fund them.
    pub unfunded: usize,
    pub completed: usize,
    pub early_payoffs: usize,
    pub defaulted: usize,
    pub installments_paid: usize,
    pub late_payments: usize,
    pub late_fees_collected: Amount,
    pub events_emitted: usize,
    pub pool: PoolStats,
    /// Token supply was unchanged by the run.
    pub supply_conserved: bool,
}

impl std::fmt::Display for PortfolioReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Portfolio Simulation ===")?;
        writeln!(f, "Loans Created:       {}", self.loans_created)?;
        writeln!(f, "Declined:            {}", self.declined)?;
        writeln!(f, "Unfunded:            {}", self.unfunded)?;
        writeln!(f, "Completed:           {}", self.completed)?;
        writeln!(f, "  of which early:    {}", self.early_payoffs)?;
        writeln!(f, "Defaulted:           {}", self.defaulted)?;
        writeln!(f, "Installments Paid:   {}", self.installments_paid)?;
        writeln!(f, "Late Payments:       {}", self.late_payments)?;
        writeln!(f, "Late Fees:           {}", self.late_fees_collected)?;
        writeln!(f, "Events:              {}", self.events_emitted)?;
        writeln!(f, "Supply Conserved:    {}", self.supply_conserved)?;
        writeln!(f)?;
        write!(f, "{}", self.pool)
    }
}

/// Run a random portfolio against a fresh in-memory engine.
pub fn run_portfolio(config: &PortfolioConfig, engine_config: EngineConfig) -> Result<PortfolioReport> {
    validate(config)?;
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let ledger = Arc::new(InMemoryTokenLedger::new());
    let clock = Arc::new(ManualClock::at_epoch(START_EPOCH_SECS));
    let sink = Arc::new(RecordingSink::new());
    let admin = engine_config.admin.clone();
    let interval = engine_config.installment_interval_days;
    let manager = LoanManager::new(engine_config, ledger.clone(), clock.clone(), sink.clone())?;

    let providers: Vec<AccountId> = (0..config.providers)
        .map(|i| AccountId::new(format!("LP-{:03}", i)))
        .collect();
    let merchants: Vec<AccountId> = (0..config.merchants)
        .map(|i| AccountId::new(format!("MERCHANT-{:03}", i)))
        .collect();
    let borrowers: Vec<AccountId> = (0..config.borrowers)
        .map(|i| AccountId::new(format!("BORROWER-{:04}", i)))
        .collect();

    for provider in &providers {
        ledger.mint(provider, config.liquidity_per_provider);
        manager.add_liquidity(provider, config.liquidity_per_provider)?;
    }
    // Enough to cover principal, interest and any late fees.
    for borrower in &borrowers {
        ledger.mint(borrower, config.max_principal * 2);
    }
    let supply_before = ledger.total_supply();

    let mut report = PortfolioReport::default();
    for borrower in &borrowers {
        let merchant = &merchants[rng.gen_range(0..merchants.len())];
        let limit = manager.verify_eligibility(borrower).max_amount;
        let principal = rng
            .gen_range(config.min_principal..=config.max_principal)
            .min(limit);
        let term = rng.gen_range(config.min_term_months..=config.max_term_months);
        let deposit_bps = config.deposit_choices_bps[rng.gen_range(0..config.deposit_choices_bps.len())];

        let id = match manager.create_loan(borrower, merchant, principal, term, deposit_bps) {
            Ok(id) => id,
            Err(LendingError::NotEligible(_)) | Err(LendingError::Validation(_)) => {
                report.declined += 1;
                continue;
            }
            Err(e) => return Err(e),
        };
        report.loans_created += 1;

        match manager.process_deposit(id) {
            Ok(()) => {}
            Err(LendingError::InsufficientLiquidity { .. }) => {
                manager.cancel_loan(borrower, id)?;
                report.unfunded += 1;
                continue;
            }
            Err(e) => return Err(e),
        }

        run_loan(&manager, &clock, &mut rng, config, &admin, interval, id, &mut report)?;
    }

    report.events_emitted = sink.events().len();
    report.pool = manager.get_pool_stats();
    report.supply_conserved = ledger.total_supply() == supply_before;
    info!(
        "portfolio finished: {} loans, {} completed, {} defaulted",
        report.loans_created, report.completed, report.defaulted
    );
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn run_loan(
    manager: &LoanManager,
    clock: &ManualClock,
    rng: &mut StdRng,
    config: &PortfolioConfig,
    admin: &AccountId,
    interval_days: i64,
    id: LoanId,
    report: &mut PortfolioReport,
) -> Result<()> {
    loop {
        let loan = manager.get_loan(id)?;
        if loan.status != LoanStatus::Active {
            return Ok(());
        }

        if rng.gen_bool(config.default_probability) {
            clock.advance(Duration::days(interval_days * 3));
            manager.sweep_overdue(id)?;
            manager.mark_defaulted(admin, id)?;
            report.defaulted += 1;
            debug!("{} defaulted in simulation", id);
            return Ok(());
        }

        if rng.gen_bool(config.early_payoff_probability) {
            manager.make_early_payment(id, loan.remaining_amount)?;
            report.completed += 1;
            report.early_payoffs += 1;
            return Ok(());
        }

        let next = match loan.next_due() {
            Some(next) => next.clone(),
            None => return Ok(()),
        };
        let late = rng.gen_bool(config.late_probability);
        let pay_at = if late {
            next.due_at + Duration::days(LATE_BY_DAYS)
        } else {
            next.due_at
        };
        if pay_at > clock.now() {
            clock.set(pay_at);
        }

        let receipt = manager.process_installment(id, next.number)?;
        report.installments_paid += 1;
        if receipt.late {
            report.late_payments += 1;
            report.late_fees_collected += receipt.late_fee;
        }
        if receipt.completed {
            report.completed += 1;
            return Ok(());
        }
    }
}

fn validate(config: &PortfolioConfig) -> Result<()> {
    if config.borrowers == 0 || config.merchants == 0 || config.providers == 0 {
        return Err(LendingError::validation(
            "portfolio needs at least one borrower, merchant and provider",
        ));
    }
    if config.min_principal == 0 || config.min_principal > config.max_principal {
        return Err(LendingError::validation("invalid principal range"));
    }
    if config.min_term_months == 0 || config.min_term_months > config.max_term_months {
        return Err(LendingError::validation("invalid term range"));
    }
    if config.deposit_choices_bps.is_empty() {
        return Err(LendingError::validation("no deposit choices"));
    }
    for p in [
        config.late_probability,
        config.early_payoff_probability,
        config.default_probability,
    ] {
        if !(0.0..=1.0).contains(&p) {
            return Err(LendingError::validation(format!("probability {} out of range", p)));
        }
    }
    Ok(())
}
