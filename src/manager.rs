//! Top-level entry point.
//!
//! [`LoanManager`] wires the credit store, liquidity pool and loan
//! engine together around one set of collaborators and exposes every
//! operation external callers need.

use crate::core::account::{AccountId, LoanId};
use crate::core::clock::Clock;
use crate::core::config::EngineConfig;
use crate::core::error::{LendingError, Result};
use crate::core::events::EventSink;
use crate::core::ledger::TokenLedger;
use crate::core::{Amount, BPS_DENOMINATOR};
use crate::credit::eligibility::{self, EligibilityResult};
use crate::credit::profile::CreditProfile;
use crate::credit::store::CreditProfileStore;
use crate::loan::engine::{EarlyPaymentReceipt, InstallmentReceipt, LoanEngine};
use crate::loan::model::{Installment, Loan, LoanRequest, PaymentRecord};
use crate::pool::liquidity::{LiquidityPool, PoolStats, ProviderInfo};
use log::{info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

pub struct LoanManager {
    config: EngineConfig,
    /// Serializes eligibility-checked origination so two requests from one
    /// borrower cannot both pass against the same exposure.
    origination: Mutex<()>,
    credit: Arc<CreditProfileStore>,
    pool: Arc<LiquidityPool>,
    engine: LoanEngine,
    clock: Arc<dyn Clock>,
}

impl LoanManager {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let credit = Arc::new(CreditProfileStore::new(clock.clone(), events.clone()));
        let pool = Arc::new(LiquidityPool::new(
            config.pool_account.clone(),
            config.minimum_liquidity,
            config.repayment_yield_bps,
            ledger.clone(),
            clock.clone(),
            events.clone(),
        ));
        let engine = LoanEngine::new(
            config.clone(),
            ledger,
            pool.clone(),
            credit.clone(),
            clock.clone(),
            events,
        );
        Ok(Self {
            config,
            origination: Mutex::new(()),
            credit,
            pool,
            engine,
            clock,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // --- Origination ---

    /// Check eligibility, price the loan and open it.
    ///
    /// `deposit_bps` is the share of `principal` paid up front. Loans the
    /// borrower has opened but not funded count as active, and the
    /// principal of every open loan plus this one must fit within the
    /// credit limit.
    pub fn create_loan(
        &self,
        borrower: &AccountId,
        merchant: &AccountId,
        principal: Amount,
        term_months: u32,
        deposit_bps: u32,
    ) -> Result<LoanId> {
        if term_months < self.config.min_term_months || term_months > self.config.max_term_months {
            return Err(LendingError::validation(format!(
                "term {} outside {}..={} months",
                term_months, self.config.min_term_months, self.config.max_term_months
            )));
        }
        if deposit_bps > self.config.max_deposit_bps {
            return Err(LendingError::validation(format!(
                "deposit of {} bps exceeds maximum {} bps",
                deposit_bps, self.config.max_deposit_bps
            )));
        }

        let _origination = self.origination.lock();
        let exposure = self.engine.exposure(borrower);
        let mut profile = self.profile_or_default(borrower);
        profile.active_loans += exposure.pending_loans;
        let eligibility = eligibility::verify_eligibility(&profile, self.config.credit_base_unit);
        if !eligibility.eligible {
            warn!("{} declined: {}", borrower, eligibility.reason);
            return Err(LendingError::NotEligible(eligibility.reason));
        }
        if principal + exposure.open_principal > eligibility.max_amount {
            warn!(
                "{} requested {} with {} open, above limit {}",
                borrower, principal, exposure.open_principal, eligibility.max_amount
            );
            return Err(LendingError::NotEligible(format!(
                "Requested amount exceeds credit limit of {}",
                eligibility.max_amount
            )));
        }

        let interest_rate_bps = self.calculate_interest_rate(eligibility.score, term_months);
        let deposit_amount = principal * deposit_bps as u128 / BPS_DENOMINATOR;
        self.engine.create_loan(LoanRequest {
            borrower: borrower.clone(),
            merchant: merchant.clone(),
            principal,
            term_months,
            interest_rate_bps,
            deposit_amount,
        })
    }

    /// Open a loan with explicit pricing, bypassing eligibility.
    pub fn create_loan_with_terms(&self, request: LoanRequest) -> Result<LoanId> {
        self.engine.create_loan(request)
    }

    // --- Loan lifecycle ---

    pub fn process_deposit(&self, id: LoanId) -> Result<()> {
        self.engine.process_deposit(id)
    }

    pub fn process_installment(&self, id: LoanId, number: u32) -> Result<InstallmentReceipt> {
        self.engine.process_installment(id, number)
    }

    pub fn make_early_payment(&self, id: LoanId, amount: Amount) -> Result<EarlyPaymentReceipt> {
        self.engine.make_early_payment(id, amount)
    }

    pub fn mark_defaulted(&self, caller: &AccountId, id: LoanId) -> Result<()> {
        self.engine.mark_defaulted(caller, id)
    }

    pub fn cancel_loan(&self, caller: &AccountId, id: LoanId) -> Result<()> {
        self.engine.cancel_loan(caller, id)
    }

    pub fn sweep_overdue(&self, id: LoanId) -> Result<usize> {
        self.engine.sweep_overdue(id)
    }

    pub fn get_loan(&self, id: LoanId) -> Result<Loan> {
        self.engine.get_loan(id)
    }

    pub fn get_installment_schedule(&self, id: LoanId) -> Result<Vec<Installment>> {
        self.engine.get_installment_schedule(id)
    }

    pub fn get_payment_history(&self, id: LoanId) -> Result<Vec<PaymentRecord>> {
        self.engine.get_payment_history(id)
    }

    pub fn get_borrower_loans(&self, borrower: &AccountId) -> Vec<LoanId> {
        self.engine.loans_for_borrower(borrower)
    }

    pub fn loan_ids(&self) -> Vec<LoanId> {
        self.engine.loan_ids()
    }

    // --- Liquidity ---

    pub fn add_liquidity(&self, provider: &AccountId, amount: Amount) -> Result<()> {
        self.pool.add_liquidity(provider, amount)
    }

    pub fn remove_liquidity(&self, provider: &AccountId, amount: Amount) -> Result<Amount> {
        self.pool.remove_liquidity(provider, amount)
    }

    pub fn claim_interest(&self, provider: &AccountId) -> Result<Amount> {
        self.pool.claim_interest(provider)
    }

    pub fn get_pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn get_provider_info(&self, provider: &AccountId) -> Result<ProviderInfo> {
        self.pool
            .provider_info(provider)
            .ok_or_else(|| LendingError::NotFound(format!("liquidity provider {}", provider)))
    }

    // --- Credit ---

    /// Evaluate `user` against their profile, or a fresh default profile
    /// if they have never borrowed. Never creates a profile.
    pub fn verify_eligibility(&self, user: &AccountId) -> EligibilityResult {
        eligibility::verify_eligibility(&self.profile_or_default(user), self.config.credit_base_unit)
    }

    fn profile_or_default(&self, user: &AccountId) -> CreditProfile {
        self.credit
            .get(user)
            .unwrap_or_else(|| CreditProfile::new(user.clone(), self.clock.now()))
    }

    pub fn calculate_interest_rate(&self, score: u16, term_months: u32) -> u32 {
        eligibility::calculate_interest_rate(score, term_months)
    }

    pub fn get_credit_profile(&self, user: &AccountId) -> Result<CreditProfile> {
        self.credit
            .get(user)
            .ok_or_else(|| LendingError::NotFound(format!("credit profile {}", user)))
    }

    /// Set a user's KYC flag. Admin only.
    pub fn set_verified(&self, caller: &AccountId, user: &AccountId, verified: bool) -> Result<()> {
        if caller != &self.config.admin {
            return Err(LendingError::Unauthorized {
                caller: caller.clone(),
                action: "verify users".to_string(),
            });
        }
        self.credit.set_verified(user, verified);
        info!("{} verification set to {} by {}", user, verified, caller);
        Ok(())
    }
}
