use crate::core::account::{AccountId, LoanId};
use crate::core::clock::Clock;
use crate::core::config::EngineConfig;
use crate::core::error::{LendingError, Result};
use crate::core::events::{EngineEvent, EventSink};
use crate::core::ledger::{TokenLedger, TransferBatch};
use crate::core::{Amount, BPS_DENOMINATOR};
use crate::credit::profile::PaymentType;
use crate::credit::store::CreditProfileStore;
use crate::loan::model::{Installment, Loan, LoanRequest, LoanStatus, PaymentRecord};
use crate::loan::schedule;
use crate::pool::liquidity::LiquidityPool;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of a scheduled installment payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallmentReceipt {
    pub loan: LoanId,
    pub number: u32,
    pub amount: Amount,
    /// Paid after the grace window. The fee may still be zero.
    pub late: bool,
    pub late_fee: Amount,
    pub completed: bool,
}

impl InstallmentReceipt {
    /// What the borrower was charged.
    pub fn charged(&self) -> Amount {
        self.amount + self.late_fee
    }
}

/// Outcome of a prepayment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarlyPaymentReceipt {
    pub loan: LoanId,
    pub amount: Amount,
    pub interest_saved: Amount,
    pub remaining: Amount,
    pub completed: bool,
}

/// Unfunded loans and open principal of one borrower.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Exposure {
    /// Loans still in `Created`.
    pub pending_loans: u32,
    /// Principal of every `Created` or `Active` loan.
    pub open_principal: Amount,
}

/// The loan book and its state machine.
///
/// Every loan sits behind its own mutex, held for the entire operation.
/// Cross-entity work always locks in the order loan, then pool (inside
/// [`LiquidityPool`]), then credit profile (inside
/// [`CreditProfileStore`]). Each mutation is computed on a copy of the
/// loan, value moves through a [`TransferBatch`], and the copy replaces
/// the stored loan only after every transfer succeeded. Loan events are
/// emitted before the credit updates they cause.
pub struct LoanEngine {
    loans: RwLock<BTreeMap<LoanId, Arc<Mutex<Loan>>>>,
    next_id: AtomicU64,
    config: EngineConfig,
    ledger: Arc<dyn TokenLedger>,
    pool: Arc<LiquidityPool>,
    credit: Arc<CreditProfileStore>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl LoanEngine {
    pub fn new(
        config: EngineConfig,
        ledger: Arc<dyn TokenLedger>,
        pool: Arc<LiquidityPool>,
        credit: Arc<CreditProfileStore>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            loans: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            config,
            ledger,
            pool,
            credit,
            clock,
            events,
        }
    }

    fn handle(&self, id: LoanId) -> Result<Arc<Mutex<Loan>>> {
        self.loans
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| LendingError::NotFound(format!("loan {}", id)))
    }

    /// Transfer with a balance pre-check so a short borrower gets
    /// `InsufficientBalance` instead of a bare ledger refusal.
    fn pull(
        &self,
        batch: &mut TransferBatch<'_>,
        from: &AccountId,
        to: &AccountId,
        amount: Amount,
    ) -> Result<()> {
        let held = self.ledger.balance_of(from);
        if held < amount {
            return Err(LendingError::InsufficientBalance {
                account: from.clone(),
                requested: amount,
                held,
            });
        }
        batch.transfer(from, to, amount)
    }

    /// Open a loan in `Created` state with its full schedule.
    /// Ids are only consumed by requests that validate.
    pub fn create_loan(&self, request: LoanRequest) -> Result<LoanId> {
        let now = self.clock.now();
        let borrower = request.borrower.clone();
        let (id, event) = {
            let mut loans = self.loans.write();
            let id = LoanId::new(self.next_id.load(Ordering::SeqCst));
            let loan = Loan::open(id, request, now, self.config.installment_interval_days)?;
            self.next_id.store(id.value() + 1, Ordering::SeqCst);

            info!(
                "created {} for {}: principal {}, {} months at {} bps, deposit {}",
                id, loan.borrower, loan.principal, loan.term_months, loan.interest_rate_bps,
                loan.deposit_amount
            );
            let event = EngineEvent::LoanCreated {
                loan: id,
                borrower: loan.borrower.clone(),
                merchant: loan.merchant.clone(),
                principal: loan.principal,
                term_months: loan.term_months,
                interest_rate_bps: loan.interest_rate_bps,
            };
            loans.insert(id, Arc::new(Mutex::new(loan)));
            (id, event)
        };

        self.credit.get_or_create(&borrower);
        self.events.emit(event);
        Ok(id)
    }

    /// Take the deposit, disburse the full principal to the merchant and
    /// activate the loan.
    pub fn process_deposit(&self, id: LoanId) -> Result<()> {
        let handle = self.handle(id)?;
        let mut loan = handle.lock();
        let now = self.clock.now();

        let mut working = loan.clone();
        working.apply_deposit(now)?;

        let mut batch = TransferBatch::new(self.ledger.as_ref());
        self.pull(
            &mut batch,
            &working.borrower,
            &self.config.escrow_account,
            working.deposit_amount,
        )?;
        self.pool
            .transfer_to_merchant(&working.merchant, working.principal, id)?;
        batch.commit();

        *loan = working;

        info!("{} active after deposit of {}", id, loan.deposit_amount);
        self.events.emit(EngineEvent::DepositPaid {
            loan: id,
            amount: loan.deposit_amount,
        });
        self.credit
            .record_loan_opened(&loan.borrower, loan.principal);
        self.credit
            .record_payment(&loan.borrower, PaymentType::Deposit, true);
        Ok(())
    }

    /// Pay installment `number`, which must be the next one due.
    pub fn process_installment(&self, id: LoanId, number: u32) -> Result<InstallmentReceipt> {
        let handle = self.handle(id)?;
        let mut loan = handle.lock();
        let now = self.clock.now();

        let mut working = loan.clone();
        let amount = working.expect_installment(number)?;
        let late = working.is_late(number, now, self.config.grace_period_days);
        let fee = late.then(|| amount * self.config.late_fee_bps as u128 / BPS_DENOMINATOR);
        let late_fee = fee.unwrap_or(0);
        let completed = working.apply_installment(number, fee, now)?;
        if completed {
            working.complete(now)?;
        }

        let mut batch = TransferBatch::new(self.ledger.as_ref());
        self.pull(
            &mut batch,
            &working.borrower,
            self.pool.account(),
            amount + late_fee,
        )?;
        if completed {
            batch.transfer(
                &self.config.escrow_account,
                &working.borrower,
                working.deposit_amount,
            )?;
        }
        batch.commit();

        self.pool.receive_repayment(amount + late_fee);
        *loan = working;

        debug!("{} installment {} paid: {} + fee {}", id, number, amount, late_fee);
        self.events.emit(EngineEvent::InstallmentPaid {
            loan: id,
            number,
            amount,
        });
        if late {
            warn!("{} installment {} paid late, fee {}", id, number, late_fee);
            self.events.emit(EngineEvent::LateFeeApplied {
                loan: id,
                number,
                fee: late_fee,
            });
        }
        self.credit
            .record_payment(&loan.borrower, PaymentType::Installment, !late);
        if completed {
            self.finish(&loan);
        }

        Ok(InstallmentReceipt {
            loan: id,
            number,
            amount,
            late,
            late_fee,
            completed,
        })
    }

    /// Pay down `amount` ahead of schedule and re-spread the balance.
    pub fn make_early_payment(&self, id: LoanId, amount: Amount) -> Result<EarlyPaymentReceipt> {
        let handle = self.handle(id)?;
        let mut loan = handle.lock();
        let now = self.clock.now();

        let mut working = loan.clone();
        let interest_saved =
            schedule::interest_saved(amount, working.interest_rate_bps, working.remaining_months());
        let completed = working.apply_early_payment(amount, now)?;
        if completed {
            working.complete(now)?;
        }

        let mut batch = TransferBatch::new(self.ledger.as_ref());
        self.pull(&mut batch, &working.borrower, self.pool.account(), amount)?;
        if completed {
            batch.transfer(
                &self.config.escrow_account,
                &working.borrower,
                working.deposit_amount,
            )?;
        }
        batch.commit();

        self.pool.receive_repayment(amount);
        *loan = working;

        info!(
            "{} early payment {}, remaining {}, interest saved {}",
            id, amount, loan.remaining_amount, interest_saved
        );
        self.events.emit(EngineEvent::EarlyPayment {
            loan: id,
            amount,
            interest_saved,
        });
        self.credit
            .record_payment(&loan.borrower, PaymentType::EarlyPayment, true);
        if completed {
            self.finish(&loan);
        }

        Ok(EarlyPaymentReceipt {
            loan: id,
            amount,
            interest_saved,
            remaining: loan.remaining_amount,
            completed,
        })
    }

    fn finish(&self, loan: &Loan) {
        info!("{} completed, deposit {} refunded", loan.id, loan.deposit_amount);
        self.events.emit(EngineEvent::LoanCompleted {
            loan: loan.id,
            deposit_refunded: loan.deposit_amount,
        });
        self.credit.record_completion(&loan.borrower);
    }

    fn require_admin(&self, caller: &AccountId, action: &str) -> Result<()> {
        if caller != &self.config.admin {
            warn!("{} attempted to {} without admin rights", caller, action);
            return Err(LendingError::Unauthorized {
                caller: caller.clone(),
                action: action.to_string(),
            });
        }
        Ok(())
    }

    /// Write the loan off. Admin only. The deposit stays in escrow.
    pub fn mark_defaulted(&self, caller: &AccountId, id: LoanId) -> Result<()> {
        self.require_admin(caller, "mark loans defaulted")?;
        let handle = self.handle(id)?;
        let mut loan = handle.lock();
        let now = self.clock.now();

        let mut working = loan.clone();
        working.mark_defaulted(now)?;
        *loan = working;

        warn!("{} defaulted with {} outstanding", id, loan.remaining_amount);
        self.events.emit(EngineEvent::Defaulted {
            loan: id,
            remaining: loan.remaining_amount,
        });
        self.credit.record_default(&loan.borrower);
        Ok(())
    }

    /// Withdraw a loan that was never funded. Borrower or admin only.
    pub fn cancel_loan(&self, caller: &AccountId, id: LoanId) -> Result<()> {
        let handle = self.handle(id)?;
        let mut loan = handle.lock();
        if caller != &loan.borrower && caller != &self.config.admin {
            return Err(LendingError::Unauthorized {
                caller: caller.clone(),
                action: format!("cancel {}", id),
            });
        }
        let mut working = loan.clone();
        working.cancel(self.clock.now())?;
        *loan = working;

        info!("{} cancelled by {}", id, caller);
        self.events.emit(EngineEvent::LoanCancelled { loan: id });
        Ok(())
    }

    /// Flag installments past their grace window. Returns how many changed.
    pub fn sweep_overdue(&self, id: LoanId) -> Result<usize> {
        let handle = self.handle(id)?;
        let mut loan = handle.lock();
        let flagged = loan.mark_overdue(self.clock.now(), self.config.grace_period_days);
        if flagged > 0 {
            debug!("{} has {} newly overdue installments", id, flagged);
        }
        Ok(flagged)
    }

    pub fn get_loan(&self, id: LoanId) -> Result<Loan> {
        Ok(self.handle(id)?.lock().clone())
    }

    pub fn get_installment_schedule(&self, id: LoanId) -> Result<Vec<Installment>> {
        Ok(self.handle(id)?.lock().installments().to_vec())
    }

    pub fn get_payment_history(&self, id: LoanId) -> Result<Vec<PaymentRecord>> {
        Ok(self.handle(id)?.lock().payment_history().to_vec())
    }

    /// Ids of every loan taken by `borrower`, oldest first.
    pub fn loans_for_borrower(&self, borrower: &AccountId) -> Vec<LoanId> {
        self.loans
            .read()
            .iter()
            .filter(|(_, loan)| &loan.lock().borrower == borrower)
            .map(|(id, _)| *id)
            .collect()
    }

    /// What `borrower` already has in flight: unfunded loans, and the
    /// principal of every loan not yet closed.
    pub fn exposure(&self, borrower: &AccountId) -> Exposure {
        self.loans
            .read()
            .values()
            .fold(Exposure::default(), |mut acc, handle| {
                let loan = handle.lock();
                if &loan.borrower == borrower {
                    match loan.status {
                        LoanStatus::Created => {
                            acc.pending_loans += 1;
                            acc.open_principal += loan.principal;
                        }
                        LoanStatus::Active => acc.open_principal += loan.principal,
                        _ => {}
                    }
                }
                acc
            })
    }

    pub fn loan_ids(&self) -> Vec<LoanId> {
        self.loans.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.loans.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.loans.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::events::RecordingSink;
    use crate::core::ledger::InMemoryTokenLedger;

    /// Refuses every transfer out of `blocked`.
    struct BlockingLedger {
        inner: InMemoryTokenLedger,
        blocked: AccountId,
    }

    impl TokenLedger for BlockingLedger {
        fn transfer(&self, from: &AccountId, to: &AccountId, amount: Amount) -> bool {
            from != &self.blocked && self.inner.transfer(from, to, amount)
        }

        fn balance_of(&self, account: &AccountId) -> Amount {
            self.inner.balance_of(account)
        }
    }

    struct Fixture {
        engine: LoanEngine,
        ledger: Arc<BlockingLedger>,
        pool: Arc<LiquidityPool>,
        credit: Arc<CreditProfileStore>,
        sink: Arc<RecordingSink>,
    }

    fn fixture(blocked: &str) -> Fixture {
        let config = EngineConfig::default();
        let inner = InMemoryTokenLedger::new();
        inner.mint(&AccountId::new("lp"), 10_000);
        inner.mint(&AccountId::new("alice"), 5_000);
        let ledger = Arc::new(BlockingLedger {
            inner,
            blocked: AccountId::new(blocked),
        });
        let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
        let sink = Arc::new(RecordingSink::new());
        let pool = Arc::new(LiquidityPool::new(
            config.pool_account.clone(),
            config.minimum_liquidity,
            config.repayment_yield_bps,
            ledger.clone(),
            clock.clone(),
            sink.clone(),
        ));
        pool.add_liquidity(&AccountId::new("lp"), 10_000).unwrap();
        let credit = Arc::new(CreditProfileStore::new(clock.clone(), sink.clone()));
        let engine = LoanEngine::new(
            config,
            ledger.clone(),
            pool.clone(),
            credit.clone(),
            clock,
            sink.clone(),
        );
        sink.clear();
        Fixture {
            engine,
            ledger,
            pool,
            credit,
            sink,
        }
    }

    fn request(deposit: Amount) -> LoanRequest {
        LoanRequest {
            borrower: AccountId::new("alice"),
            merchant: AccountId::new("shop"),
            principal: 1_200,
            term_months: 12,
            interest_rate_bps: 1_200,
            deposit_amount: deposit,
        }
    }

    #[test]
    fn test_ids_are_sequential() {
        let f = fixture("nobody");
        let a = f.engine.create_loan(request(0)).unwrap();
        let b = f.engine.create_loan(request(0)).unwrap();
        assert_eq!(a, LoanId::new(1));
        assert_eq!(b, LoanId::new(2));
        assert_eq!(f.engine.len(), 2);
        assert_eq!(f.sink.named("LoanCreated").len(), 2);
    }

    #[test]
    fn test_rejected_request_is_not_stored() {
        let f = fixture("nobody");
        assert!(f.engine.create_loan(request(1_200)).is_err());
        assert!(f.engine.is_empty());
        assert!(f.sink.events().is_empty());
    }

    #[test]
    fn test_rejected_request_does_not_consume_an_id() {
        let f = fixture("nobody");
        assert!(f.engine.create_loan(request(1_200)).is_err());
        assert!(f.engine.create_loan(request(5_000)).is_err());
        let id = f.engine.create_loan(request(0)).unwrap();
        assert_eq!(id, LoanId::new(1));
        assert_eq!(f.engine.create_loan(request(0)).unwrap(), LoanId::new(2));
    }

    #[test]
    fn test_exposure_counts_open_loans_only() {
        let f = fixture("nobody");
        let alice = AccountId::new("alice");
        let funded = f.engine.create_loan(request(0)).unwrap();
        f.engine.process_deposit(funded).unwrap();
        f.engine.create_loan(request(0)).unwrap();
        let cancelled = f.engine.create_loan(request(0)).unwrap();
        f.engine.cancel_loan(&alice, cancelled).unwrap();

        let exposure = f.engine.exposure(&alice);
        assert_eq!(exposure.pending_loans, 1);
        assert_eq!(exposure.open_principal, 2_400);
        assert_eq!(f.engine.exposure(&AccountId::new("bob")), Exposure::default());
    }

    #[test]
    fn test_loan_events_precede_score_updates() {
        let f = fixture("nobody");
        let id = f.engine.create_loan(request(0)).unwrap();
        f.engine.process_deposit(id).unwrap();
        for n in 1..=12 {
            f.engine.process_installment(id, n).unwrap();
        }
        let names: Vec<_> = f.sink.events().iter().map(|e| e.name()).collect();
        let tail = &names[names.len() - 4..];
        assert_eq!(
            tail,
            ["InstallmentPaid", "CreditScoreUpdated", "LoanCompleted", "CreditScoreUpdated"]
        );
    }

    #[test]
    fn test_refused_disbursement_returns_deposit() {
        let f = fixture("liquidity-pool");
        let id = f.engine.create_loan(request(200)).unwrap();
        let pool_before = f.pool.stats();

        let err = f.engine.process_deposit(id).unwrap_err();
        assert!(matches!(err, LendingError::TransferFailed { .. }));

        let alice = AccountId::new("alice");
        assert_eq!(f.ledger.balance_of(&alice), 5_000);
        assert_eq!(f.ledger.balance_of(&AccountId::new("deposit-escrow")), 0);
        assert_eq!(f.pool.stats(), pool_before);
        assert_eq!(f.engine.get_loan(id).unwrap().status, LoanStatus::Created);
        assert_eq!(f.credit.get(&alice).unwrap().total_loans, 0);
        assert!(f.sink.named("DepositPaid").is_empty());
    }

    #[test]
    fn test_refused_refund_undoes_final_installment() {
        let f = fixture("deposit-escrow");
        let alice = AccountId::new("alice");
        let id = f.engine.create_loan(request(200)).unwrap();
        f.engine.process_deposit(id).unwrap();
        for n in 1..12 {
            f.engine.process_installment(id, n).unwrap();
        }
        let held = f.ledger.balance_of(&alice);
        let pool_before = f.pool.stats();

        let err = f.engine.process_installment(id, 12).unwrap_err();
        assert!(matches!(err, LendingError::TransferFailed { .. }));

        assert_eq!(f.ledger.balance_of(&alice), held);
        assert_eq!(f.ledger.balance_of(&AccountId::new("deposit-escrow")), 200);
        assert_eq!(f.pool.stats(), pool_before);
        let loan = f.engine.get_loan(id).unwrap();
        assert_eq!(loan.payments_completed, 11);
        assert_eq!(loan.status, LoanStatus::Active);
        assert!(loan.is_balanced());
    }
}
