use crate::core::account::{AccountId, LoanId};
use crate::core::error::{LendingError, Result};
use crate::core::Amount;
use crate::credit::profile::PaymentType;
use crate::loan::schedule::{self, LoanTerms};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a loan.
///
/// `Created -> Active -> {Completed | Defaulted}` and `Created ->
/// Cancelled`. The three end states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoanStatus {
    Created,
    Active,
    Completed,
    Defaulted,
    Cancelled,
}

impl LoanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Defaulted | Self::Cancelled)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: LoanStatus) -> bool {
        use LoanStatus::*;
        match (self, next) {
            (Created, Active) | (Created, Cancelled) => true,
            (Active, Active) | (Active, Completed) | (Active, Defaulted) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
    Waived,
}

impl InstallmentStatus {
    /// Still owed by the borrower.
    pub fn is_outstanding(self) -> bool {
        matches!(self, Self::Pending | Self::Overdue)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    /// 1-based position in the schedule.
    pub number: u32,
    pub due_at: DateTime<Utc>,
    pub amount: Amount,
    pub status: InstallmentStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub reference: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub amount: Amount,
    pub timestamp: DateTime<Utc>,
    pub kind: PaymentType,
    pub reference: Uuid,
}

/// Parameters for opening a loan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRequest {
    pub borrower: AccountId,
    pub merchant: AccountId,
    pub principal: Amount,
    pub term_months: u32,
    pub interest_rate_bps: u32,
    pub deposit_amount: Amount,
}

/// An installment plan and everything paid against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Loan {
    pub id: LoanId,
    pub borrower: AccountId,
    pub merchant: AccountId,
    pub principal: Amount,
    pub term_months: u32,
    pub interest_rate_bps: u32,
    pub deposit_amount: Amount,
    pub total_interest: Amount,
    pub total_amount: Amount,
    pub monthly_amount: Amount,
    pub remaining_amount: Amount,
    pub deposit_paid: bool,
    pub payments_completed: u32,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    installments: Vec<Installment>,
    history: Vec<PaymentRecord>,
}

impl Loan {
    /// Validate `request` and lay out its schedule starting at `created_at`.
    pub fn open(
        id: LoanId,
        request: LoanRequest,
        created_at: DateTime<Utc>,
        interval_days: i64,
    ) -> Result<Self> {
        if request.principal == 0 {
            return Err(LendingError::validation("principal must be positive"));
        }
        if request.term_months == 0 {
            return Err(LendingError::validation("term must be at least one month"));
        }
        if request.deposit_amount >= request.principal {
            return Err(LendingError::validation(format!(
                "deposit {} must be below principal {}",
                request.deposit_amount, request.principal
            )));
        }
        if request.borrower == request.merchant {
            return Err(LendingError::validation("borrower cannot be the merchant"));
        }

        let LoanTerms {
            total_interest,
            total_amount,
            monthly_amount,
            ..
        } = schedule::compute_terms(
            request.principal,
            request.deposit_amount,
            request.term_months,
            request.interest_rate_bps,
        );
        if monthly_amount == 0 {
            return Err(LendingError::validation(format!(
                "principal {} too small for {} installments",
                request.principal, request.term_months
            )));
        }
        let financed = total_amount - request.deposit_amount;
        let installments =
            schedule::build_schedule(created_at, interval_days, request.term_months, financed);

        Ok(Self {
            id,
            borrower: request.borrower,
            merchant: request.merchant,
            principal: request.principal,
            term_months: request.term_months,
            interest_rate_bps: request.interest_rate_bps,
            deposit_amount: request.deposit_amount,
            total_interest,
            total_amount,
            monthly_amount,
            remaining_amount: total_amount,
            deposit_paid: false,
            payments_completed: 0,
            status: LoanStatus::Created,
            created_at,
            closed_at: None,
            installments,
            history: Vec::new(),
        })
    }

    pub fn installments(&self) -> &[Installment] {
        &self.installments
    }

    pub fn payment_history(&self) -> &[PaymentRecord] {
        &self.history
    }

    pub fn installment(&self, number: u32) -> Option<&Installment> {
        number
            .checked_sub(1)
            .and_then(|i| self.installments.get(i as usize))
    }

    /// The next installment the borrower owes, if any.
    pub fn next_due(&self) -> Option<&Installment> {
        self.installment(self.payments_completed + 1)
            .filter(|i| i.status.is_outstanding())
    }

    /// Installments paid plus early payments.
    pub fn amount_repaid(&self) -> Amount {
        let installments: Amount = self
            .installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Paid)
            .map(|i| i.amount)
            .sum();
        let early: Amount = self
            .history
            .iter()
            .filter(|p| p.kind == PaymentType::EarlyPayment)
            .map(|p| p.amount)
            .sum();
        installments + early
    }

    /// Sum of installments still owed.
    pub fn outstanding_installments(&self) -> Amount {
        self.installments
            .iter()
            .filter(|i| i.status.is_outstanding())
            .map(|i| i.amount)
            .sum()
    }

    /// `repaid + deposit (once paid) == total - remaining`.
    pub fn is_balanced(&self) -> bool {
        let deposit = if self.deposit_paid {
            self.deposit_amount
        } else {
            0
        };
        self.amount_repaid() + deposit + self.remaining_amount == self.total_amount
    }

    fn transition(&mut self, next: LoanStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(LendingError::invalid_state(
                self.id,
                format!("cannot move from {:?} to {:?}", self.status, next),
            ));
        }
        self.status = next;
        Ok(())
    }

    fn require_status(&self, expected: LoanStatus) -> Result<()> {
        if self.status != expected {
            return Err(LendingError::invalid_state(
                self.id,
                format!("expected {:?}, loan is {:?}", expected, self.status),
            ));
        }
        Ok(())
    }

    fn log_payment(&mut self, amount: Amount, kind: PaymentType, at: DateTime<Utc>) -> Uuid {
        let reference = Uuid::new_v4();
        self.history.push(PaymentRecord {
            amount,
            timestamp: at,
            kind,
            reference,
        });
        reference
    }

    /// Record the deposit and activate the loan.
    pub fn apply_deposit(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.require_status(LoanStatus::Created)?;
        if self.deposit_paid {
            return Err(LendingError::invalid_state(self.id, "deposit already paid"));
        }
        self.transition(LoanStatus::Active)?;
        self.deposit_paid = true;
        self.remaining_amount -= self.deposit_amount;
        self.log_payment(self.deposit_amount, PaymentType::Deposit, at);
        Ok(())
    }

    /// Check that installment `number` is the one due next. Returns its amount.
    pub fn expect_installment(&self, number: u32) -> Result<Amount> {
        self.require_status(LoanStatus::Active)?;
        if !self.deposit_paid {
            return Err(LendingError::invalid_state(self.id, "deposit not paid"));
        }
        let expected = self.payments_completed + 1;
        if number != expected {
            return Err(LendingError::OutOfOrderPayment {
                expected,
                attempted: number,
            });
        }
        let installment = self
            .installment(number)
            .ok_or_else(|| LendingError::NotFound(format!("installment {} of {}", number, self.id)))?;
        if !installment.status.is_outstanding() {
            return Err(LendingError::invalid_state(
                self.id,
                format!("installment {} is {:?}", number, installment.status),
            ));
        }
        Ok(installment.amount)
    }

    /// Whether paying installment `number` at `at` is past the grace window.
    pub fn is_late(&self, number: u32, at: DateTime<Utc>, grace_days: i64) -> bool {
        self.installment(number)
            .map(|i| at > i.due_at + Duration::days(grace_days))
            .unwrap_or(false)
    }

    /// Mark installment `number` paid. A late payment carries `Some(fee)`,
    /// logged as its own `LateFee` entry even when the fee truncated to
    /// zero; it does not reduce the remaining balance. Returns true when
    /// this was the final installment.
    pub fn apply_installment(
        &mut self,
        number: u32,
        late_fee: Option<Amount>,
        at: DateTime<Utc>,
    ) -> Result<bool> {
        let amount = self.expect_installment(number)?;
        let reference = self.log_payment(amount, PaymentType::Installment, at);
        if let Some(fee) = late_fee {
            self.log_payment(fee, PaymentType::LateFee, at);
        }
        let index = (number - 1) as usize;
        let installment = &mut self.installments[index];
        installment.status = InstallmentStatus::Paid;
        installment.paid_at = Some(at);
        installment.reference = Some(reference);

        self.payments_completed += 1;
        self.remaining_amount -= amount;
        self.transition(LoanStatus::Active)?;
        Ok(self.payments_completed == self.term_months)
    }

    /// Apply a prepayment and spread what is left over the unpaid
    /// installments. Returns true when the balance reached zero.
    pub fn apply_early_payment(&mut self, amount: Amount, at: DateTime<Utc>) -> Result<bool> {
        self.require_status(LoanStatus::Active)?;
        if amount == 0 {
            return Err(LendingError::validation("early payment must be positive"));
        }
        if amount > self.remaining_amount {
            return Err(LendingError::validation(format!(
                "early payment {} exceeds remaining {}",
                amount, self.remaining_amount
            )));
        }
        self.log_payment(amount, PaymentType::EarlyPayment, at);
        self.remaining_amount -= amount;
        schedule::reamortize(&mut self.installments, self.remaining_amount);
        if let Some(amount) = self.next_due().map(|i| i.amount) {
            self.monthly_amount = amount;
        }
        Ok(self.remaining_amount == 0)
    }

    pub fn remaining_months(&self) -> u32 {
        self.term_months - self.payments_completed
    }

    /// Close the loan as repaid. Installments still outstanding are waived.
    pub fn complete(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanStatus::Completed)?;
        for installment in self.installments.iter_mut() {
            if installment.status.is_outstanding() {
                installment.status = InstallmentStatus::Waived;
            }
        }
        self.closed_at = Some(at);
        Ok(())
    }

    pub fn mark_defaulted(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanStatus::Defaulted)?;
        self.closed_at = Some(at);
        Ok(())
    }

    pub fn cancel(&mut self, at: DateTime<Utc>) -> Result<()> {
        self.transition(LoanStatus::Cancelled)?;
        self.closed_at = Some(at);
        Ok(())
    }

    /// Flag pending installments whose grace window has passed.
    /// Returns how many changed.
    pub fn mark_overdue(&mut self, at: DateTime<Utc>, grace_days: i64) -> usize {
        if self.status != LoanStatus::Active {
            return 0;
        }
        let grace = Duration::days(grace_days);
        let mut flagged = 0;
        for installment in self.installments.iter_mut() {
            if installment.status == InstallmentStatus::Pending && at > installment.due_at + grace {
                installment.status = InstallmentStatus::Overdue;
                flagged += 1;
            }
        }
        flagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(principal: Amount, deposit: Amount, term: u32) -> LoanRequest {
        LoanRequest {
            borrower: AccountId::new("alice"),
            merchant: AccountId::new("shop"),
            principal,
            term_months: term,
            interest_rate_bps: 1_200,
            deposit_amount: deposit,
        }
    }

    fn open(principal: Amount, deposit: Amount, term: u32) -> Loan {
        Loan::open(
            LoanId::new(1),
            request(principal, deposit, term),
            DateTime::<Utc>::default(),
            30,
        )
        .unwrap()
    }

    #[test]
    fn test_open_builds_schedule() {
        let loan = open(1_200, 0, 12);
        assert_eq!(loan.status, LoanStatus::Created);
        assert_eq!(loan.installments().len(), 12);
        assert_eq!(loan.monthly_amount, 112);
        assert_eq!(loan.total_amount, 1_344);
        assert_eq!(loan.remaining_amount, 1_344);
        assert_eq!(loan.outstanding_installments(), 1_344);
        assert!(loan.is_balanced());
    }

    #[test]
    fn test_open_validates() {
        let at = DateTime::<Utc>::default();
        let zero = Loan::open(LoanId::new(1), request(0, 0, 12), at, 30);
        assert!(matches!(zero, Err(LendingError::Validation(_))));
        let no_term = Loan::open(LoanId::new(1), request(100, 0, 0), at, 30);
        assert!(matches!(no_term, Err(LendingError::Validation(_))));
        let full_deposit = Loan::open(LoanId::new(1), request(100, 100, 3), at, 30);
        assert!(matches!(full_deposit, Err(LendingError::Validation(_))));
        let tiny = Loan::open(LoanId::new(1), request(5, 0, 12), at, 30);
        assert!(matches!(tiny, Err(LendingError::Validation(_))));
    }

    #[test]
    fn test_deposit_activates_once() {
        let mut loan = open(1_200, 200, 12);
        loan.apply_deposit(DateTime::<Utc>::default()).unwrap();
        assert_eq!(loan.status, LoanStatus::Active);
        assert_eq!(loan.remaining_amount, 1_120);
        assert!(loan.is_balanced());
        assert!(matches!(
            loan.apply_deposit(DateTime::<Utc>::default()),
            Err(LendingError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_installment_requires_order() {
        let mut loan = open(1_200, 0, 12);
        let at = DateTime::<Utc>::default();
        assert!(matches!(
            loan.apply_installment(1, None, at),
            Err(LendingError::InvalidState { .. })
        ));
        loan.apply_deposit(at).unwrap();
        assert_eq!(
            loan.apply_installment(2, None, at),
            Err(LendingError::OutOfOrderPayment {
                expected: 1,
                attempted: 2
            })
        );
        assert!(!loan.apply_installment(1, None, at).unwrap());
        assert_eq!(loan.payments_completed, 1);
        assert_eq!(loan.next_due().map(|i| i.number), Some(2));
    }

    #[test]
    fn test_late_fee_logged_separately() {
        let mut loan = open(1_200, 0, 12);
        let at = DateTime::<Utc>::default();
        loan.apply_deposit(at).unwrap();
        loan.apply_installment(1, Some(5), at).unwrap();
        let kinds: Vec<_> = loan.payment_history().iter().map(|p| p.kind).collect();
        assert_eq!(
            kinds,
            vec![
                PaymentType::Deposit,
                PaymentType::Installment,
                PaymentType::LateFee
            ]
        );
        assert_eq!(loan.remaining_amount, 1_344 - 112);
        assert!(loan.is_balanced());
    }

    #[test]
    fn test_zero_late_fee_still_logged() {
        let mut loan = open(1_200, 0, 12);
        let at = DateTime::<Utc>::default();
        loan.apply_deposit(at).unwrap();
        loan.apply_installment(1, Some(0), at).unwrap();
        loan.apply_installment(2, None, at).unwrap();
        let fees: Vec<_> = loan
            .payment_history()
            .iter()
            .filter(|p| p.kind == PaymentType::LateFee)
            .map(|p| p.amount)
            .collect();
        assert_eq!(fees, vec![0]);
        assert!(loan.is_balanced());
    }

    #[test]
    fn test_is_late_after_grace() {
        let loan = open(1_200, 0, 12);
        let due = loan.installment(1).unwrap().due_at;
        assert!(!loan.is_late(1, due + Duration::days(3), 3));
        assert!(loan.is_late(1, due + Duration::days(4), 3));
    }

    #[test]
    fn test_early_payment_reamortizes() {
        let mut loan = open(1_200, 0, 12);
        let at = DateTime::<Utc>::default();
        loan.apply_deposit(at).unwrap();
        loan.apply_installment(1, None, at).unwrap();
        assert!(!loan.apply_early_payment(232, at).unwrap());
        assert_eq!(loan.remaining_amount, 1_000);
        assert_eq!(loan.outstanding_installments(), 1_000);
        assert_eq!(loan.monthly_amount, 90);
        assert_eq!(loan.installment(12).unwrap().amount, 100);
        assert!(loan.is_balanced());
    }

    #[test]
    fn test_early_payment_bounds() {
        let mut loan = open(1_200, 0, 12);
        let at = DateTime::<Utc>::default();
        loan.apply_deposit(at).unwrap();
        assert!(matches!(
            loan.apply_early_payment(0, at),
            Err(LendingError::Validation(_))
        ));
        assert!(matches!(
            loan.apply_early_payment(1_345, at),
            Err(LendingError::Validation(_))
        ));
        assert!(loan.apply_early_payment(1_344, at).unwrap());
        loan.complete(at).unwrap();
        assert!(loan
            .installments()
            .iter()
            .all(|i| i.status == InstallmentStatus::Waived));
    }

    #[test]
    fn test_terminal_states_stick() {
        let mut loan = open(1_200, 0, 12);
        let at = DateTime::<Utc>::default();
        loan.cancel(at).unwrap();
        assert!(loan.status.is_terminal());
        assert!(loan.apply_deposit(at).is_err());
        assert!(loan.mark_defaulted(at).is_err());
        assert!(loan.cancel(at).is_err());
    }

    #[test]
    fn test_mark_overdue() {
        let mut loan = open(1_200, 0, 12);
        let at = DateTime::<Utc>::default();
        loan.apply_deposit(at).unwrap();
        let sweep_at = at + Duration::days(64);
        assert_eq!(loan.mark_overdue(sweep_at, 3), 2);
        assert_eq!(loan.installment(1).unwrap().status, InstallmentStatus::Overdue);
        assert_eq!(loan.installment(3).unwrap().status, InstallmentStatus::Pending);
        // overdue installments can still be paid in order
        assert!(loan.apply_installment(1, Some(5), sweep_at).is_ok());
    }
}
