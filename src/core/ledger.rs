use crate::core::account::AccountId;
use crate::core::error::{LendingError, Result};
use crate::core::Amount;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;

/// External value-transfer capability.
///
/// The engine moves deposits, installments, disbursements, refunds and
/// interest payouts exclusively through this trait. A `false` from
/// [`TokenLedger::transfer`] means nothing moved and the calling
/// operation must abort.
pub trait TokenLedger: Send + Sync {
    fn transfer(&self, from: &AccountId, to: &AccountId, amount: Amount) -> bool;

    fn balance_of(&self, account: &AccountId) -> Amount;
}

/// Token balances held in memory.
///
/// Transfers are refused when the sender does not hold enough, which is
/// what a real token contract does. Useful for tests, simulations and
/// the CLI.
#[derive(Debug, Default)]
pub struct InMemoryTokenLedger {
    balances: Mutex<HashMap<AccountId, Amount>>,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `amount` to `account` out of thin air.
    pub fn mint(&self, account: &AccountId, amount: Amount) {
        let mut balances = self.balances.lock();
        *balances.entry(account.clone()).or_insert(0) += amount;
    }

    /// Total value held across all accounts.
    pub fn total_supply(&self) -> Amount {
        self.balances.lock().values().sum()
    }

    /// Snapshot of all non-zero balances.
    pub fn balances(&self) -> HashMap<AccountId, Amount> {
        self.balances
            .lock()
            .iter()
            .filter(|(_, v)| **v > 0)
            .map(|(k, v)| (k.clone(), *v))
            .collect()
    }
}

impl TokenLedger for InMemoryTokenLedger {
    fn transfer(&self, from: &AccountId, to: &AccountId, amount: Amount) -> bool {
        let mut balances = self.balances.lock();
        let held = balances.get(from).copied().unwrap_or(0);
        if held < amount {
            return false;
        }
        balances.insert(from.clone(), held - amount);
        *balances.entry(to.clone()).or_insert(0) += amount;
        true
    }

    fn balance_of(&self, account: &AccountId) -> Amount {
        self.balances.lock().get(account).copied().unwrap_or(0)
    }
}

/// A sequence of transfers that either all happen or none do.
///
/// Each successful transfer is remembered; if a later one is refused the
/// earlier ones are reversed newest-first before the error is returned.
/// Call [`TransferBatch::commit`] once the surrounding state change is
/// final.
pub struct TransferBatch<'a> {
    ledger: &'a dyn TokenLedger,
    executed: Vec<(AccountId, AccountId, Amount)>,
}

impl<'a> TransferBatch<'a> {
    pub fn new(ledger: &'a dyn TokenLedger) -> Self {
        Self {
            ledger,
            executed: Vec::new(),
        }
    }

    /// Move `amount` from `from` to `to`. Zero amounts are skipped.
    pub fn transfer(&mut self, from: &AccountId, to: &AccountId, amount: Amount) -> Result<()> {
        if amount == 0 {
            return Ok(());
        }
        if self.ledger.transfer(from, to, amount) {
            debug!("transfer {} {} -> {}", amount, from, to);
            self.executed.push((from.clone(), to.clone(), amount));
            Ok(())
        } else {
            self.rollback();
            Err(LendingError::TransferFailed {
                from: from.clone(),
                to: to.clone(),
                amount,
            })
        }
    }

    /// Undo every transfer made so far.
    pub fn rollback(&mut self) {
        while let Some((from, to, amount)) = self.executed.pop() {
            if !self.ledger.transfer(&to, &from, amount) {
                warn!(
                    "compensation of {} {} -> {} was refused by the ledger",
                    amount, to, from
                );
            }
        }
    }

    /// Keep the transfers.
    pub fn commit(mut self) {
        self.executed.clear();
    }
}

impl Drop for TransferBatch<'_> {
    fn drop(&mut self) {
        // An uncommitted batch means the caller bailed out early.
        self.rollback();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded() -> InMemoryTokenLedger {
        let ledger = InMemoryTokenLedger::new();
        ledger.mint(&AccountId::new("A"), 100);
        ledger
    }

    #[test]
    fn test_transfer_moves_value() {
        let ledger = funded();
        assert!(ledger.transfer(&AccountId::new("A"), &AccountId::new("B"), 60));
        assert_eq!(ledger.balance_of(&AccountId::new("A")), 40);
        assert_eq!(ledger.balance_of(&AccountId::new("B")), 60);
        assert_eq!(ledger.total_supply(), 100);
    }

    #[test]
    fn test_transfer_refused_without_funds() {
        let ledger = funded();
        assert!(!ledger.transfer(&AccountId::new("A"), &AccountId::new("B"), 101));
        assert_eq!(ledger.balance_of(&AccountId::new("A")), 100);
        assert_eq!(ledger.balance_of(&AccountId::new("B")), 0);
    }

    #[test]
    fn test_batch_rolls_back_on_refusal() {
        let ledger = funded();
        let a = AccountId::new("A");
        let b = AccountId::new("B");
        let c = AccountId::new("C");

        let mut batch = TransferBatch::new(&ledger);
        batch.transfer(&a, &b, 70).unwrap();
        let err = batch.transfer(&c, &a, 10).unwrap_err();
        assert!(matches!(err, LendingError::TransferFailed { .. }));
        drop(batch);

        assert_eq!(ledger.balance_of(&a), 100);
        assert_eq!(ledger.balance_of(&b), 0);
    }

    #[test]
    fn test_uncommitted_batch_rolls_back_on_drop() {
        let ledger = funded();
        let a = AccountId::new("A");
        let b = AccountId::new("B");
        {
            let mut batch = TransferBatch::new(&ledger);
            batch.transfer(&a, &b, 30).unwrap();
        }
        assert_eq!(ledger.balance_of(&a), 100);

        let mut batch = TransferBatch::new(&ledger);
        batch.transfer(&a, &b, 30).unwrap();
        batch.commit();
        assert_eq!(ledger.balance_of(&b), 30);
    }
}
