use crate::core::account::{AccountId, LoanId};
use crate::core::clock::Clock;
use crate::core::error::{LendingError, Result};
use crate::core::events::{EngineEvent, EventSink};
use crate::core::ledger::TokenLedger;
use crate::core::{bps_to_percent, Amount, BPS_DENOMINATOR};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

pub const SECONDS_PER_YEAR: u128 = 365 * 24 * 60 * 60;

/// Provider yield floor.
pub const BASE_APY_BPS: u128 = 800;

/// Most the utilization bonus can add on top of the floor.
pub const MAX_UTILIZATION_BONUS_BPS: u128 = 200;

/// One provider's stake in the pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderPosition {
    pub provider: AccountId,
    pub amount: Amount,
    /// Start of the current accrual window.
    pub timestamp: DateTime<Utc>,
    /// Interest settled but not yet paid out.
    pub accrued_interest: Amount,
    pub active: bool,
}

/// A provider's position plus what it has earned since the last settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub position: ProviderPosition,
    pub pending_interest: Amount,
}

/// Aggregate pool counters.
///
/// `available_liquidity + locked_liquidity == total_liquidity` whenever no
/// operation is in flight.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_liquidity: Amount,
    pub available_liquidity: Amount,
    pub locked_liquidity: Amount,
    pub total_loans_financed: u64,
    pub total_interest_earned: Amount,
    pub provider_count: usize,
}

impl PoolStats {
    pub fn is_balanced(&self) -> bool {
        self.available_liquidity + self.locked_liquidity == self.total_liquidity
    }

    /// Locked share of total liquidity in basis points; zero for an empty pool.
    pub fn utilization_bps(&self) -> u128 {
        if self.total_liquidity == 0 {
            return 0;
        }
        self.locked_liquidity * BPS_DENOMINATOR / self.total_liquidity
    }

    /// Current provider APY: 800 bps plus up to 200 bps from utilization.
    pub fn apy_bps(&self) -> u128 {
        BASE_APY_BPS + (self.utilization_bps() * 2 / 100).min(MAX_UTILIZATION_BONUS_BPS)
    }

    pub fn utilization_percent(&self) -> Decimal {
        bps_to_percent(self.utilization_bps())
    }

    pub fn apy_percent(&self) -> Decimal {
        bps_to_percent(self.apy_bps())
    }
}

impl std::fmt::Display for PoolStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Liquidity Pool ===")?;
        writeln!(f, "Total Liquidity:     {}", self.total_liquidity)?;
        writeln!(f, "Available:           {}", self.available_liquidity)?;
        writeln!(f, "Locked:              {}", self.locked_liquidity)?;
        writeln!(f, "Utilization:         {}%", self.utilization_percent())?;
        writeln!(f, "Provider APY:        {}%", self.apy_percent())?;
        writeln!(f, "Loans Financed:      {}", self.total_loans_financed)?;
        writeln!(f, "Interest Earned:     {}", self.total_interest_earned)?;
        writeln!(f, "Providers:           {}", self.provider_count)
    }
}

#[derive(Debug, Default)]
struct PoolState {
    stats: PoolStats,
    providers: HashMap<AccountId, ProviderPosition>,
}

impl PoolState {
    fn pending_interest(&self, position: &ProviderPosition, now: DateTime<Utc>) -> Amount {
        let elapsed = (now - position.timestamp).num_seconds().max(0) as u128;
        position.amount * self.stats.apy_bps() * elapsed / (BPS_DENOMINATOR * SECONDS_PER_YEAR)
    }
}

/// Pooled capital that funds merchant disbursements.
///
/// Aggregates and provider positions sit behind one short-held mutex;
/// every operation is O(1) and takes it for its full duration, so the
/// balance check and the counter update can never interleave with
/// another caller.
pub struct LiquidityPool {
    state: Mutex<PoolState>,
    account: AccountId,
    minimum_liquidity: Amount,
    repayment_yield_bps: u32,
    ledger: Arc<dyn TokenLedger>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl LiquidityPool {
    pub fn new(
        account: AccountId,
        minimum_liquidity: Amount,
        repayment_yield_bps: u32,
        ledger: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            state: Mutex::new(PoolState::default()),
            account,
            minimum_liquidity,
            repayment_yield_bps,
            ledger,
            clock,
            events,
        }
    }

    /// Token account that holds the pooled funds.
    pub fn account(&self) -> &AccountId {
        &self.account
    }

    fn pay_out(&self, to: &AccountId, amount: Amount) -> Result<()> {
        if self.ledger.transfer(&self.account, to, amount) {
            Ok(())
        } else {
            Err(LendingError::TransferFailed {
                from: self.account.clone(),
                to: to.clone(),
                amount,
            })
        }
    }

    /// Deposit `amount` from `provider` into the pool.
    pub fn add_liquidity(&self, provider: &AccountId, amount: Amount) -> Result<()> {
        if amount < self.minimum_liquidity {
            warn!(
                "rejected liquidity of {} from {}: minimum is {}",
                amount, provider, self.minimum_liquidity
            );
            return Err(LendingError::validation(format!(
                "liquidity {} below minimum {}",
                amount, self.minimum_liquidity
            )));
        }
        let held = self.ledger.balance_of(provider);
        if held < amount {
            return Err(LendingError::InsufficientBalance {
                account: provider.clone(),
                requested: amount,
                held,
            });
        }

        let mut state = self.state.lock();
        let now = self.clock.now();
        let mut position = match state.providers.get(provider) {
            Some(existing) => {
                let mut settled = existing.clone();
                settled.accrued_interest += state.pending_interest(existing, now);
                settled
            }
            None => ProviderPosition {
                provider: provider.clone(),
                amount: 0,
                timestamp: now,
                accrued_interest: 0,
                active: true,
            },
        };

        if !self.ledger.transfer(provider, &self.account, amount) {
            return Err(LendingError::TransferFailed {
                from: provider.clone(),
                to: self.account.clone(),
                amount,
            });
        }

        position.amount += amount;
        position.timestamp = now;
        position.active = true;
        state.providers.insert(provider.clone(), position);
        state.stats.total_liquidity += amount;
        state.stats.available_liquidity += amount;
        state.stats.provider_count = state.providers.values().filter(|p| p.active).count();

        info!("{} added {} liquidity", provider, amount);
        self.events.emit(EngineEvent::LiquidityAdded {
            provider: provider.clone(),
            amount,
        });
        Ok(())
    }

    /// Withdraw `amount` of stake plus all interest earned so far.
    /// Returns the interest paid alongside the stake.
    pub fn remove_liquidity(&self, provider: &AccountId, amount: Amount) -> Result<Amount> {
        if amount == 0 {
            return Err(LendingError::validation("withdrawal amount must be positive"));
        }
        let mut state = self.state.lock();
        let now = self.clock.now();
        let existing = state
            .providers
            .get(provider)
            .ok_or_else(|| LendingError::NotFound(format!("liquidity provider {}", provider)))?;

        if amount > existing.amount {
            return Err(LendingError::InsufficientBalance {
                account: provider.clone(),
                requested: amount,
                held: existing.amount,
            });
        }
        let available = state.stats.available_liquidity;
        if amount > available {
            return Err(LendingError::InsufficientLiquidity {
                requested: amount,
                available,
            });
        }

        let interest = existing.accrued_interest + state.pending_interest(existing, now);
        let payout = amount + interest;
        if payout > available {
            return Err(LendingError::InsufficientPoolFunds { payout, available });
        }

        let mut position = existing.clone();
        self.pay_out(provider, payout)?;

        position.amount -= amount;
        position.accrued_interest = 0;
        position.timestamp = now;
        position.active = position.amount > 0;
        state.providers.insert(provider.clone(), position);
        state.stats.total_liquidity -= payout;
        state.stats.available_liquidity -= payout;
        state.stats.provider_count = state.providers.values().filter(|p| p.active).count();

        info!("{} removed {} liquidity with {} interest", provider, amount, interest);
        self.events.emit(EngineEvent::LiquidityRemoved {
            provider: provider.clone(),
            amount,
            interest,
        });
        Ok(interest)
    }

    /// Fund a loan: pay `amount` to `merchant` and lock it against the loan.
    ///
    /// Fails with `InsufficientLiquidity`, leaving the pool untouched,
    /// exactly when `amount` exceeds available liquidity.
    pub fn transfer_to_merchant(
        &self,
        merchant: &AccountId,
        amount: Amount,
        loan: LoanId,
    ) -> Result<()> {
        let mut state = self.state.lock();
        let available = state.stats.available_liquidity;
        if amount > available {
            warn!(
                "cannot fund {}: needs {}, pool has {} available",
                loan, amount, available
            );
            return Err(LendingError::InsufficientLiquidity {
                requested: amount,
                available,
            });
        }
        self.pay_out(merchant, amount)?;

        state.stats.available_liquidity -= amount;
        state.stats.locked_liquidity += amount;
        state.stats.total_loans_financed += 1;

        info!("disbursed {} to {} for {}", amount, merchant, loan);
        self.events.emit(EngineEvent::TransferToMerchant {
            merchant: merchant.clone(),
            amount,
            loan,
        });
        Ok(())
    }

    /// Book a repayment whose tokens already arrived in the pool account.
    ///
    /// Up to `amount` of locked liquidity is released; anything beyond
    /// what was locked (late fees, interest) is new pool revenue.
    pub fn receive_repayment(&self, amount: Amount) {
        let mut state = self.state.lock();
        let released = amount.min(state.stats.locked_liquidity);
        let revenue = amount - released;
        state.stats.locked_liquidity -= released;
        state.stats.available_liquidity += amount;
        state.stats.total_liquidity += revenue;

        let interest = amount * self.repayment_yield_bps as u128 / BPS_DENOMINATOR;
        state.stats.total_interest_earned += interest;
        debug!(
            "repayment {}: released {}, revenue {}, interest credit {}",
            amount, released, revenue, interest
        );
    }

    /// Interest earned by `provider` since its last settlement.
    pub fn calculate_pending_interest(&self, provider: &AccountId) -> Amount {
        let state = self.state.lock();
        let now = self.clock.now();
        state
            .providers
            .get(provider)
            .map(|p| state.pending_interest(p, now))
            .unwrap_or(0)
    }

    /// Pay out all settled and pending interest. Returns the payout.
    pub fn claim_interest(&self, provider: &AccountId) -> Result<Amount> {
        let mut state = self.state.lock();
        let now = self.clock.now();
        let existing = state
            .providers
            .get(provider)
            .ok_or_else(|| LendingError::NotFound(format!("liquidity provider {}", provider)))?;

        let payout = existing.accrued_interest + state.pending_interest(existing, now);
        if payout == 0 {
            return Err(LendingError::validation("no interest to claim"));
        }
        let available = state.stats.available_liquidity;
        if payout > available {
            return Err(LendingError::InsufficientPoolFunds { payout, available });
        }

        let mut position = existing.clone();
        self.pay_out(provider, payout)?;

        position.accrued_interest = 0;
        position.timestamp = now;
        state.providers.insert(provider.clone(), position);
        state.stats.available_liquidity -= payout;
        state.stats.total_liquidity -= payout;

        info!("{} claimed {} interest", provider, payout);
        self.events.emit(EngineEvent::InterestDistributed {
            provider: provider.clone(),
            amount: payout,
        });
        Ok(payout)
    }

    pub fn stats(&self) -> PoolStats {
        self.state.lock().stats.clone()
    }

    pub fn provider_info(&self, provider: &AccountId) -> Option<ProviderInfo> {
        let state = self.state.lock();
        let now = self.clock.now();
        state.providers.get(provider).map(|p| ProviderInfo {
            position: p.clone(),
            pending_interest: state.pending_interest(p, now),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::events::RecordingSink;
    use crate::core::ledger::InMemoryTokenLedger;
    use chrono::Duration;

    struct Fixture {
        pool: LiquidityPool,
        ledger: Arc<InMemoryTokenLedger>,
        clock: Arc<ManualClock>,
        sink: Arc<RecordingSink>,
    }

    fn fixture() -> Fixture {
        let ledger = Arc::new(InMemoryTokenLedger::new());
        let clock = Arc::new(ManualClock::at_epoch(1_700_000_000));
        let sink = Arc::new(RecordingSink::new());
        ledger.mint(&AccountId::new("lp1"), 1_000_000);
        ledger.mint(&AccountId::new("lp2"), 1_000_000);
        let pool = LiquidityPool::new(
            AccountId::new("pool"),
            100,
            100,
            ledger.clone(),
            clock.clone(),
            sink.clone(),
        );
        Fixture {
            pool,
            ledger,
            clock,
            sink,
        }
    }

    #[test]
    fn test_add_liquidity_updates_totals() {
        let f = fixture();
        f.pool.add_liquidity(&AccountId::new("lp1"), 10_000).unwrap();
        let stats = f.pool.stats();
        assert_eq!(stats.total_liquidity, 10_000);
        assert_eq!(stats.available_liquidity, 10_000);
        assert_eq!(stats.provider_count, 1);
        assert!(stats.is_balanced());
        assert_eq!(f.ledger.balance_of(&AccountId::new("pool")), 10_000);
        assert_eq!(f.sink.named("LiquidityAdded").len(), 1);
    }

    #[test]
    fn test_add_below_minimum_rejected() {
        let f = fixture();
        let err = f.pool.add_liquidity(&AccountId::new("lp1"), 99).unwrap_err();
        assert!(matches!(err, LendingError::Validation(_)));
        assert_eq!(f.pool.stats(), PoolStats::default());
    }

    #[test]
    fn test_add_without_funds_rejected() {
        let f = fixture();
        let err = f.pool.add_liquidity(&AccountId::new("nobody"), 500).unwrap_err();
        assert!(matches!(err, LendingError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_transfer_to_merchant_locks_funds() {
        let f = fixture();
        f.pool.add_liquidity(&AccountId::new("lp1"), 10_000).unwrap();
        f.pool
            .transfer_to_merchant(&AccountId::new("shop"), 4_000, LoanId::new(1))
            .unwrap();
        let stats = f.pool.stats();
        assert_eq!(stats.available_liquidity, 6_000);
        assert_eq!(stats.locked_liquidity, 4_000);
        assert_eq!(stats.total_loans_financed, 1);
        assert!(stats.is_balanced());
        assert_eq!(f.ledger.balance_of(&AccountId::new("shop")), 4_000);
    }

    #[test]
    fn test_transfer_to_merchant_insufficient_leaves_pool_unchanged() {
        let f = fixture();
        f.pool.add_liquidity(&AccountId::new("lp1"), 1_000).unwrap();
        let before = f.pool.stats();
        let err = f
            .pool
            .transfer_to_merchant(&AccountId::new("shop"), 1_001, LoanId::new(1))
            .unwrap_err();
        assert!(matches!(err, LendingError::InsufficientLiquidity { .. }));
        assert_eq!(f.pool.stats(), before);
    }

    #[test]
    fn test_receive_repayment_releases_then_adds_revenue() {
        let f = fixture();
        f.pool.add_liquidity(&AccountId::new("lp1"), 10_000).unwrap();
        f.pool
            .transfer_to_merchant(&AccountId::new("shop"), 1_000, LoanId::new(1))
            .unwrap();
        f.pool.receive_repayment(600);
        let stats = f.pool.stats();
        assert_eq!(stats.locked_liquidity, 400);
        assert_eq!(stats.available_liquidity, 9_600);
        assert_eq!(stats.total_interest_earned, 6);

        f.pool.receive_repayment(500);
        let stats = f.pool.stats();
        assert_eq!(stats.locked_liquidity, 0);
        assert_eq!(stats.total_liquidity, 10_100);
        assert!(stats.is_balanced());
    }

    #[test]
    fn test_apy_follows_utilization() {
        let f = fixture();
        f.pool.add_liquidity(&AccountId::new("lp1"), 10_000).unwrap();
        assert_eq!(f.pool.stats().apy_bps(), 800);
        f.pool
            .transfer_to_merchant(&AccountId::new("shop"), 5_000, LoanId::new(1))
            .unwrap();
        // 50% utilization -> 5000 * 2 / 100 = 100 bps bonus
        assert_eq!(f.pool.stats().apy_bps(), 900);
        f.pool
            .transfer_to_merchant(&AccountId::new("shop"), 5_000, LoanId::new(2))
            .unwrap();
        assert_eq!(f.pool.stats().apy_bps(), 1_000);
        assert_eq!(f.pool.stats().apy_percent().to_string(), "10.00");
    }

    #[test]
    fn test_pending_interest_accrues_over_a_year() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 100_000).unwrap();
        f.clock.advance(Duration::days(365));
        assert_eq!(f.pool.calculate_pending_interest(&lp), 8_000);
    }

    #[test]
    fn test_top_up_settles_pending_interest() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 100_000).unwrap();
        f.clock.advance(Duration::days(365));
        f.pool.add_liquidity(&lp, 100_000).unwrap();
        let info = f.pool.provider_info(&lp).unwrap();
        assert_eq!(info.position.accrued_interest, 8_000);
        assert_eq!(info.position.amount, 200_000);
        assert_eq!(info.pending_interest, 0);
    }

    #[test]
    fn test_claim_interest_pays_out() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 100_000).unwrap();
        f.clock.advance(Duration::days(365));
        let paid = f.pool.claim_interest(&lp).unwrap();
        assert_eq!(paid, 8_000);
        assert_eq!(f.ledger.balance_of(&lp), 1_000_000 - 100_000 + 8_000);
        let stats = f.pool.stats();
        assert_eq!(stats.total_liquidity, 92_000);
        assert!(stats.is_balanced());
        assert_eq!(f.sink.named("InterestDistributed").len(), 1);
    }

    #[test]
    fn test_claim_interest_without_free_funds() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 100_000).unwrap();
        f.pool
            .transfer_to_merchant(&AccountId::new("shop"), 100_000, LoanId::new(1))
            .unwrap();
        f.clock.advance(Duration::days(30));
        let before = f.pool.stats();
        let err = f.pool.claim_interest(&lp).unwrap_err();
        assert!(matches!(err, LendingError::InsufficientPoolFunds { .. }));
        assert_eq!(f.pool.stats(), before);
    }

    #[test]
    fn test_claim_with_nothing_accrued() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 1_000).unwrap();
        assert!(matches!(
            f.pool.claim_interest(&lp),
            Err(LendingError::Validation(_))
        ));
    }

    #[test]
    fn test_remove_liquidity_with_interest() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 100_000).unwrap();
        f.pool.add_liquidity(&AccountId::new("lp2"), 100_000).unwrap();
        f.clock.advance(Duration::days(365));
        let interest = f.pool.remove_liquidity(&lp, 100_000).unwrap();
        assert_eq!(interest, 8_000);
        assert_eq!(f.ledger.balance_of(&lp), 1_008_000);
        let info = f.pool.provider_info(&lp).unwrap();
        assert!(!info.position.active);
        assert_eq!(f.pool.stats().provider_count, 1);
        assert!(f.pool.stats().is_balanced());
    }

    #[test]
    fn test_remove_more_than_stake() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 1_000).unwrap();
        assert!(matches!(
            f.pool.remove_liquidity(&lp, 1_001),
            Err(LendingError::InsufficientBalance { .. })
        ));
    }

    #[test]
    fn test_remove_locked_liquidity() {
        let f = fixture();
        let lp = AccountId::new("lp1");
        f.pool.add_liquidity(&lp, 1_000).unwrap();
        f.pool
            .transfer_to_merchant(&AccountId::new("shop"), 800, LoanId::new(1))
            .unwrap();
        assert!(matches!(
            f.pool.remove_liquidity(&lp, 500),
            Err(LendingError::InsufficientLiquidity { .. })
        ));
    }

    #[test]
    fn test_remove_unknown_provider() {
        let f = fixture();
        assert!(matches!(
            f.pool.remove_liquidity(&AccountId::new("ghost"), 10),
            Err(LendingError::NotFound(_))
        ));
    }
}
