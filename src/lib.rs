//! # installment-engine
//!
//! Buy-now-pay-later lending engine.
//!
//! A borrower buys from a merchant, puts down an optional deposit and
//! repays the rest plus simple interest in monthly installments. The
//! merchant is paid in full up front from a pool funded by liquidity
//! providers, who earn a utilization-linked yield. Every payment feeds a
//! per-user credit profile that decides eligibility and pricing for the
//! next loan.
//!
//! ## Architecture
//!
//! - **core**: Identifiers, errors, config, and the token ledger, clock and
//!   event sink the engine is driven through
//! - **credit**: Credit profiles, scoring, eligibility and interest pricing
//! - **pool**: Liquidity pool accounting and provider yield
//! - **loan**: Loan records, schedules and the lifecycle engine
//! - **manager**: [`LoanManager`](manager::LoanManager), the single entry point
//! - **simulation**: Random portfolio runs for testing and benchmarking

pub mod core;
pub mod credit;
pub mod loan;
pub mod manager;
pub mod pool;
pub mod simulation;

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::core::account::{AccountId, LoanId};
    pub use crate::core::clock::{Clock, ManualClock, SystemClock};
    pub use crate::core::config::EngineConfig;
    pub use crate::core::error::{LendingError, Result};
    pub use crate::core::events::{EngineEvent, EventSink, LogSink, RecordingSink};
    pub use crate::core::ledger::{InMemoryTokenLedger, TokenLedger};
    pub use crate::core::Amount;
    pub use crate::credit::eligibility::EligibilityResult;
    pub use crate::credit::profile::{CreditProfile, PaymentType};
    pub use crate::loan::model::{Installment, InstallmentStatus, Loan, LoanStatus};
    pub use crate::manager::LoanManager;
    pub use crate::pool::liquidity::PoolStats;
}
