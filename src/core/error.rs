use crate::core::account::{AccountId, LoanId};
use crate::core::Amount;
use thiserror::Error;

/// Result alias used by every engine operation.
pub type Result<T> = std::result::Result<T, LendingError>;

/// Errors returned by the lending engine.
///
/// Every mutating operation is all-or-nothing: when one of these comes
/// back, no loan, pool or credit state has changed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LendingError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity { requested: Amount, available: Amount },

    #[error("insufficient balance for {account}: requested {requested}, held {held}")]
    InsufficientBalance {
        account: AccountId,
        requested: Amount,
        held: Amount,
    },

    #[error("insufficient pool funds: payout {payout}, available {available}")]
    InsufficientPoolFunds { payout: Amount, available: Amount },

    #[error("installment {attempted} paid out of order, expected {expected}")]
    OutOfOrderPayment { expected: u32, attempted: u32 },

    #[error("invalid state for {loan}: {reason}")]
    InvalidState { loan: LoanId, reason: String },

    /// Carries the eligibility reason verbatim.
    #[error("not eligible: {0}")]
    NotEligible(String),

    #[error("{caller} is not authorized to {action}")]
    Unauthorized { caller: AccountId, action: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("token transfer of {amount} from {from} to {to} was refused")]
    TransferFailed {
        from: AccountId,
        to: AccountId,
        amount: Amount,
    },
}

impl LendingError {
    pub(crate) fn invalid_state(loan: LoanId, reason: impl Into<String>) -> Self {
        Self::InvalidState {
            loan,
            reason: reason.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }
}
