use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of a participant that can hold or move value.
///
/// Borrowers, merchants, liquidity providers and the engine's own
/// pool and escrow accounts are all addressed the same way, so the
/// token ledger never has to know which role an account plays.
///
/// # Examples
///
/// ```
/// use installment_engine::core::account::AccountId;
///
/// let alice = AccountId::new("alice");
/// let shop = AccountId::new("merchant-7");
/// assert_ne!(alice, shop);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the string representation of this account.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Stable identifier of a loan inside the loan book.
///
/// Ids are handed out sequentially starting at 1 and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(u64);

impl LoanId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for LoanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LOAN-{:06}", self.0)
    }
}
