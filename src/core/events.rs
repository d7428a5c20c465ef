use crate::core::account::{AccountId, LoanId};
use crate::core::Amount;
use chrono::{DateTime, Utc};
use log::info;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Notifications emitted after a state change has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "PascalCase")]
pub enum EngineEvent {
    LoanCreated {
        loan: LoanId,
        borrower: AccountId,
        merchant: AccountId,
        principal: Amount,
        term_months: u32,
        interest_rate_bps: u32,
    },
    DepositPaid {
        loan: LoanId,
        amount: Amount,
    },
    InstallmentPaid {
        loan: LoanId,
        number: u32,
        amount: Amount,
    },
    LateFeeApplied {
        loan: LoanId,
        number: u32,
        fee: Amount,
    },
    EarlyPayment {
        loan: LoanId,
        amount: Amount,
        interest_saved: Amount,
    },
    LoanCompleted {
        loan: LoanId,
        deposit_refunded: Amount,
    },
    Defaulted {
        loan: LoanId,
        remaining: Amount,
    },
    LoanCancelled {
        loan: LoanId,
    },
    LiquidityAdded {
        provider: AccountId,
        amount: Amount,
    },
    LiquidityRemoved {
        provider: AccountId,
        amount: Amount,
        interest: Amount,
    },
    TransferToMerchant {
        merchant: AccountId,
        amount: Amount,
        loan: LoanId,
    },
    InterestDistributed {
        provider: AccountId,
        amount: Amount,
    },
    CreditScoreUpdated {
        user: AccountId,
        old_score: u16,
        new_score: u16,
        at: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::LoanCreated { .. } => "LoanCreated",
            Self::DepositPaid { .. } => "DepositPaid",
            Self::InstallmentPaid { .. } => "InstallmentPaid",
            Self::LateFeeApplied { .. } => "LateFeeApplied",
            Self::EarlyPayment { .. } => "EarlyPayment",
            Self::LoanCompleted { .. } => "LoanCompleted",
            Self::Defaulted { .. } => "Defaulted",
            Self::LoanCancelled { .. } => "LoanCancelled",
            Self::LiquidityAdded { .. } => "LiquidityAdded",
            Self::LiquidityRemoved { .. } => "LiquidityRemoved",
            Self::TransferToMerchant { .. } => "TransferToMerchant",
            Self::InterestDistributed { .. } => "InterestDistributed",
            Self::CreditScoreUpdated { .. } => "CreditScoreUpdated",
        }
    }
}

/// Receiver of engine notifications.
///
/// Within one operation events arrive cause first: a loan event precedes
/// any `CreditScoreUpdated` it triggered.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// Forwards every event to the `log` facade at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: EngineEvent) {
        info!("{}: {:?}", event.name(), event);
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    /// Events whose name matches `name`.
    pub fn named(&self, name: &str) -> Vec<EngineEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name() == name)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_sink_filters_by_name() {
        let sink = RecordingSink::new();
        sink.emit(EngineEvent::LoanCancelled {
            loan: LoanId::new(1),
        });
        sink.emit(EngineEvent::DepositPaid {
            loan: LoanId::new(2),
            amount: 50,
        });
        assert_eq!(sink.events().len(), 2);
        assert_eq!(sink.named("DepositPaid").len(), 1);
        sink.clear();
        assert!(sink.events().is_empty());
    }

    #[test]
    fn test_event_serializes_with_tag() {
        let event = EngineEvent::LateFeeApplied {
            loan: LoanId::new(3),
            number: 2,
            fee: 5,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "LateFeeApplied");
        assert_eq!(json["number"], 2);
    }
}
