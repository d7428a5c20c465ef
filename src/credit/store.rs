use crate::core::account::AccountId;
use crate::core::clock::Clock;
use crate::core::events::{EngineEvent, EventSink};
use crate::core::Amount;
use crate::credit::profile::{CreditProfile, PaymentType, ScoreChange, ScoreReason};
use log::debug;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;

/// Credit profiles keyed by user.
///
/// The map lock is held only long enough to find or insert a profile;
/// each profile then has its own mutex, so updates for one user never
/// block another and concurrent updates for the same user serialize.
pub struct CreditProfileStore {
    profiles: RwLock<HashMap<AccountId, Arc<Mutex<CreditProfile>>>>,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl CreditProfileStore {
    pub fn new(clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            profiles: RwLock::new(HashMap::new()),
            clock,
            events,
        }
    }

    fn entry(&self, user: &AccountId) -> Arc<Mutex<CreditProfile>> {
        if let Some(existing) = self.profiles.read().get(user) {
            return Arc::clone(existing);
        }
        let mut profiles = self.profiles.write();
        let now = self.clock.now();
        Arc::clone(profiles.entry(user.clone()).or_insert_with(|| {
            debug!("opening credit profile for {}", user);
            Arc::new(Mutex::new(CreditProfile::new(user.clone(), now)))
        }))
    }

    /// Fetch the profile, creating it with default values if missing.
    pub fn get_or_create(&self, user: &AccountId) -> CreditProfile {
        self.entry(user).lock().clone()
    }

    pub fn get(&self, user: &AccountId) -> Option<CreditProfile> {
        self.profiles.read().get(user).map(|p| p.lock().clone())
    }

    pub fn contains(&self, user: &AccountId) -> bool {
        self.profiles.read().contains_key(user)
    }

    pub fn len(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.read().is_empty()
    }

    /// Run `f` with exclusive access to one user's profile.
    fn update<R>(&self, user: &AccountId, f: impl FnOnce(&mut CreditProfile) -> R) -> R {
        let handle = self.entry(user);
        let mut profile = handle.lock();
        f(&mut profile)
    }

    fn adjust(&self, profile: &mut CreditProfile, reason: ScoreReason) {
        let at = self.clock.now();
        let (old_score, new_score) = profile.adjust_score(reason, at);
        debug!(
            "score {} -> {} for {} ({:?})",
            old_score, new_score, profile.owner, reason
        );
        self.events.emit(EngineEvent::CreditScoreUpdated {
            user: profile.owner.clone(),
            old_score,
            new_score,
            at,
        });
    }

    /// Book a newly financed loan.
    pub fn record_loan_opened(&self, user: &AccountId, principal: Amount) {
        self.update(user, |p| p.open_loan(principal));
    }

    /// Record a payment. On-time installments and early payments earn
    /// score; a late payment costs score whatever its type.
    pub fn record_payment(&self, user: &AccountId, kind: PaymentType, on_time: bool) {
        self.update(user, |p| {
            p.record_payment(on_time);
            if !on_time {
                self.adjust(p, ScoreReason::LatePayment);
            } else if matches!(kind, PaymentType::Installment | PaymentType::EarlyPayment) {
                self.adjust(p, ScoreReason::OnTimePayment);
            }
        });
    }

    pub fn record_late_payment(&self, user: &AccountId) {
        self.record_payment(user, PaymentType::Installment, false);
    }

    pub fn record_completion(&self, user: &AccountId) {
        self.update(user, |p| {
            p.close_completed();
            self.adjust(p, ScoreReason::LoanCompleted);
        });
    }

    pub fn record_default(&self, user: &AccountId) {
        self.update(user, |p| {
            p.close_defaulted();
            self.adjust(p, ScoreReason::LoanDefaulted);
        });
    }

    pub fn set_verified(&self, user: &AccountId, verified: bool) {
        self.update(user, |p| p.verified = verified);
    }

    pub fn score_history(&self, user: &AccountId) -> Vec<ScoreChange> {
        self.get(user).map(|p| p.score_history).unwrap_or_default()
    }
}
