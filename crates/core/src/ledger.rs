//! Per-day usage accounting for report generation.
//!
//! A generation first *reserves* a slot against both the admin's and the intake's day counters,
//! then *finalises* it once the outcome is known. Both steps are single
//! [`DocumentStore::update_counters`] transactions, so concurrent requests cannot both pass the
//! limit checks.
//!
//! Callers that hold a reservation across fallible work should wrap it in a
//! [`ReservationGuard`]: dropping the guard without completing it finalises with
//! [`Outcome::Failure`], which covers early returns, panics and cancelled futures alike.

use crate::config::ReportConfig;
use crate::pricing::CallCost;
use crate::store::{CounterKey, DocumentStore, UsageCounter};
use crate::{IntakeError, IntakeResult};
use chrono::NaiveDate;
use std::sync::Arc;

/// Limits enforced at reservation time.
#[derive(Debug, Clone, Copy)]
pub struct LedgerLimits {
    pub admin_daily_limit: u32,
    pub intake_daily_limit: u32,
    pub admin_cooldown: chrono::Duration,
    pub spend_cap_usd: Option<f64>,
}

impl LedgerLimits {
    pub fn from_config(cfg: &ReportConfig) -> IntakeResult<Self> {
        let admin_cooldown = chrono::Duration::from_std(cfg.admin_cooldown)
            .map_err(|_| IntakeError::InvalidConfig("admin cooldown is out of range".into()))?;
        Ok(Self {
            admin_daily_limit: cfg.admin_daily_limit,
            intake_daily_limit: cfg.intake_daily_limit,
            admin_cooldown,
            spend_cap_usd: cfg.spend_cap_usd(),
        })
    }
}

/// A pending slot held against one admin-day and one intake-day counter.
///
/// The day is fixed at reservation time, so a finalise that runs after midnight still releases
/// the slot it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub admin_id: String,
    pub intake_id: String,
    pub day: NaiveDate,
}

impl Reservation {
    fn keys(&self) -> [CounterKey; 2] {
        [
            CounterKey::admin(self.admin_id.as_str(), self.day),
            CounterKey::intake(self.intake_id.as_str(), self.day),
        ]
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Success(CallCost),
    Failure,
}

pub struct UsageLedger {
    store: Arc<dyn DocumentStore>,
    limits: LedgerLimits,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn DocumentStore>, limits: LedgerLimits) -> Self {
        Self { store, limits }
    }

    /// Reserve one generation slot for `admin_id` against `intake_id` on the current UTC day.
    ///
    /// Checks run in this order inside one transaction: admin cooldown, admin daily limit,
    /// intake daily limit, admin spend cap. On success both counters gain one pending slot
    /// and the admin counter's `lastCallAt` is set to the transaction time.
    ///
    /// # Errors
    ///
    /// - `CooldownActive`, `AdminQuotaExceeded`, `IntakeQuotaExceeded` or `SpendCapReached`
    ///   when a check fails. Nothing is written in that case.
    /// - Storage errors from the underlying store.
    pub fn reserve(&self, admin_id: &str, intake_id: &str) -> IntakeResult<Reservation> {
        let reservation = Reservation {
            admin_id: admin_id.to_owned(),
            intake_id: intake_id.to_owned(),
            day: self.store.now().date_naive(),
        };
        let limits = self.limits;

        self.store
            .update_counters(&reservation.keys(), &mut |now, counters| {
                let [admin, intake] = counters else {
                    return Err(IntakeError::StoreUnavailable(
                        "counter transaction returned the wrong number of documents".into(),
                    ));
                };

                if let Some(last) = admin.last_call_at {
                    if now - last < limits.admin_cooldown {
                        return Err(IntakeError::CooldownActive);
                    }
                }
                if admin.used() >= u64::from(limits.admin_daily_limit) {
                    return Err(IntakeError::AdminQuotaExceeded {
                        limit: limits.admin_daily_limit,
                    });
                }
                if intake.used() >= u64::from(limits.intake_daily_limit) {
                    return Err(IntakeError::IntakeQuotaExceeded {
                        limit: limits.intake_daily_limit,
                    });
                }
                if let Some(cap) = limits.spend_cap_usd {
                    if admin.est_cost_usd >= cap {
                        return Err(IntakeError::SpendCapReached { cap_usd: cap });
                    }
                }

                admin.count_pending += 1;
                admin.last_call_at = Some(now);
                intake.count_pending += 1;
                Ok(())
            })?;

        tracing::debug!(
            admin_id,
            intake_id,
            day = %reservation.day,
            "usage slot reserved"
        );
        Ok(reservation)
    }

    /// Release a reservation's pending slot, booking a success and its cost if `outcome` says so.
    ///
    /// Pending counts are floored at zero, so a stray second finalise cannot drive them
    /// negative. Failures add no cost.
    pub fn finalise(&self, reservation: &Reservation, outcome: Outcome) -> IntakeResult<()> {
        self.store
            .update_counters(&reservation.keys(), &mut |_, counters| {
                for counter in counters.iter_mut() {
                    apply_outcome(counter, outcome);
                }
                Ok(())
            })?;

        tracing::debug!(
            admin_id = %reservation.admin_id,
            intake_id = %reservation.intake_id,
            success = matches!(outcome, Outcome::Success(_)),
            "usage slot finalised"
        );
        Ok(())
    }

    /// Reserve and wrap the reservation in a guard that releases it on drop.
    ///
    /// The guard owns a handle to the ledger, so it can be moved onto a blocking thread or
    /// returned from one.
    pub fn reserve_guarded(
        self: &Arc<Self>,
        admin_id: &str,
        intake_id: &str,
    ) -> IntakeResult<ReservationGuard> {
        let reservation = self.reserve(admin_id, intake_id)?;
        Ok(ReservationGuard {
            ledger: Arc::clone(self),
            reservation: Some(reservation),
        })
    }
}

fn apply_outcome(counter: &mut UsageCounter, outcome: Outcome) {
    counter.count_pending = counter.count_pending.saturating_sub(1);
    if let Outcome::Success(cost) = outcome {
        counter.count_success += 1;
        if cost.usd.is_finite() && cost.usd > 0.0 {
            counter.est_cost_usd += cost.usd;
        }
    }
}

/// Holds a [`Reservation`] until it is completed or dropped.
///
/// [`complete`](Self::complete) finalises with success. Any other way out of scope finalises
/// with failure, exactly once.
#[must_use = "dropping the guard immediately releases the reservation"]
pub struct ReservationGuard {
    ledger: Arc<UsageLedger>,
    reservation: Option<Reservation>,
}

impl ReservationGuard {
    pub fn reservation(&self) -> Option<&Reservation> {
        self.reservation.as_ref()
    }

    /// Finalise with success and `cost`.
    ///
    /// If the success write itself fails the guard stays armed and the slot is released as a
    /// failure when it drops.
    pub fn complete(mut self, cost: CallCost) -> IntakeResult<()> {
        let Some(reservation) = self.reservation.take() else {
            return Ok(());
        };
        match self.ledger.finalise(&reservation, Outcome::Success(cost)) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.reservation = Some(reservation);
                Err(e)
            }
        }
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        let Some(reservation) = self.reservation.take() else {
            return;
        };
        if let Err(e) = self.ledger.finalise(&reservation, Outcome::Failure) {
            tracing::error!(
                admin_id = %reservation.admin_id,
                intake_id = %reservation.intake_id,
                error = %e,
                "failed to release usage reservation"
            );
        }
    }
}
