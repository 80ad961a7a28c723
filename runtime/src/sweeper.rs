//! Status Expiry Sweeper.
//!
//! The only time-driven entry point. An external scheduler calls
//! [`StatusSweeper::sweep_expired_statuses`] with the current time; there is
//! no internal timer. A sweep is idempotent and takes the same row locks as
//! reservations, so it can run while bookings are being made.

use crate::environment::ReservationEnvironment;
use crate::metrics;
use crate::retry::retry_on_contention;
use chrono::{DateTime, Utc};
use ferry_core::{
    LedgerKey, LedgerRepository, ReservationStore, Result, ScheduleId, ScheduleRepository,
    ScheduleStatus, ScheduleStatusChange,
};

/// What one sweep changed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Schedules whose temporary INACTIVE status lapsed
    pub schedules_reactivated: Vec<ScheduleId>,
    /// Ledger rows reopened because their schedule was reactivated
    pub ledgers_reactivated: usize,
    /// Ledger rows whose WEATHER_ISSUE hold lapsed
    pub weather_holds_lifted: Vec<LedgerKey>,
}

impl SweepReport {
    /// True when the sweep found nothing to do
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schedules_reactivated.is_empty()
            && self.ledgers_reactivated == 0
            && self.weather_holds_lifted.is_empty()
    }
}

/// Reverts time-bound statuses after they expire.
pub struct StatusSweeper<S> {
    env: ReservationEnvironment<S>,
}

impl<S> Clone for StatusSweeper<S> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
        }
    }
}

impl<S: ReservationStore> StatusSweeper<S> {
    /// Creates a new `StatusSweeper`
    #[must_use]
    pub const fn new(env: ReservationEnvironment<S>) -> Self {
        Self { env }
    }

    /// Runs one sweep as of `now`.
    ///
    /// - Every INACTIVE schedule whose expiry is before `now` becomes ACTIVE,
    ///   and the ledger rows dated today or later that its suspension closed
    ///   reopen. Explicit per-date overrides are left alone.
    /// - Every WEATHER_ISSUE row whose expiry is before `now` reopens.
    ///
    /// A schedule re-suspended or reactivated after it was listed is skipped;
    /// the expiry is checked again under the schedule lock.
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` if a row stayed locked through all retries, or
    /// `Persistence`. Work already committed stays committed; the next sweep
    /// picks up the rest.
    pub async fn sweep_expired_statuses(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let store = &self.env.store;
        let mut report = SweepReport::default();

        for schedule in store.expired_inactive_schedules(now).await? {
            let change = ScheduleStatusChange {
                schedule_id: schedule.id,
                status: ScheduleStatus::Active,
                reason: None,
                expires_at: None,
                from_date: now.date_naive(),
                at: now,
                only_if_expired_before: Some(now),
            };
            let cascade = retry_on_contention(self.env.lock_retry, || {
                store.apply_schedule_status(&change)
            })
            .await?;
            if !cascade.applied {
                tracing::info!(
                    schedule_id = %schedule.id,
                    status = cascade.schedule.status.as_str(),
                    expires_at = ?cascade.schedule.status_expires_at,
                    "Schedule status changed since it was read; left alone"
                );
                continue;
            }
            tracing::info!(
                schedule_id = %schedule.id,
                expired_at = ?schedule.status_expires_at,
                ledgers_reopened = cascade.ledgers_changed,
                "Schedule suspension expired"
            );
            report.schedules_reactivated.push(schedule.id);
            report.ledgers_reactivated += cascade.ledgers_changed;
        }

        let lifted = retry_on_contention(self.env.lock_retry, || {
            store.expire_weather_holds(now)
        })
        .await?;
        for ledger in &lifted {
            tracing::info!(ledger = %ledger.key, "Weather hold expired");
        }
        report.weather_holds_lifted = lifted.into_iter().map(|ledger| ledger.key).collect();

        metrics::sweep(
            report.schedules_reactivated.len(),
            report.ledgers_reactivated + report.weather_holds_lifted.len(),
        );
        if report.is_empty() {
            tracing::debug!(%now, "Sweep found nothing to revert");
        } else {
            tracing::info!(
                %now,
                schedules = report.schedules_reactivated.len(),
                ledgers = report.ledgers_reactivated,
                weather_holds = report.weather_holds_lifted.len(),
                "Sweep completed"
            );
        }
        Ok(report)
    }
}
