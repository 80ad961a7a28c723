//! Capacity ledger rows: one per schedule and sailing date.
//!
//! **Concurrency Strategy**: this module holds the arithmetic only. Stores
//! call [`CapacityLedger::check_reserve`] while holding an exclusive lock on
//! the row (`SELECT … FOR UPDATE` in PostgreSQL, a per-row mutex in memory),
//! so the check and the write form a single atomic step.

use crate::error::{ReservationError, Result};
use crate::types::{Category, CategoryCounts, ScheduleId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one ledger row.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LedgerKey {
    /// Schedule
    pub schedule_id: ScheduleId,
    /// Sailing date
    pub date: NaiveDate,
}

impl LedgerKey {
    /// Creates a key
    #[must_use]
    pub const fn new(schedule_id: ScheduleId, date: NaiveDate) -> Self {
        Self { schedule_id, date }
    }
}

impl fmt::Display for LedgerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.schedule_id, self.date)
    }
}

/// Availability of one sailing date.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LedgerStatus {
    /// Open for reservations
    Available,
    /// Closed, either explicitly or by a schedule-level suspension
    Inactive,
    /// Declared full by an operator
    Full,
    /// Sailing cancelled
    Cancelled,
    /// Ferry has left
    Departed,
    /// Held for weather, usually until an expiry
    WeatherIssue,
}

impl LedgerStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "AVAILABLE",
            Self::Inactive => "INACTIVE",
            Self::Full => "FULL",
            Self::Cancelled => "CANCELLED",
            Self::Departed => "DEPARTED",
            Self::WeatherIssue => "WEATHER_ISSUE",
        }
    }

    /// Parse from the database representation. `UNAVAILABLE` is accepted as
    /// an alias of `INACTIVE`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "AVAILABLE" => Some(Self::Available),
            "INACTIVE" | "UNAVAILABLE" => Some(Self::Inactive),
            "FULL" => Some(Self::Full),
            "CANCELLED" => Some(Self::Cancelled),
            "DEPARTED" => Some(Self::Departed),
            "WEATHER_ISSUE" => Some(Self::WeatherIssue),
            _ => None,
        }
    }
}

impl fmt::Display for LedgerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The per-date capacity accounting record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityLedger {
    /// Row key
    pub key: LedgerKey,
    /// Availability
    pub status: LedgerStatus,
    /// Why the status was set
    pub status_reason: Option<String>,
    /// When a time-bound status lapses
    pub status_expires_at: Option<DateTime<Utc>>,
    /// Reserved totals per category
    pub counts: CategoryCounts,
    /// Status was set by a schedule-level change, not an explicit override
    pub modified_by_schedule: bool,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl CapacityLedger {
    /// A fresh, empty, available row.
    #[must_use]
    pub const fn open(key: LedgerKey, now: DateTime<Utc>) -> Self {
        Self {
            key,
            status: LedgerStatus::Available,
            status_reason: None,
            status_expires_at: None,
            counts: CategoryCounts::ZERO,
            modified_by_schedule: false,
            updated_at: now,
        }
    }

    /// Validates a reservation against this row and returns the new counts.
    ///
    /// All-or-nothing: nothing is modified here, and the first failing
    /// category (in [`Category::ALL`] order) is reported.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::DateUnavailable`] if the row is not AVAILABLE
    /// - [`ReservationError::CapacityExceeded`] if any category would exceed
    ///   the ferry's capacity
    pub fn check_reserve(
        &self,
        delta: &CategoryCounts,
        capacity: &CategoryCounts,
    ) -> Result<CategoryCounts> {
        if self.status != LedgerStatus::Available {
            return Err(ReservationError::DateUnavailable {
                key: self.key,
                status: self.status,
                reason: self.status_reason.clone(),
            });
        }

        let mut next = self.counts;
        for category in Category::ALL {
            let current = self.counts.get(category);
            let requested = delta.get(category);
            let limit = capacity.get(category);
            match current.checked_add(requested) {
                Some(total) if total <= limit => *next.get_mut(category) = total,
                _ => {
                    return Err(ReservationError::CapacityExceeded {
                        category,
                        current,
                        requested,
                        capacity: limit,
                    });
                }
            }
        }
        Ok(next)
    }

    /// Applies a successful [`check_reserve`](Self::check_reserve) result.
    ///
    /// # Errors
    ///
    /// Propagates the rejection from `check_reserve`; the row is untouched.
    pub fn reserve(
        &mut self,
        delta: &CategoryCounts,
        capacity: &CategoryCounts,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.counts = self.check_reserve(delta, capacity)?;
        self.updated_at = now;
        Ok(())
    }

    /// Decrements counts, floored at zero. Returns `true` if any category
    /// would have gone negative (an accounting bug worth logging).
    pub fn release(&mut self, delta: &CategoryCounts, now: DateTime<Utc>) -> bool {
        let underflow = Category::ALL
            .iter()
            .any(|category| delta.get(*category) > self.counts.get(*category));
        self.counts = self.counts.saturating_sub(delta);
        self.updated_at = now;
        underflow
    }

    /// Explicit per-date override. Clears `modified_by_schedule` so later
    /// schedule-level changes leave this row alone.
    pub fn apply_override(&mut self, update: &LedgerStatusUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        self.status_reason.clone_from(&update.reason);
        self.status_expires_at = update.expires_at;
        self.modified_by_schedule = false;
        self.updated_at = now;
    }

    /// Marks the row INACTIVE as a side effect of a schedule suspension.
    ///
    /// Only AVAILABLE rows follow the schedule; returns whether the row changed.
    pub fn follow_schedule_suspension(
        &mut self,
        reason: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if self.status != LedgerStatus::Available {
            return false;
        }
        self.status = LedgerStatus::Inactive;
        self.status_reason = reason.map(str::to_string);
        self.status_expires_at = expires_at;
        self.modified_by_schedule = true;
        self.updated_at = now;
        true
    }

    /// Reopens a row that a schedule suspension closed.
    ///
    /// Explicit overrides always win: FULL, CANCELLED, DEPARTED and
    /// WEATHER_ISSUE rows are never touched, whatever `modified_by_schedule`
    /// says. Returns whether the row changed.
    pub fn follow_schedule_reactivation(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != LedgerStatus::Inactive || !self.modified_by_schedule {
            return false;
        }
        self.status = LedgerStatus::Available;
        self.status_reason = None;
        self.status_expires_at = None;
        self.modified_by_schedule = false;
        self.updated_at = now;
        true
    }

    /// Lifts a lapsed weather hold. Returns whether the row changed.
    pub fn lift_expired_weather_hold(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != LedgerStatus::WeatherIssue
            || !self.status_expires_at.is_some_and(|expiry| expiry < now)
        {
            return false;
        }
        self.status = LedgerStatus::Available;
        self.status_reason = None;
        self.status_expires_at = None;
        self.updated_at = now;
        true
    }

    /// Remaining capacity per category.
    #[must_use]
    pub fn remaining(&self, capacity: &CategoryCounts) -> CategoryCounts {
        capacity.saturating_sub(&self.counts)
    }
}

/// An explicit status override for one date.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatusUpdate {
    /// New status
    pub status: LedgerStatus,
    /// Reason shown to customers and staff
    pub reason: Option<String>,
    /// When the status lapses (only WEATHER_ISSUE is swept automatically)
    pub expires_at: Option<DateTime<Utc>>,
}

/// Capacity, reserved and remaining counts for one sailing.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Sailing
    pub key: LedgerKey,
    /// Current status (AVAILABLE when no row exists yet)
    pub status: LedgerStatus,
    /// Ferry capacity
    pub capacity: CategoryCounts,
    /// Reserved so far
    pub reserved: CategoryCounts,
    /// Still bookable
    pub remaining: CategoryCounts,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ledger() -> CapacityLedger {
        CapacityLedger::open(
            LedgerKey::new(ScheduleId::new(), NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()),
            Utc::now(),
        )
    }

    fn capacity() -> CategoryCounts {
        CategoryCounts {
            passengers: 10,
            motorcycles: 4,
            cars: 2,
            buses: 1,
            trucks: 1,
        }
    }

    #[test]
    fn test_reserve_applies_every_category() {
        let mut row = ledger();
        let delta = CategoryCounts {
            passengers: 3,
            cars: 2,
            buses: 1,
            ..CategoryCounts::ZERO
        };

        row.reserve(&delta, &capacity(), Utc::now()).unwrap();
        assert_eq!(row.counts, delta);
    }

    #[test]
    fn test_reserve_is_all_or_nothing() {
        let mut row = ledger();
        row.counts.buses = 1;
        let before = row.counts;

        // Two cars fit, the bus does not.
        let delta = CategoryCounts {
            passengers: 2,
            cars: 2,
            buses: 1,
            ..CategoryCounts::ZERO
        };
        let err = row.reserve(&delta, &capacity(), Utc::now()).unwrap_err();

        assert_eq!(
            err,
            ReservationError::CapacityExceeded {
                category: Category::Bus,
                current: 1,
                requested: 1,
                capacity: 1,
            }
        );
        assert_eq!(row.counts, before);
    }

    #[test]
    fn test_reserve_rejects_non_available_status() {
        let mut row = ledger();
        row.status = LedgerStatus::WeatherIssue;
        row.status_reason = Some("storm warning".to_string());

        let err = row
            .check_reserve(&CategoryCounts { passengers: 1, ..CategoryCounts::ZERO }, &capacity())
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::DateUnavailable { status: LedgerStatus::WeatherIssue, .. }
        ));
    }

    #[test]
    fn test_release_floors_at_zero_and_reports_underflow() {
        let mut row = ledger();
        row.counts.passengers = 1;

        let underflow = row.release(
            &CategoryCounts { passengers: 2, ..CategoryCounts::ZERO },
            Utc::now(),
        );
        assert!(underflow);
        assert_eq!(row.counts.passengers, 0);
    }

    #[test]
    fn test_schedule_cascade_respects_explicit_overrides() {
        let now = Utc::now();
        let mut open = ledger();
        let mut cancelled = ledger();
        cancelled.apply_override(
            &LedgerStatusUpdate {
                status: LedgerStatus::Cancelled,
                reason: Some("dry dock".to_string()),
                expires_at: None,
            },
            now,
        );

        assert!(open.follow_schedule_suspension(Some("maintenance"), None, now));
        assert!(!cancelled.follow_schedule_suspension(Some("maintenance"), None, now));
        assert_eq!(open.status, LedgerStatus::Inactive);
        assert!(open.modified_by_schedule);

        assert!(open.follow_schedule_reactivation(now));
        assert_eq!(open.status, LedgerStatus::Available);
        assert!(!cancelled.follow_schedule_reactivation(now));
        assert_eq!(cancelled.status, LedgerStatus::Cancelled);
    }

    #[test]
    fn test_reactivation_skips_override_even_if_flag_was_set() {
        let now = Utc::now();
        let mut row = ledger();
        row.status = LedgerStatus::Departed;
        row.modified_by_schedule = true;

        assert!(!row.follow_schedule_reactivation(now));
        assert_eq!(row.status, LedgerStatus::Departed);
    }

    #[test]
    fn test_weather_hold_lifts_only_after_expiry() {
        let now = Utc::now();
        let mut row = ledger();
        row.apply_override(
            &LedgerStatusUpdate {
                status: LedgerStatus::WeatherIssue,
                reason: Some("swell".to_string()),
                expires_at: Some(now + chrono::Duration::hours(2)),
            },
            now,
        );

        assert!(!row.lift_expired_weather_hold(now));
        assert!(row.lift_expired_weather_hold(now + chrono::Duration::hours(3)));
        assert_eq!(row.status, LedgerStatus::Available);
        assert!(row.status_expires_at.is_none());
    }

    proptest! {
        #[test]
        fn prop_reserve_never_exceeds_capacity(
            requests in proptest::collection::vec((0u32..4, 0u32..2, 0u32..2), 0..40)
        ) {
            let cap = capacity();
            let mut row = ledger();
            for (passengers, cars, trucks) in requests {
                let delta = CategoryCounts { passengers, cars, trucks, ..CategoryCounts::ZERO };
                let _ = row.reserve(&delta, &cap, Utc::now());
                for category in Category::ALL {
                    prop_assert!(row.counts.get(category) <= cap.get(category));
                }
            }
        }

        #[test]
        fn prop_reserve_then_release_restores_counts(passengers in 0u32..10, cars in 0u32..3) {
            let cap = capacity();
            let mut row = ledger();
            row.counts.passengers = 0;
            let delta = CategoryCounts { passengers, cars, ..CategoryCounts::ZERO };
            if row.reserve(&delta, &cap, Utc::now()).is_ok() {
                prop_assert!(!row.release(&delta, Utc::now()));
                prop_assert_eq!(row.counts, CategoryCounts::ZERO);
            }
        }
    }
}
