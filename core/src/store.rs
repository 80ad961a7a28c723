//! Repository traits implemented by the in-memory and PostgreSQL stores.
//!
//! # Atomicity contract
//!
//! - [`LedgerRepository::try_reserve`] and [`LedgerRepository::release`] are
//!   linearizable per ledger row: the status check, the capacity check and
//!   the write happen under one exclusive row lock. Lock waits are bounded;
//!   a wait that times out returns
//!   [`ConcurrencyConflict`](crate::ReservationError::ConcurrencyConflict).
//! - [`BookingRepository::commit_transition`] writes the status, tickets,
//!   capacity release and audit entry as one unit, conditional on the
//!   booking still being in the expected status.
//! - [`ScheduleRepository::apply_schedule_status`] changes the schedule and
//!   cascades to its future ledger rows as one unit.

use crate::booking::{Booking, BookingLogEntry, BookingStatus, Payment, PaymentReference, PaymentStatus};
use crate::error::Result;
use crate::ledger::{CapacityLedger, LedgerKey, LedgerStatusUpdate};
use crate::refund::{Refund, RefundStatus};
use crate::schedule::{Schedule, ScheduleSnapshot, ScheduleStatus};
use crate::state_machine::BookingTransition;
use crate::types::{BookingId, CategoryCounts, RefundId, ScheduleId};
use chrono::{DateTime, NaiveDate, Utc};
use std::future::Future;

/// A schedule status change to apply together with its ledger cascade.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleStatusChange {
    /// Schedule
    pub schedule_id: ScheduleId,
    /// New status
    pub status: ScheduleStatus,
    /// Reason
    pub reason: Option<String>,
    /// When an INACTIVE status lapses
    pub expires_at: Option<DateTime<Utc>>,
    /// Ledger rows dated before this are history and never cascade
    pub from_date: NaiveDate,
    /// When
    pub at: DateTime<Utc>,
    /// Apply only if, under the schedule lock, the schedule is still INACTIVE
    /// with an expiry before this instant. Otherwise nothing changes.
    pub only_if_expired_before: Option<DateTime<Utc>>,
}

impl ScheduleStatusChange {
    /// Whether `schedule`, as read under its lock, still admits this change.
    #[must_use]
    pub fn admits(&self, schedule: &Schedule) -> bool {
        self.only_if_expired_before
            .is_none_or(|now| schedule.inactive_status_expired(now))
    }
}

/// Outcome of a schedule status change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScheduleCascade {
    /// The schedule after the change
    pub schedule: Schedule,
    /// Ledger rows whose status followed the schedule
    pub ledgers_changed: usize,
    /// False when the change's precondition no longer held
    pub applied: bool,
}

/// Schedules and the read-only capacity/pricing inputs captured with them.
pub trait ScheduleRepository: Send + Sync {
    /// Load a schedule with its ferry capacity and route prices.
    ///
    /// # Errors
    ///
    /// - [`ScheduleNotFound`](crate::ReservationError::ScheduleNotFound)
    /// - [`Persistence`](crate::ReservationError::Persistence)
    fn load_schedule(
        &self,
        schedule_id: ScheduleId,
    ) -> impl Future<Output = Result<ScheduleSnapshot>> + Send;

    /// Insert or replace a schedule with its capacity and prices.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the write fails.
    fn store_schedule(&self, snapshot: &ScheduleSnapshot) -> impl Future<Output = Result<()>> + Send;

    /// Change a schedule's status and cascade to ledger rows dated on or
    /// after `change.from_date`: INACTIVE closes AVAILABLE rows (marking them
    /// `modified_by_schedule`), ACTIVE reopens exactly those rows.
    ///
    /// # Errors
    ///
    /// - [`ScheduleNotFound`](crate::ReservationError::ScheduleNotFound)
    /// - `ConcurrencyConflict` / `Persistence`
    fn apply_schedule_status(
        &self,
        change: &ScheduleStatusChange,
    ) -> impl Future<Output = Result<ScheduleCascade>> + Send;

    /// Schedules whose INACTIVE status expired before `now`.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    fn expired_inactive_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Schedule>>> + Send;
}

/// Capacity ledger rows.
pub trait LedgerRepository: Send + Sync {
    /// Returns the row for `key`, creating an empty AVAILABLE row if none
    /// exists. Concurrent calls converge on one row.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the write fails.
    fn get_or_create_ledger(
        &self,
        key: LedgerKey,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<CapacityLedger>> + Send;

    /// Returns the row for `key` without creating it.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    fn find_ledger(
        &self,
        key: LedgerKey,
    ) -> impl Future<Output = Result<Option<CapacityLedger>>> + Send;

    /// Atomically checks status and capacity and applies `delta`.
    ///
    /// # Errors
    ///
    /// - `LedgerNotFound` if the row does not exist
    /// - `DateUnavailable` / `CapacityExceeded`, with no side effects
    /// - `ConcurrencyConflict` if the row lock could not be acquired in time
    fn try_reserve(
        &self,
        key: LedgerKey,
        delta: CategoryCounts,
        capacity: CategoryCounts,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<CapacityLedger>> + Send;

    /// Atomically decrements counts, floored at zero.
    ///
    /// # Errors
    ///
    /// - `LedgerNotFound` if the row does not exist
    /// - `ConcurrencyConflict` if the row lock could not be acquired in time
    fn release(
        &self,
        key: LedgerKey,
        delta: CategoryCounts,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<CapacityLedger>> + Send;

    /// Explicit per-date override; creates the row if missing.
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` / `Persistence`.
    fn set_ledger_status(
        &self,
        key: LedgerKey,
        update: &LedgerStatusUpdate,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<CapacityLedger>> + Send;

    /// Creates missing rows for `dates`, skipping existing ones. Returns how
    /// many rows were created.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the write fails.
    fn ensure_ledgers(
        &self,
        schedule_id: ScheduleId,
        dates: &[NaiveDate],
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<usize>> + Send;

    /// Reopens WEATHER_ISSUE rows whose expiry passed before `now`, each under
    /// its row lock. Returns the rows changed.
    ///
    /// # Errors
    ///
    /// `ConcurrencyConflict` / `Persistence`.
    fn expire_weather_holds(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<CapacityLedger>>> + Send;
}

/// Bookings, their tickets, payment attempts and audit trail.
pub trait BookingRepository: Send + Sync {
    /// Persist a new booking with its tickets, vehicles and creation log
    /// entry.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the write fails; nothing is written.
    fn insert_booking(
        &self,
        booking: &Booking,
        log: &BookingLogEntry,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Load a booking with its tickets and vehicles.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` / `Persistence`.
    fn load_booking(&self, booking_id: BookingId) -> impl Future<Output = Result<Booking>> + Send;

    /// Load a booking by its shareable code.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` / `Persistence`.
    fn find_booking_by_code(&self, booking_code: &str) -> impl Future<Output = Result<Booking>> + Send;

    /// Load the booking owning a ticket.
    ///
    /// # Errors
    ///
    /// `TicketNotFound` / `Persistence`.
    fn find_booking_by_ticket(&self, ticket_code: &str) -> impl Future<Output = Result<Booking>> + Send;

    /// Commit a transition if the booking is still in
    /// `transition.expected_status`; returns the booking as committed.
    ///
    /// # Errors
    ///
    /// - `ConcurrencyConflict` if the status moved on (nothing written)
    /// - `BookingNotFound` / `Persistence`
    fn commit_transition(
        &self,
        transition: &BookingTransition,
    ) -> impl Future<Output = Result<Booking>> + Send;

    /// Mark an ACTIVE ticket boarded and used.
    ///
    /// # Errors
    ///
    /// - `TicketNotFound`
    /// - `ConcurrencyConflict` if the ticket is no longer ACTIVE
    fn mark_ticket_boarded(
        &self,
        ticket_code: &str,
        boarding_time: DateTime<Utc>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Bookings on one sailing in `status`.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    fn bookings_for_sailing(
        &self,
        key: LedgerKey,
        status: BookingStatus,
    ) -> impl Future<Output = Result<Vec<Booking>>> + Send;

    /// Append a payment attempt.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the write fails.
    fn record_payment(&self, payment: &Payment) -> impl Future<Output = Result<()>> + Send;

    /// Update a payment attempt's status if it is still in `expected`.
    ///
    /// # Errors
    ///
    /// - `PaymentNotFound`
    /// - `ConcurrencyConflict` if the status moved on
    fn update_payment_status(
        &self,
        reference: &PaymentReference,
        expected: PaymentStatus,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> impl Future<Output = Result<Payment>> + Send;

    /// Look up a payment attempt by collaborator reference.
    ///
    /// # Errors
    ///
    /// `PaymentNotFound` / `Persistence`.
    fn find_payment(
        &self,
        reference: &PaymentReference,
    ) -> impl Future<Output = Result<Payment>> + Send;

    /// Payment attempts for a booking, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    fn payments_for(&self, booking_id: BookingId) -> impl Future<Output = Result<Vec<Payment>>> + Send;

    /// Audit trail for a booking, in append order.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    fn booking_logs(
        &self,
        booking_id: BookingId,
    ) -> impl Future<Output = Result<Vec<BookingLogEntry>>> + Send;
}

/// Refunds.
pub trait RefundRepository: Send + Sync {
    /// The booking's active (not REJECTED, not CANCELLED) refund, if any.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the query fails.
    fn active_refund(
        &self,
        booking_id: BookingId,
    ) -> impl Future<Output = Result<Option<Refund>>> + Send;

    /// Load a refund.
    ///
    /// # Errors
    ///
    /// `RefundNotFound` / `Persistence`.
    fn find_refund(&self, refund_id: RefundId) -> impl Future<Output = Result<Refund>> + Send;

    /// Insert a PENDING refund and commit the booking's move to
    /// REFUND_PENDING as one unit.
    ///
    /// # Errors
    ///
    /// - `RefundAlreadyActive` if another active refund exists
    /// - `ConcurrencyConflict` if the booking status moved on
    fn create_refund(
        &self,
        refund: &Refund,
        transition: &BookingTransition,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write `refund` if the stored refund is still in `expected`, together
    /// with an optional booking transition.
    ///
    /// # Errors
    ///
    /// - `RefundNotFound`
    /// - `ConcurrencyConflict` if either status moved on (nothing written)
    fn update_refund(
        &self,
        refund: &Refund,
        expected: RefundStatus,
        transition: Option<&BookingTransition>,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Everything the runtime needs from storage.
pub trait ReservationStore:
    ScheduleRepository + LedgerRepository + BookingRepository + RefundRepository + 'static
{
}

impl<T> ReservationStore for T where
    T: ScheduleRepository + LedgerRepository + BookingRepository + RefundRepository + 'static
{
}
