//! In-memory [`ReservationStore`](ferry_core::ReservationStore).
//!
//! Each ledger row sits behind its own `tokio::sync::Mutex`, acquired with a
//! bounded wait, so reservations against one sailing serialize exactly like
//! `SELECT … FOR UPDATE` does in PostgreSQL while different sailings proceed
//! in parallel. Booking tables share one `std::sync::Mutex` that is never held
//! across an `.await`.
//!
//! Fault injection (`fail_next_*`) makes the next N calls of an operation fail
//! with a persistence error so compensation paths can be tested.

use chrono::{DateTime, NaiveDate, Utc};
use ferry_core::{
    BoardingStatus, Booking, BookingId, BookingLogEntry, BookingRepository, BookingStatus,
    BookingTransition, CapacityLedger, CategoryCounts, LedgerKey, LedgerRepository,
    LedgerStatusUpdate, Payment, PaymentReference, PaymentStatus, Refund, RefundId,
    RefundRepository, RefundStatus, ReservationError, Result, Schedule, ScheduleCascade,
    ScheduleId, ScheduleRepository, ScheduleSnapshot, ScheduleStatus, ScheduleStatusChange,
    TicketStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as RowLock, OwnedMutexGuard};

/// Default bounded wait for a ledger row lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(2);

type LedgerRow = Arc<RowLock<CapacityLedger>>;

#[derive(Default)]
struct Tables {
    bookings: HashMap<BookingId, Booking>,
    codes: HashMap<String, BookingId>,
    tickets: HashMap<String, BookingId>,
    logs: HashMap<BookingId, Vec<BookingLogEntry>>,
    payments: Vec<Payment>,
    refunds: HashMap<RefundId, Refund>,
}

impl Tables {
    fn check_expected(&self, transition: &BookingTransition) -> Result<()> {
        let booking = self
            .bookings
            .get(&transition.booking_id)
            .ok_or_else(|| ReservationError::BookingNotFound(transition.booking_id.to_string()))?;
        if booking.status == transition.expected_status {
            Ok(())
        } else {
            Err(ReservationError::ConcurrencyConflict {
                resource: format!("booking {}", booking.booking_code),
            })
        }
    }

    fn apply(&mut self, transition: &BookingTransition) -> Result<Booking> {
        let booking = self
            .bookings
            .get_mut(&transition.booking_id)
            .ok_or_else(|| ReservationError::BookingNotFound(transition.booking_id.to_string()))?;
        booking.status = transition.new_status;
        booking.updated_at = transition.at;
        if let Some(reason) = &transition.cancellation_reason {
            booking.cancellation_reason = Some(reason.clone());
        }
        if transition.cancel_tickets {
            for ticket in &mut booking.tickets {
                if ticket.status == TicketStatus::Active {
                    ticket.status = TicketStatus::Cancelled;
                }
            }
        }
        let committed = booking.clone();
        self.logs
            .entry(transition.booking_id)
            .or_default()
            .extend(transition.log.iter().cloned());
        Ok(committed)
    }
}

#[derive(Default)]
struct Faults {
    booking_inserts: AtomicUsize,
    transition_commits: AtomicUsize,
}

impl Faults {
    /// Consumes one scheduled failure, if any.
    fn trip(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct Inner {
    schedules: Mutex<HashMap<ScheduleId, ScheduleSnapshot>>,
    ledgers: Mutex<HashMap<LedgerKey, LedgerRow>>,
    tables: Mutex<Tables>,
    faults: Faults,
    lock_timeout: Duration,
}

/// Linearizable in-memory store.
#[derive(Clone)]
pub struct InMemoryReservationStore {
    inner: Arc<Inner>,
}

impl InMemoryReservationStore {
    /// Empty store with the default lock timeout
    #[must_use]
    pub fn new() -> Self {
        Self::with_lock_timeout(DEFAULT_LOCK_TIMEOUT)
    }

    /// Empty store with a custom bounded wait for ledger row locks
    #[must_use]
    pub fn with_lock_timeout(lock_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                schedules: Mutex::new(HashMap::new()),
                ledgers: Mutex::new(HashMap::new()),
                tables: Mutex::new(Tables::default()),
                faults: Faults::default(),
                lock_timeout,
            }),
        }
    }

    /// Make the next `count` booking inserts fail.
    pub fn fail_next_booking_inserts(&self, count: usize) {
        self.inner.faults.booking_inserts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` booking transition commits fail.
    pub fn fail_next_transition_commits(&self, count: usize) {
        self.inner.faults.transition_commits.store(count, Ordering::SeqCst);
    }

    /// Lock a ledger row from outside, to simulate a long-running holder.
    ///
    /// # Errors
    ///
    /// `LedgerNotFound`, or `ConcurrencyConflict` if already held past the
    /// timeout.
    pub async fn hold_ledger_row(&self, key: LedgerKey) -> Result<OwnedMutexGuard<CapacityLedger>> {
        self.lock_row(key).await
    }

    /// Number of ledger rows for a schedule.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if a store mutex is poisoned.
    pub fn ledger_row_count(&self, schedule_id: ScheduleId) -> Result<usize> {
        Ok(self
            .ledgers()?
            .keys()
            .filter(|key| key.schedule_id == schedule_id)
            .count())
    }

    fn poisoned() -> ReservationError {
        ReservationError::Persistence("in-memory store mutex poisoned".to_string())
    }

    fn schedules(&self) -> Result<MutexGuard<'_, HashMap<ScheduleId, ScheduleSnapshot>>> {
        self.inner.schedules.lock().map_err(|_| Self::poisoned())
    }

    fn ledgers(&self) -> Result<MutexGuard<'_, HashMap<LedgerKey, LedgerRow>>> {
        self.inner.ledgers.lock().map_err(|_| Self::poisoned())
    }

    fn tables(&self) -> Result<MutexGuard<'_, Tables>> {
        self.inner.tables.lock().map_err(|_| Self::poisoned())
    }

    async fn acquire(&self, key: LedgerKey, row: LedgerRow) -> Result<OwnedMutexGuard<CapacityLedger>> {
        tokio::time::timeout(self.inner.lock_timeout, row.lock_owned())
            .await
            .map_err(|_| ReservationError::ledger_contended(&key))
    }

    async fn lock_row(&self, key: LedgerKey) -> Result<OwnedMutexGuard<CapacityLedger>> {
        let row = self
            .ledgers()?
            .get(&key)
            .cloned()
            .ok_or(ReservationError::LedgerNotFound(key))?;
        self.acquire(key, row).await
    }

    /// A fresh row. Rows created while the schedule is suspended start
    /// INACTIVE, as if the suspension had cascaded to them.
    fn fresh_row(&self, key: LedgerKey, now: DateTime<Utc>) -> Result<CapacityLedger> {
        let mut row = CapacityLedger::open(key, now);
        let schedules = self.schedules()?;
        if let Some(snapshot) = schedules.get(&key.schedule_id) {
            if snapshot.schedule.status == ScheduleStatus::Inactive {
                row.follow_schedule_suspension(
                    snapshot.schedule.status_reason.as_deref(),
                    snapshot.schedule.status_expires_at,
                    now,
                );
            }
        }
        Ok(row)
    }

    fn row_or_insert(&self, key: LedgerKey, now: DateTime<Utc>) -> Result<LedgerRow> {
        let fresh = self.fresh_row(key, now)?;
        let mut ledgers = self.ledgers()?;
        Ok(Arc::clone(
            ledgers
                .entry(key)
                .or_insert_with(|| Arc::new(RowLock::new(fresh))),
        ))
    }

    /// Commits an optional booking transition plus `extra` table writes as
    /// one unit. `extra` must validate before it mutates.
    async fn commit<F>(&self, transition: Option<&BookingTransition>, extra: F) -> Result<Option<Booking>>
    where
        F: FnOnce(&mut Tables) -> Result<()> + Send,
    {
        let mut row = match transition.and_then(|t| t.release) {
            Some((key, _)) => Some(self.lock_row(key).await?),
            None => None,
        };

        let committed = {
            let mut tables = self.tables()?;
            if let Some(transition) = transition {
                tables.check_expected(transition)?;
            }
            extra(&mut tables)?;
            match transition {
                Some(transition) => Some(tables.apply(transition)?),
                None => None,
            }
        };

        if let (Some(row), Some(transition)) = (row.as_mut(), transition) {
            if let Some((key, delta)) = transition.release {
                if row.release(&delta, transition.at) {
                    tracing::warn!(ledger = %key, "Release underflowed; counts floored at zero");
                }
            }
        }
        Ok(committed)
    }
}

impl Default for InMemoryReservationStore {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Schedules
// ============================================================================

impl ScheduleRepository for InMemoryReservationStore {
    async fn load_schedule(&self, schedule_id: ScheduleId) -> Result<ScheduleSnapshot> {
        self.schedules()?
            .get(&schedule_id)
            .cloned()
            .ok_or(ReservationError::ScheduleNotFound(schedule_id))
    }

    async fn store_schedule(&self, snapshot: &ScheduleSnapshot) -> Result<()> {
        snapshot.schedule.validate()?;
        self.schedules()?
            .insert(snapshot.schedule.id, snapshot.clone());
        Ok(())
    }

    async fn apply_schedule_status(&self, change: &ScheduleStatusChange) -> Result<ScheduleCascade> {
        if !self.schedules()?.contains_key(&change.schedule_id) {
            return Err(ReservationError::ScheduleNotFound(change.schedule_id));
        }

        let mut rows: Vec<(LedgerKey, LedgerRow)> = self
            .ledgers()?
            .iter()
            .filter(|(key, _)| key.schedule_id == change.schedule_id && key.date >= change.from_date)
            .map(|(key, row)| (*key, Arc::clone(row)))
            .collect();
        rows.sort_by_key(|(key, _)| *key);

        // Lock every affected row, in key order, before touching anything.
        let mut guards = Vec::with_capacity(rows.len());
        for (key, row) in rows {
            guards.push(self.acquire(key, row).await?);
        }

        let schedule = {
            let mut schedules = self.schedules()?;
            let snapshot = schedules
                .get_mut(&change.schedule_id)
                .ok_or(ReservationError::ScheduleNotFound(change.schedule_id))?;
            let schedule = &mut snapshot.schedule;
            if !change.admits(schedule) {
                tracing::debug!(
                    schedule_id = %change.schedule_id,
                    status = schedule.status.as_str(),
                    "Schedule status change no longer applies"
                );
                return Ok(ScheduleCascade {
                    schedule: schedule.clone(),
                    ledgers_changed: 0,
                    applied: false,
                });
            }
            schedule.status = change.status;
            schedule.status_reason.clone_from(&change.reason);
            schedule.status_expires_at = match change.status {
                ScheduleStatus::Inactive => change.expires_at,
                ScheduleStatus::Active => None,
            };
            schedule.clone()
        };

        let mut ledgers_changed = 0;
        for row in &mut guards {
            let changed = match change.status {
                ScheduleStatus::Inactive => {
                    row.follow_schedule_suspension(change.reason.as_deref(), change.expires_at, change.at)
                }
                ScheduleStatus::Active => row.follow_schedule_reactivation(change.at),
            };
            if changed {
                ledgers_changed += 1;
            }
        }

        Ok(ScheduleCascade {
            schedule,
            ledgers_changed,
            applied: true,
        })
    }

    async fn expired_inactive_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        Ok(self
            .schedules()?
            .values()
            .filter(|snapshot| snapshot.schedule.inactive_status_expired(now))
            .map(|snapshot| snapshot.schedule.clone())
            .collect())
    }
}

// ============================================================================
// Ledgers
// ============================================================================

impl LedgerRepository for InMemoryReservationStore {
    async fn get_or_create_ledger(&self, key: LedgerKey, now: DateTime<Utc>) -> Result<CapacityLedger> {
        let row = self.row_or_insert(key, now)?;
        let guard = self.acquire(key, row).await?;
        Ok(guard.clone())
    }

    async fn find_ledger(&self, key: LedgerKey) -> Result<Option<CapacityLedger>> {
        let row = self.ledgers()?.get(&key).cloned();
        match row {
            Some(row) => Ok(Some(self.acquire(key, row).await?.clone())),
            None => Ok(None),
        }
    }

    async fn try_reserve(
        &self,
        key: LedgerKey,
        delta: CategoryCounts,
        capacity: CategoryCounts,
        now: DateTime<Utc>,
    ) -> Result<CapacityLedger> {
        let mut row = self.lock_row(key).await?;
        row.reserve(&delta, &capacity, now)?;
        Ok(row.clone())
    }

    async fn release(&self, key: LedgerKey, delta: CategoryCounts, now: DateTime<Utc>) -> Result<CapacityLedger> {
        let mut row = self.lock_row(key).await?;
        if row.release(&delta, now) {
            tracing::warn!(ledger = %key, "Release underflowed; counts floored at zero");
        }
        Ok(row.clone())
    }

    async fn set_ledger_status(
        &self,
        key: LedgerKey,
        update: &LedgerStatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<CapacityLedger> {
        let row = self.row_or_insert(key, now)?;
        let mut row = self.acquire(key, row).await?;
        row.apply_override(update, now);
        Ok(row.clone())
    }

    async fn ensure_ledgers(&self, schedule_id: ScheduleId, dates: &[NaiveDate], now: DateTime<Utc>) -> Result<usize> {
        let mut fresh = Vec::with_capacity(dates.len());
        for date in dates {
            fresh.push(self.fresh_row(LedgerKey::new(schedule_id, *date), now)?);
        }

        let mut ledgers = self.ledgers()?;
        let mut created = 0;
        for row in fresh {
            if let std::collections::hash_map::Entry::Vacant(slot) = ledgers.entry(row.key) {
                slot.insert(Arc::new(RowLock::new(row)));
                created += 1;
            }
        }
        Ok(created)
    }

    async fn expire_weather_holds(&self, now: DateTime<Utc>) -> Result<Vec<CapacityLedger>> {
        let rows: Vec<(LedgerKey, LedgerRow)> = self
            .ledgers()?
            .iter()
            .map(|(key, row)| (*key, Arc::clone(row)))
            .collect();

        let mut lifted = Vec::new();
        for (key, row) in rows {
            let mut row = self.acquire(key, row).await?;
            if row.lift_expired_weather_hold(now) {
                lifted.push(row.clone());
            }
        }
        Ok(lifted)
    }
}

// ============================================================================
// Bookings
// ============================================================================

impl BookingRepository for InMemoryReservationStore {
    async fn insert_booking(&self, booking: &Booking, log: &BookingLogEntry) -> Result<()> {
        if Faults::trip(&self.inner.faults.booking_inserts) {
            return Err(ReservationError::Persistence(
                "injected failure: booking insert".to_string(),
            ));
        }

        let mut tables = self.tables()?;
        if tables.codes.contains_key(&booking.booking_code) {
            return Err(ReservationError::Persistence(format!(
                "duplicate booking code {}",
                booking.booking_code
            )));
        }
        tables.codes.insert(booking.booking_code.clone(), booking.id);
        for ticket in &booking.tickets {
            tables.tickets.insert(ticket.ticket_code.clone(), booking.id);
        }
        tables.logs.insert(booking.id, vec![log.clone()]);
        tables.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn load_booking(&self, booking_id: BookingId) -> Result<Booking> {
        self.tables()?
            .bookings
            .get(&booking_id)
            .cloned()
            .ok_or_else(|| ReservationError::BookingNotFound(booking_id.to_string()))
    }

    async fn find_booking_by_code(&self, booking_code: &str) -> Result<Booking> {
        let tables = self.tables()?;
        tables
            .codes
            .get(booking_code)
            .and_then(|id| tables.bookings.get(id))
            .cloned()
            .ok_or_else(|| ReservationError::BookingNotFound(booking_code.to_string()))
    }

    async fn find_booking_by_ticket(&self, ticket_code: &str) -> Result<Booking> {
        let tables = self.tables()?;
        tables
            .tickets
            .get(ticket_code)
            .and_then(|id| tables.bookings.get(id))
            .cloned()
            .ok_or_else(|| ReservationError::TicketNotFound(ticket_code.to_string()))
    }

    async fn commit_transition(&self, transition: &BookingTransition) -> Result<Booking> {
        if Faults::trip(&self.inner.faults.transition_commits) {
            return Err(ReservationError::Persistence(
                "injected failure: transition commit".to_string(),
            ));
        }
        self.commit(Some(transition), |_| Ok(()))
            .await?
            .ok_or_else(|| ReservationError::BookingNotFound(transition.booking_id.to_string()))
    }

    async fn mark_ticket_boarded(&self, ticket_code: &str, boarding_time: DateTime<Utc>) -> Result<()> {
        let mut tables = self.tables()?;
        let booking_id = *tables
            .tickets
            .get(ticket_code)
            .ok_or_else(|| ReservationError::TicketNotFound(ticket_code.to_string()))?;
        let ticket = tables
            .bookings
            .get_mut(&booking_id)
            .and_then(|booking| booking.tickets.iter_mut().find(|t| t.ticket_code == ticket_code))
            .ok_or_else(|| ReservationError::TicketNotFound(ticket_code.to_string()))?;

        if ticket.status != TicketStatus::Active {
            return Err(ReservationError::ConcurrencyConflict {
                resource: format!("ticket {ticket_code}"),
            });
        }
        ticket.status = TicketStatus::Used;
        ticket.boarding_status = BoardingStatus::Boarded;
        ticket.checked_in = true;
        ticket.boarding_time = Some(boarding_time);
        Ok(())
    }

    async fn bookings_for_sailing(&self, key: LedgerKey, status: BookingStatus) -> Result<Vec<Booking>> {
        let mut bookings: Vec<Booking> = self
            .tables()?
            .bookings
            .values()
            .filter(|b| b.ledger_key() == key && b.status == status)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn record_payment(&self, payment: &Payment) -> Result<()> {
        self.tables()?.payments.push(payment.clone());
        Ok(())
    }

    async fn update_payment_status(
        &self,
        reference: &PaymentReference,
        expected: PaymentStatus,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let mut tables = self.tables()?;
        let payment = tables
            .payments
            .iter_mut()
            .find(|p| &p.reference == reference)
            .ok_or_else(|| ReservationError::PaymentNotFound(reference.to_string()))?;
        if payment.status != expected {
            return Err(ReservationError::ConcurrencyConflict {
                resource: format!("payment {reference}"),
            });
        }
        payment.status = status;
        payment.settled_at = Some(at);
        Ok(payment.clone())
    }

    async fn find_payment(&self, reference: &PaymentReference) -> Result<Payment> {
        self.tables()?
            .payments
            .iter()
            .find(|p| &p.reference == reference)
            .cloned()
            .ok_or_else(|| ReservationError::PaymentNotFound(reference.to_string()))
    }

    async fn payments_for(&self, booking_id: BookingId) -> Result<Vec<Payment>> {
        Ok(self
            .tables()?
            .payments
            .iter()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn booking_logs(&self, booking_id: BookingId) -> Result<Vec<BookingLogEntry>> {
        Ok(self
            .tables()?
            .logs
            .get(&booking_id)
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Refunds
// ============================================================================

impl RefundRepository for InMemoryReservationStore {
    async fn active_refund(&self, booking_id: BookingId) -> Result<Option<Refund>> {
        Ok(self
            .tables()?
            .refunds
            .values()
            .find(|r| r.booking_id == booking_id && r.status.is_active())
            .cloned())
    }

    async fn find_refund(&self, refund_id: RefundId) -> Result<Refund> {
        self.tables()?
            .refunds
            .get(&refund_id)
            .cloned()
            .ok_or(ReservationError::RefundNotFound(refund_id))
    }

    async fn create_refund(&self, refund: &Refund, transition: &BookingTransition) -> Result<()> {
        let refund = refund.clone();
        self.commit(Some(transition), move |tables| {
            if let Some(active) = tables
                .refunds
                .values()
                .find(|r| r.booking_id == refund.booking_id && r.status.is_active())
            {
                return Err(ReservationError::RefundAlreadyActive {
                    booking_id: refund.booking_id,
                    refund_id: active.id,
                });
            }
            tables.refunds.insert(refund.id, refund);
            Ok(())
        })
        .await?;
        Ok(())
    }

    async fn update_refund(
        &self,
        refund: &Refund,
        expected: RefundStatus,
        transition: Option<&BookingTransition>,
    ) -> Result<()> {
        let refund = refund.clone();
        self.commit(transition, move |tables| {
            let stored = tables
                .refunds
                .get_mut(&refund.id)
                .ok_or(ReservationError::RefundNotFound(refund.id))?;
            if stored.status != expected {
                return Err(ReservationError::ConcurrencyConflict {
                    resource: format!("refund {}", refund.id),
                });
            }
            *stored = refund;
            Ok(())
        })
        .await?;
        Ok(())
    }
}
