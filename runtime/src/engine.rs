//! Reservation Engine: validate, reserve, price and persist one booking.
//!
//! # Booking flow
//!
//! ```text
//! validate ─▶ load schedule snapshot ─▶ schedule ACTIVE? ─▶ operating day?
//!    ─▶ get-or-create ledger row ─▶ try_reserve (row lock, bounded retry)
//!    ─▶ insert booking + tickets + vehicles + creation log
//!         └─ on failure: release exactly what was reserved, then fail
//!    ─▶ payment collaborator ─▶ INITIATED payment attempt
//! ```
//!
//! Price and capacity come from the same [`ScheduleSnapshot`], read once.

use crate::environment::ReservationEnvironment;
use crate::metrics;
use crate::retry::retry_on_contention;
use chrono::NaiveDate;
use ferry_core::booking::generate_booking_code;
use ferry_core::{
    Actor, Availability, Booking, BookingLogEntry, BookingRepository, BookingRequest,
    BookingStatus, CapacityLedger, CategoryCounts, LedgerKey, LedgerRepository, LedgerStatus,
    LedgerStatusUpdate, Payment, ReservationError, ReservationStore, Result, ScheduleCascade,
    ScheduleId, ScheduleRepository, ScheduleSnapshot, ScheduleStatus, ScheduleStatusChange,
    VehicleType,
};
use std::time::Instant;

/// A booking that was created and handed to the payment collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingReceipt {
    /// The PENDING booking
    pub booking: Booking,
    /// Its INITIATED payment attempt
    pub payment: Payment,
}

/// Books sailings and administers capacity ledger rows.
pub struct ReservationEngine<S> {
    env: ReservationEnvironment<S>,
}

impl<S> Clone for ReservationEngine<S> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
        }
    }
}

impl<S: ReservationStore> ReservationEngine<S> {
    /// Creates a new `ReservationEngine`
    #[must_use]
    pub const fn new(env: ReservationEnvironment<S>) -> Self {
        Self { env }
    }

    /// The injected dependencies
    #[must_use]
    pub const fn env(&self) -> &ReservationEnvironment<S> {
        &self.env
    }

    // ========================================================================
    // Booking
    // ========================================================================

    /// Books `request` end to end for the requesting customer.
    ///
    /// # Errors
    ///
    /// - `Validation` for a malformed request or a sailing date before today
    ///   (no side effects)
    /// - `ScheduleNotFound`
    /// - `DayNotOperating` (no ledger row is created)
    /// - `DateUnavailable` / `CapacityExceeded` naming the status or category
    /// - `ConcurrencyConflict` when the row stayed contended through all retries
    /// - `Persistence` after the reservation was released again
    /// - `PaymentInitiationFailed`: the booking exists and stays PENDING
    pub async fn book(&self, request: BookingRequest) -> Result<BookingReceipt> {
        let actor = Actor::user(request.user_id);
        let booking = self.place(&request, actor).await?;
        let payment = self.env.initiate_payment(&booking).await?;
        Ok(BookingReceipt { booking, payment })
    }

    /// Reserves capacity and persists a PENDING booking, without payment.
    pub(crate) async fn place(&self, request: &BookingRequest, actor: Actor) -> Result<Booking> {
        let started = Instant::now();
        let outcome = self.reserve_and_persist(request, actor).await;
        match &outcome {
            Ok(booking) => {
                metrics::reservation_created(started.elapsed());
                tracing::info!(
                    booking_code = %booking.booking_code,
                    ledger = %booking.ledger_key(),
                    passengers = booking.passenger_count,
                    vehicles = booking.vehicle_count,
                    total = %booking.total_amount,
                    "Booking created"
                );
            }
            Err(error) => {
                metrics::reservation_rejected(error);
                tracing::warn!(
                    ledger = %request.ledger_key(),
                    error = %error,
                    "Booking rejected"
                );
            }
        }
        outcome
    }

    async fn reserve_and_persist(&self, request: &BookingRequest, actor: Actor) -> Result<Booking> {
        request.validate()?;
        let now = self.env.clock.now();
        if request.date < now.date_naive() {
            return Err(ReservationError::Validation(format!(
                "sailing date {} is in the past",
                request.date
            )));
        }

        let store = &self.env.store;
        let snapshot = store.load_schedule(request.schedule_id).await?;
        let key = request.ledger_key();

        snapshot.schedule.ensure_operating_on(request.date)?;
        if snapshot.schedule.status == ScheduleStatus::Inactive {
            return Err(ReservationError::DateUnavailable {
                key,
                status: LedgerStatus::Inactive,
                reason: snapshot.schedule.status_reason.clone(),
            });
        }

        let delta = request.capacity_delta();
        let vehicle_types: Vec<VehicleType> =
            request.vehicles.iter().map(|v| v.vehicle_type).collect();
        let total = snapshot.pricing.quote(delta.passengers, &vehicle_types)?;

        store.get_or_create_ledger(key, now).await?;
        let ledger = retry_on_contention(self.env.lock_retry, || {
            store.try_reserve(key, delta, snapshot.capacity, now)
        })
        .await?;
        tracing::debug!(ledger = %key, counts = ?ledger.counts, "Capacity reserved");

        let booking_code = generate_booking_code(&mut rand::thread_rng());
        let booking = Booking::pending(request, booking_code, total, now);
        let log = BookingLogEntry {
            booking_id: booking.id,
            previous_status: None,
            new_status: BookingStatus::Pending,
            changed_by_type: actor.kind,
            changed_by_id: actor.id,
            notes: None,
            created_at: now,
        };

        if let Err(error) = store.insert_booking(&booking, &log).await {
            self.compensate(key, delta, &error).await;
            return Err(error);
        }
        Ok(booking)
    }

    /// Gives back a reservation whose booking could not be stored.
    async fn compensate(&self, key: LedgerKey, delta: CategoryCounts, cause: &ReservationError) {
        let store = &self.env.store;
        let now = self.env.clock.now();
        match retry_on_contention(self.env.lock_retry, || store.release(key, delta, now)).await
        {
            Ok(_) => {
                metrics::reservation_compensated();
                tracing::warn!(ledger = %key, cause = %cause, "Reservation rolled back");
            }
            Err(error) => {
                tracing::error!(
                    ledger = %key,
                    cause = %cause,
                    error = %error,
                    delta = ?delta,
                    "Compensating release failed; ledger counts need reconciliation"
                );
            }
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Capacity, reserved and remaining counts for one sailing. Never creates
    /// a ledger row.
    ///
    /// # Errors
    ///
    /// `ScheduleNotFound`, `DayNotOperating` or `Persistence`.
    pub async fn availability(&self, schedule_id: ScheduleId, date: NaiveDate) -> Result<Availability> {
        let snapshot = self.env.store.load_schedule(schedule_id).await?;
        snapshot.schedule.ensure_operating_on(date)?;

        let key = LedgerKey::new(schedule_id, date);
        let (status, reserved) = match self.env.store.find_ledger(key).await? {
            Some(ledger) => (ledger.status, ledger.counts),
            None => (unopened_status(&snapshot), CategoryCounts::ZERO),
        };
        Ok(Availability {
            key,
            status,
            capacity: snapshot.capacity,
            reserved,
            remaining: snapshot.capacity.saturating_sub(&reserved),
        })
    }

    // ========================================================================
    // Administration
    // ========================================================================

    /// Pre-creates ledger rows for every operating date in `[start, end]`.
    /// Existing rows are skipped; returns how many rows were created.
    ///
    /// # Errors
    ///
    /// `Validation` if `start > end`, `ScheduleNotFound` or `Persistence`.
    pub async fn ensure_ledgers(
        &self,
        schedule_id: ScheduleId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<usize> {
        if start > end {
            return Err(ReservationError::Validation(format!(
                "date range starts after it ends ({start} > {end})"
            )));
        }
        let snapshot = self.env.store.load_schedule(schedule_id).await?;
        let dates = snapshot.schedule.expand_date_range(start, end);
        let created = self
            .env
            .store
            .ensure_ledgers(schedule_id, &dates, self.env.clock.now())
            .await?;
        tracing::info!(
            schedule_id = %schedule_id,
            %start,
            %end,
            operating_dates = dates.len(),
            created,
            "Ledger rows ensured"
        );
        Ok(created)
    }

    /// Explicit per-date status override. Counts are untouched, and later
    /// schedule-level changes leave the row alone.
    ///
    /// # Errors
    ///
    /// `ScheduleNotFound`, `DayNotOperating`, `ConcurrencyConflict` or
    /// `Persistence`.
    pub async fn set_ledger_status(
        &self,
        key: LedgerKey,
        update: LedgerStatusUpdate,
        actor: Actor,
    ) -> Result<CapacityLedger> {
        let snapshot = self.env.store.load_schedule(key.schedule_id).await?;
        snapshot.schedule.ensure_operating_on(key.date)?;

        let store = &self.env.store;
        let now = self.env.clock.now();
        let ledger = retry_on_contention(self.env.lock_retry, || {
            store.set_ledger_status(key, &update, now)
        })
        .await?;
        tracing::info!(
            ledger = %key,
            status = %ledger.status,
            reason = ?ledger.status_reason,
            actor = actor.kind.as_str(),
            "Ledger status overridden"
        );
        Ok(ledger)
    }

    /// Changes a schedule's status and cascades it to ledger rows from today
    /// on. INACTIVE closes AVAILABLE rows; ACTIVE reopens exactly the rows a
    /// suspension closed.
    ///
    /// # Errors
    ///
    /// `ScheduleNotFound`, `ConcurrencyConflict` or `Persistence`.
    pub async fn set_schedule_status(
        &self,
        schedule_id: ScheduleId,
        status: ScheduleStatus,
        reason: Option<String>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
        actor: Actor,
    ) -> Result<ScheduleCascade> {
        let now = self.env.clock.now();
        let change = match status {
            ScheduleStatus::Inactive => ScheduleStatusChange {
                schedule_id,
                status,
                reason,
                expires_at,
                from_date: now.date_naive(),
                at: now,
                only_if_expired_before: None,
            },
            ScheduleStatus::Active => ScheduleStatusChange {
                schedule_id,
                status,
                reason: None,
                expires_at: None,
                from_date: now.date_naive(),
                at: now,
                only_if_expired_before: None,
            },
        };

        let store = &self.env.store;
        let cascade = retry_on_contention(self.env.lock_retry, || {
            store.apply_schedule_status(&change)
        })
        .await?;
        tracing::info!(
            schedule_id = %schedule_id,
            status = status.as_str(),
            ledgers_changed = cascade.ledgers_changed,
            actor = actor.kind.as_str(),
            "Schedule status changed"
        );
        Ok(cascade)
    }

    /// Registers or replaces a schedule with its capacity and prices.
    ///
    /// # Errors
    ///
    /// `Validation` for an inconsistent schedule, or `Persistence`.
    pub async fn register_schedule(&self, snapshot: &ScheduleSnapshot) -> Result<()> {
        snapshot.schedule.validate()?;
        self.env.store.store_schedule(snapshot).await
    }
}

/// Status reported for a sailing that has no ledger row yet.
const fn unopened_status(snapshot: &ScheduleSnapshot) -> LedgerStatus {
    match snapshot.schedule.status {
        ScheduleStatus::Active => LedgerStatus::Available,
        ScheduleStatus::Inactive => LedgerStatus::Inactive,
    }
}
