//! [`PostgresReservationStore`]: the repository traits over a `PgPool`.
//!
//! Every ledger mutation runs in its own transaction that takes the row with
//! `SELECT ... FOR UPDATE` under a bounded `lock_timeout`, applies the core
//! [`CapacityLedger`] rule in Rust and writes the row back. A lock wait that
//! times out surfaces as `ConcurrencyConflict`, which the runtime retries.

use crate::config::Config;
use crate::rows::{
    BOOKING_COLUMNS, LEDGER_COLUMNS, LOG_COLUMNS, PAYMENT_COLUMNS, REFUND_COLUMNS,
    SCHEDULE_COLUMNS, TICKET_COLUMNS, db_error, decode_booking, decode_ledger, decode_log,
    decode_payment, decode_refund, decode_snapshot, decode_ticket, decode_vehicle,
    is_unique_violation, operating_days_to_db, to_db_cents, to_db_count, to_db_index,
};
use chrono::{DateTime, NaiveDate, Utc};
use ferry_core::{
    BoardingStatus, Booking, BookingId, BookingLogEntry, BookingRepository, BookingStatus,
    BookingTransition, CapacityLedger, CategoryCounts, LedgerKey, LedgerRepository, LedgerStatus,
    LedgerStatusUpdate, Payment, PaymentReference, PaymentStatus, Refund, RefundId,
    RefundRepository, RefundStatus, ReservationError, Result, Schedule, ScheduleCascade, ScheduleId,
    ScheduleRepository, ScheduleSnapshot, ScheduleStatus, ScheduleStatusChange, TicketStatus,
};
use sqlx::postgres::{PgConnection, PgRow};
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;

/// PostgreSQL-backed reservation store.
#[derive(Clone, Debug)]
pub struct PostgresReservationStore {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresReservationStore {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self { pool, lock_timeout }
    }

    /// Wrap an existing pool with the default ledger lock timeout.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(pool, Config::default().ledger_lock_timeout)
    }

    /// Open a pool from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if the database is unreachable.
    pub async fn connect(config: &Config) -> Result<Self> {
        let pool = config
            .connect()
            .await
            .map_err(|e| ReservationError::Persistence(format!("Failed to connect: {e}")))?;
        Ok(Self::new(pool, config.ledger_lock_timeout))
    }

    /// Apply the embedded schema migrations.
    ///
    /// # Errors
    ///
    /// Returns `Persistence` if a migration fails.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ReservationError::Persistence(format!("Migration failed: {e}")))
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Starts a transaction whose row-lock waits are bounded.
    async fn begin(&self) -> Result<Transaction<'static, Postgres>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| db_error("begin transaction", &e))?;
        let millis = self.lock_timeout.as_millis().max(1);
        sqlx::query(&format!("SET LOCAL lock_timeout = '{millis}ms'"))
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("set lock_timeout", &e))?;
        Ok(tx)
    }

    async fn commit(tx: Transaction<'static, Postgres>) -> Result<()> {
        tx.commit().await.map_err(|e| db_error("commit", &e))
    }

    async fn fetch_booking(&self, row: Option<PgRow>, missing: ReservationError) -> Result<Booking> {
        let row = row.ok_or(missing)?;
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", &e))?;
        hydrate_booking(&mut conn, &row).await
    }
}

// ============================================================================
// Connection-level helpers
// ============================================================================

async fn hydrate_booking(conn: &mut PgConnection, row: &PgRow) -> Result<Booking> {
    let mut booking = decode_booking(row)?;
    let id = *booking.id.as_uuid();

    let tickets = sqlx::query(&format!(
        "SELECT {TICKET_COLUMNS} FROM tickets WHERE booking_id = $1 ORDER BY seat_index"
    ))
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("load tickets", &e))?;
    booking.tickets = tickets.iter().map(decode_ticket).collect::<Result<_>>()?;

    let vehicles = sqlx::query(
        "SELECT booking_id, vehicle_type, license_plate, owner_name \
         FROM booking_vehicles WHERE booking_id = $1 ORDER BY position",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| db_error("load vehicles", &e))?;
    booking.vehicles = vehicles.iter().map(decode_vehicle).collect::<Result<_>>()?;

    Ok(booking)
}

async fn load_schedule_in(conn: &mut PgConnection, schedule_id: ScheduleId) -> Result<ScheduleSnapshot> {
    let row = sqlx::query(&format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1"))
        .bind(*schedule_id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| db_error("load schedule", &e))?
        .ok_or(ReservationError::ScheduleNotFound(schedule_id))?;
    decode_snapshot(&row)
}

/// A new row for `key`; closed if the schedule is currently suspended.
fn fresh_ledger(schedule: &Schedule, key: LedgerKey, now: DateTime<Utc>) -> CapacityLedger {
    let mut ledger = CapacityLedger::open(key, now);
    if schedule.status == ScheduleStatus::Inactive {
        ledger.follow_schedule_suspension(
            schedule.status_reason.as_deref(),
            schedule.status_expires_at,
            now,
        );
    }
    ledger
}

async fn insert_ledger_if_missing(conn: &mut PgConnection, ledger: &CapacityLedger) -> Result<bool> {
    let counts = &ledger.counts;
    let inserted = sqlx::query(&format!(
        "INSERT INTO capacity_ledgers ({LEDGER_COLUMNS}) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
         ON CONFLICT (schedule_id, sailing_date) DO NOTHING"
    ))
    .bind(*ledger.key.schedule_id.as_uuid())
    .bind(ledger.key.date)
    .bind(ledger.status.as_str())
    .bind(ledger.status_reason.as_deref())
    .bind(ledger.status_expires_at)
    .bind(to_db_count(counts.passengers)?)
    .bind(to_db_count(counts.motorcycles)?)
    .bind(to_db_count(counts.cars)?)
    .bind(to_db_count(counts.buses)?)
    .bind(to_db_count(counts.trucks)?)
    .bind(ledger.modified_by_schedule)
    .bind(ledger.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error(&format!("ledger {}", ledger.key), &e))?;
    Ok(inserted.rows_affected() == 1)
}

async fn lock_ledger(conn: &mut PgConnection, key: LedgerKey) -> Result<Option<CapacityLedger>> {
    sqlx::query(&format!(
        "SELECT {LEDGER_COLUMNS} FROM capacity_ledgers \
         WHERE schedule_id = $1 AND sailing_date = $2 FOR UPDATE"
    ))
    .bind(*key.schedule_id.as_uuid())
    .bind(key.date)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| db_error(&format!("ledger {key}"), &e))?
    .as_ref()
    .map(decode_ledger)
    .transpose()
}

async fn write_ledger(conn: &mut PgConnection, ledger: &CapacityLedger) -> Result<()> {
    let counts = &ledger.counts;
    sqlx::query(
        "UPDATE capacity_ledgers SET status = $3, status_reason = $4, status_expires_at = $5, \
         passengers = $6, motorcycles = $7, cars = $8, buses = $9, trucks = $10, \
         modified_by_schedule = $11, updated_at = $12 \
         WHERE schedule_id = $1 AND sailing_date = $2",
    )
    .bind(*ledger.key.schedule_id.as_uuid())
    .bind(ledger.key.date)
    .bind(ledger.status.as_str())
    .bind(ledger.status_reason.as_deref())
    .bind(ledger.status_expires_at)
    .bind(to_db_count(counts.passengers)?)
    .bind(to_db_count(counts.motorcycles)?)
    .bind(to_db_count(counts.cars)?)
    .bind(to_db_count(counts.buses)?)
    .bind(to_db_count(counts.trucks)?)
    .bind(ledger.modified_by_schedule)
    .bind(ledger.updated_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error(&format!("ledger {}", ledger.key), &e))?;
    Ok(())
}

async fn insert_log(conn: &mut PgConnection, entry: &BookingLogEntry) -> Result<()> {
    sqlx::query(&format!(
        "INSERT INTO booking_logs ({LOG_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
    ))
    .bind(*entry.booking_id.as_uuid())
    .bind(entry.previous_status.map(|s| s.as_str()))
    .bind(entry.new_status.as_str())
    .bind(entry.changed_by_type.as_str())
    .bind(entry.changed_by_id)
    .bind(entry.notes.as_deref())
    .bind(entry.created_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error("append booking log", &e))?;
    Ok(())
}

/// Writes a booking transition inside the caller's transaction.
///
/// The ledger row is locked before the booking row, the same order
/// reservations take, so a cancel and a reserve never deadlock.
async fn apply_transition(conn: &mut PgConnection, transition: &BookingTransition) -> Result<()> {
    let mut ledger = match transition.release {
        Some((key, _)) => Some(
            lock_ledger(conn, key)
                .await?
                .ok_or(ReservationError::LedgerNotFound(key))?,
        ),
        None => None,
    };

    let booking_id = *transition.booking_id.as_uuid();
    let updated = sqlx::query(
        "UPDATE bookings SET status = $3, updated_at = $4, \
         cancellation_reason = COALESCE($5, cancellation_reason) \
         WHERE id = $1 AND status = $2",
    )
    .bind(booking_id)
    .bind(transition.expected_status.as_str())
    .bind(transition.new_status.as_str())
    .bind(transition.at)
    .bind(transition.cancellation_reason.as_deref())
    .execute(&mut *conn)
    .await
    .map_err(|e| db_error(&format!("booking {}", transition.booking_id), &e))?;

    if updated.rows_affected() == 0 {
        let exists = sqlx::query("SELECT 1 FROM bookings WHERE id = $1")
            .bind(booking_id)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| db_error("load booking", &e))?;
        return Err(match exists {
            Some(_) => ReservationError::ConcurrencyConflict {
                resource: format!("booking {}", transition.booking_id),
            },
            None => ReservationError::BookingNotFound(transition.booking_id.to_string()),
        });
    }

    if transition.cancel_tickets {
        sqlx::query("UPDATE tickets SET status = $3 WHERE booking_id = $1 AND status = $2")
            .bind(booking_id)
            .bind(TicketStatus::Active.as_str())
            .bind(TicketStatus::Cancelled.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| db_error("cancel tickets", &e))?;
    }

    if let (Some(ledger), Some((key, delta))) = (ledger.as_mut(), transition.release) {
        if ledger.release(&delta, transition.at) {
            tracing::warn!(ledger = %key, "Release underflowed; counts floored at zero");
        }
        write_ledger(conn, ledger).await?;
    }

    for entry in &transition.log {
        insert_log(conn, entry).await?;
    }
    Ok(())
}

// ============================================================================
// Schedules
// ============================================================================

impl ScheduleRepository for PostgresReservationStore {
    async fn load_schedule(&self, schedule_id: ScheduleId) -> Result<ScheduleSnapshot> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", &e))?;
        load_schedule_in(&mut conn, schedule_id).await
    }

    async fn store_schedule(&self, snapshot: &ScheduleSnapshot) -> Result<()> {
        let ScheduleSnapshot {
            schedule,
            capacity,
            pricing,
        } = snapshot;
        schedule.validate()?;

        sqlx::query(&format!(
            "INSERT INTO schedules ({SCHEDULE_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19) \
             ON CONFLICT (id) DO UPDATE SET \
             route_id = EXCLUDED.route_id, ferry_id = EXCLUDED.ferry_id, \
             departure_time = EXCLUDED.departure_time, arrival_time = EXCLUDED.arrival_time, \
             operating_days = EXCLUDED.operating_days, status = EXCLUDED.status, \
             status_reason = EXCLUDED.status_reason, status_expires_at = EXCLUDED.status_expires_at, \
             capacity_passengers = EXCLUDED.capacity_passengers, \
             capacity_motorcycles = EXCLUDED.capacity_motorcycles, \
             capacity_cars = EXCLUDED.capacity_cars, capacity_buses = EXCLUDED.capacity_buses, \
             capacity_trucks = EXCLUDED.capacity_trucks, base_price = EXCLUDED.base_price, \
             motorcycle_price = EXCLUDED.motorcycle_price, car_price = EXCLUDED.car_price, \
             bus_price = EXCLUDED.bus_price, truck_price = EXCLUDED.truck_price"
        ))
        .bind(*schedule.id.as_uuid())
        .bind(*schedule.route_id.as_uuid())
        .bind(*schedule.ferry_id.as_uuid())
        .bind(schedule.departure_time)
        .bind(schedule.arrival_time)
        .bind(operating_days_to_db(schedule.operating_days))
        .bind(schedule.status.as_str())
        .bind(schedule.status_reason.as_deref())
        .bind(schedule.status_expires_at)
        .bind(to_db_count(capacity.passengers)?)
        .bind(to_db_count(capacity.motorcycles)?)
        .bind(to_db_count(capacity.cars)?)
        .bind(to_db_count(capacity.buses)?)
        .bind(to_db_count(capacity.trucks)?)
        .bind(to_db_cents(pricing.base_price)?)
        .bind(to_db_cents(pricing.motorcycle_price)?)
        .bind(to_db_cents(pricing.car_price)?)
        .bind(to_db_cents(pricing.bus_price)?)
        .bind(to_db_cents(pricing.truck_price)?)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&format!("schedule {}", schedule.id), &e))?;
        Ok(())
    }

    async fn apply_schedule_status(&self, change: &ScheduleStatusChange) -> Result<ScheduleCascade> {
        let mut tx = self.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = $1 FOR UPDATE"
        ))
        .bind(*change.schedule_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("schedule {}", change.schedule_id), &e))?
        .ok_or(ReservationError::ScheduleNotFound(change.schedule_id))?;

        let mut schedule = decode_snapshot(&row)?.schedule;
        if !change.admits(&schedule) {
            tracing::debug!(
                schedule_id = %change.schedule_id,
                status = schedule.status.as_str(),
                "Schedule status change no longer applies"
            );
            return Ok(ScheduleCascade {
                schedule,
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

        sqlx::query(
            "UPDATE schedules SET status = $2, status_reason = $3, status_expires_at = $4 WHERE id = $1",
        )
        .bind(*schedule.id.as_uuid())
        .bind(schedule.status.as_str())
        .bind(schedule.status_reason.as_deref())
        .bind(schedule.status_expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("schedule {}", schedule.id), &e))?;

        // Lock every affected row, in date order, before touching anything.
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM capacity_ledgers \
             WHERE schedule_id = $1 AND sailing_date >= $2 \
             ORDER BY sailing_date FOR UPDATE"
        ))
        .bind(*change.schedule_id.as_uuid())
        .bind(change.from_date)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("ledgers of schedule {}", change.schedule_id), &e))?;

        let mut ledgers_changed = 0;
        for row in &rows {
            let mut ledger = decode_ledger(row)?;
            let changed = match change.status {
                ScheduleStatus::Inactive => ledger.follow_schedule_suspension(
                    change.reason.as_deref(),
                    change.expires_at,
                    change.at,
                ),
                ScheduleStatus::Active => ledger.follow_schedule_reactivation(change.at),
            };
            if changed {
                write_ledger(&mut tx, &ledger).await?;
                ledgers_changed += 1;
            }
        }

        Self::commit(tx).await?;
        Ok(ScheduleCascade {
            schedule,
            ledgers_changed,
            applied: true,
        })
    }

    async fn expired_inactive_schedules(&self, now: DateTime<Utc>) -> Result<Vec<Schedule>> {
        let rows = sqlx::query(&format!(
            "SELECT {SCHEDULE_COLUMNS} FROM schedules \
             WHERE status = $1 AND status_expires_at < $2 \
             ORDER BY status_expires_at, id"
        ))
        .bind(ScheduleStatus::Inactive.as_str())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error("expired schedules", &e))?;

        rows.iter()
            .map(|row| decode_snapshot(row).map(|snapshot| snapshot.schedule))
            .collect()
    }
}

// ============================================================================
// Ledgers
// ============================================================================

impl LedgerRepository for PostgresReservationStore {
    async fn get_or_create_ledger(&self, key: LedgerKey, now: DateTime<Utc>) -> Result<CapacityLedger> {
        if let Some(ledger) = self.find_ledger(key).await? {
            return Ok(ledger);
        }

        let mut tx = self.begin().await?;
        let snapshot = load_schedule_in(&mut tx, key.schedule_id).await?;
        insert_ledger_if_missing(&mut tx, &fresh_ledger(&snapshot.schedule, key, now)).await?;
        // A concurrent creator may have won; either way the row exists now.
        let ledger = lock_ledger(&mut tx, key)
            .await?
            .ok_or(ReservationError::LedgerNotFound(key))?;
        Self::commit(tx).await?;
        Ok(ledger)
    }

    async fn find_ledger(&self, key: LedgerKey) -> Result<Option<CapacityLedger>> {
        sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM capacity_ledgers WHERE schedule_id = $1 AND sailing_date = $2"
        ))
        .bind(*key.schedule_id.as_uuid())
        .bind(key.date)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&format!("ledger {key}"), &e))?
        .as_ref()
        .map(decode_ledger)
        .transpose()
    }

    async fn try_reserve(
        &self,
        key: LedgerKey,
        delta: CategoryCounts,
        capacity: CategoryCounts,
        now: DateTime<Utc>,
    ) -> Result<CapacityLedger> {
        let mut tx = self.begin().await?;
        let mut ledger = lock_ledger(&mut tx, key)
            .await?
            .ok_or(ReservationError::LedgerNotFound(key))?;
        // On rejection the transaction drops and rolls back untouched.
        ledger.reserve(&delta, &capacity, now)?;
        write_ledger(&mut tx, &ledger).await?;
        Self::commit(tx).await?;
        Ok(ledger)
    }

    async fn release(
        &self,
        key: LedgerKey,
        delta: CategoryCounts,
        now: DateTime<Utc>,
    ) -> Result<CapacityLedger> {
        let mut tx = self.begin().await?;
        let mut ledger = lock_ledger(&mut tx, key)
            .await?
            .ok_or(ReservationError::LedgerNotFound(key))?;
        if ledger.release(&delta, now) {
            tracing::warn!(ledger = %key, "Release underflowed; counts floored at zero");
        }
        write_ledger(&mut tx, &ledger).await?;
        Self::commit(tx).await?;
        Ok(ledger)
    }

    async fn set_ledger_status(
        &self,
        key: LedgerKey,
        update: &LedgerStatusUpdate,
        now: DateTime<Utc>,
    ) -> Result<CapacityLedger> {
        let mut tx = self.begin().await?;
        let snapshot = load_schedule_in(&mut tx, key.schedule_id).await?;
        insert_ledger_if_missing(&mut tx, &fresh_ledger(&snapshot.schedule, key, now)).await?;
        let mut ledger = lock_ledger(&mut tx, key)
            .await?
            .ok_or(ReservationError::LedgerNotFound(key))?;
        ledger.apply_override(update, now);
        write_ledger(&mut tx, &ledger).await?;
        Self::commit(tx).await?;
        Ok(ledger)
    }

    async fn ensure_ledgers(
        &self,
        schedule_id: ScheduleId,
        dates: &[NaiveDate],
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut tx = self.begin().await?;
        let snapshot = load_schedule_in(&mut tx, schedule_id).await?;
        let mut created = 0;
        for date in dates {
            let fresh = fresh_ledger(&snapshot.schedule, LedgerKey::new(schedule_id, *date), now);
            if insert_ledger_if_missing(&mut tx, &fresh).await? {
                created += 1;
            }
        }
        Self::commit(tx).await?;
        Ok(created)
    }

    async fn expire_weather_holds(&self, now: DateTime<Utc>) -> Result<Vec<CapacityLedger>> {
        let mut tx = self.begin().await?;
        let rows = sqlx::query(&format!(
            "SELECT {LEDGER_COLUMNS} FROM capacity_ledgers \
             WHERE status = $1 AND status_expires_at < $2 \
             ORDER BY schedule_id, sailing_date FOR UPDATE"
        ))
        .bind(LedgerStatus::WeatherIssue.as_str())
        .bind(now)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| db_error("weather holds", &e))?;

        let mut lifted = Vec::with_capacity(rows.len());
        for row in &rows {
            let mut ledger = decode_ledger(row)?;
            if ledger.lift_expired_weather_hold(now) {
                write_ledger(&mut tx, &ledger).await?;
                lifted.push(ledger);
            }
        }
        Self::commit(tx).await?;
        Ok(lifted)
    }
}

// ============================================================================
// Bookings
// ============================================================================

impl BookingRepository for PostgresReservationStore {
    async fn insert_booking(&self, booking: &Booking, log: &BookingLogEntry) -> Result<()> {
        let mut tx = self.begin().await?;

        sqlx::query(&format!(
            "INSERT INTO bookings ({BOOKING_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)"
        ))
        .bind(*booking.id.as_uuid())
        .bind(&booking.booking_code)
        .bind(*booking.user_id.as_uuid())
        .bind(*booking.schedule_id.as_uuid())
        .bind(booking.booking_date)
        .bind(to_db_count(booking.passenger_count)?)
        .bind(to_db_count(booking.vehicle_count)?)
        .bind(to_db_cents(booking.total_amount)?)
        .bind(booking.status.as_str())
        .bind(booking.cancellation_reason.as_deref())
        .bind(booking.channel.as_str())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("booking {}", booking.booking_code), &e))?;

        for (seat, ticket) in booking.tickets.iter().enumerate() {
            sqlx::query(
                "INSERT INTO tickets (ticket_code, booking_id, seat_index, qr_code, passenger_name, \
                 id_type, id_number, boarding_status, status, checked_in, boarding_time) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
            )
            .bind(&ticket.ticket_code)
            .bind(*booking.id.as_uuid())
            .bind(to_db_index(seat)?)
            .bind(&ticket.qr_code)
            .bind(&ticket.passenger.name)
            .bind(ticket.passenger.id_type.as_deref())
            .bind(ticket.passenger.id_number.as_deref())
            .bind(ticket.boarding_status.as_str())
            .bind(ticket.status.as_str())
            .bind(ticket.checked_in)
            .bind(ticket.boarding_time)
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error(&format!("ticket {}", ticket.ticket_code), &e))?;
        }

        for (position, vehicle) in booking.vehicles.iter().enumerate() {
            sqlx::query(
                "INSERT INTO booking_vehicles (booking_id, position, vehicle_type, license_plate, owner_name) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(*booking.id.as_uuid())
            .bind(to_db_index(position)?)
            .bind(vehicle.details.vehicle_type.as_str())
            .bind(&vehicle.details.license_plate)
            .bind(vehicle.details.owner_name.as_deref())
            .execute(&mut *tx)
            .await
            .map_err(|e| db_error("booking vehicle", &e))?;
        }

        insert_log(&mut tx, log).await?;
        Self::commit(tx).await
    }

    async fn load_booking(&self, booking_id: BookingId) -> Result<Booking> {
        let row = sqlx::query(&format!("SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"))
            .bind(*booking_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&format!("booking {booking_id}"), &e))?;
        self.fetch_booking(row, ReservationError::BookingNotFound(booking_id.to_string()))
            .await
    }

    async fn find_booking_by_code(&self, booking_code: &str) -> Result<Booking> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE booking_code = $1"
        ))
        .bind(booking_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&format!("booking {booking_code}"), &e))?;
        self.fetch_booking(row, ReservationError::BookingNotFound(booking_code.to_string()))
            .await
    }

    async fn find_booking_by_ticket(&self, ticket_code: &str) -> Result<Booking> {
        let row = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE id = (SELECT booking_id FROM tickets WHERE ticket_code = $1)"
        ))
        .bind(ticket_code)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&format!("ticket {ticket_code}"), &e))?;
        self.fetch_booking(row, ReservationError::TicketNotFound(ticket_code.to_string()))
            .await
    }

    async fn commit_transition(&self, transition: &BookingTransition) -> Result<Booking> {
        let mut tx = self.begin().await?;
        apply_transition(&mut tx, transition).await?;
        Self::commit(tx).await?;
        self.load_booking(transition.booking_id).await
    }

    async fn mark_ticket_boarded(&self, ticket_code: &str, boarding_time: DateTime<Utc>) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE tickets SET status = $3, boarding_status = $4, checked_in = TRUE, boarding_time = $5 \
             WHERE ticket_code = $1 AND status = $2",
        )
        .bind(ticket_code)
        .bind(TicketStatus::Active.as_str())
        .bind(TicketStatus::Used.as_str())
        .bind(BoardingStatus::Boarded.as_str())
        .bind(boarding_time)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&format!("ticket {ticket_code}"), &e))?;
        if updated.rows_affected() == 1 {
            return Ok(());
        }

        let exists = sqlx::query("SELECT 1 FROM tickets WHERE ticket_code = $1")
            .bind(ticket_code)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&format!("ticket {ticket_code}"), &e))?;
        Err(match exists {
            Some(_) => ReservationError::ConcurrencyConflict {
                resource: format!("ticket {ticket_code}"),
            },
            None => ReservationError::TicketNotFound(ticket_code.to_string()),
        })
    }

    async fn bookings_for_sailing(&self, key: LedgerKey, status: BookingStatus) -> Result<Vec<Booking>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("acquire connection", &e))?;
        let rows = sqlx::query(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings \
             WHERE schedule_id = $1 AND booking_date = $2 AND status = $3 \
             ORDER BY created_at, id"
        ))
        .bind(*key.schedule_id.as_uuid())
        .bind(key.date)
        .bind(status.as_str())
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| db_error(&format!("bookings on {key}"), &e))?;

        let mut bookings = Vec::with_capacity(rows.len());
        for row in &rows {
            bookings.push(hydrate_booking(&mut conn, row).await?);
        }
        Ok(bookings)
    }

    async fn record_payment(&self, payment: &Payment) -> Result<()> {
        sqlx::query(&format!(
            "INSERT INTO payments ({PAYMENT_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7)"
        ))
        .bind(*payment.id.as_uuid())
        .bind(*payment.booking_id.as_uuid())
        .bind(&payment.reference.0)
        .bind(to_db_cents(payment.amount)?)
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .bind(payment.settled_at)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error(&format!("payment {}", payment.reference), &e))?;
        Ok(())
    }

    async fn update_payment_status(
        &self,
        reference: &PaymentReference,
        expected: PaymentStatus,
        status: PaymentStatus,
        at: DateTime<Utc>,
    ) -> Result<Payment> {
        let row = sqlx::query(&format!(
            "UPDATE payments SET status = $3, settled_at = $4 \
             WHERE reference = $1 AND status = $2 RETURNING {PAYMENT_COLUMNS}"
        ))
        .bind(&reference.0)
        .bind(expected.as_str())
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&format!("payment {reference}"), &e))?;

        match row {
            Some(row) => decode_payment(&row),
            None => {
                // Distinguish a missing reference from a status that moved on.
                self.find_payment(reference).await?;
                Err(ReservationError::ConcurrencyConflict {
                    resource: format!("payment {reference}"),
                })
            }
        }
    }

    async fn find_payment(&self, reference: &PaymentReference) -> Result<Payment> {
        sqlx::query(&format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE reference = $1"))
            .bind(&reference.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&format!("payment {reference}"), &e))?
            .ok_or_else(|| ReservationError::PaymentNotFound(reference.to_string()))
            .and_then(|row| decode_payment(&row))
    }

    async fn payments_for(&self, booking_id: BookingId) -> Result<Vec<Payment>> {
        sqlx::query(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE booking_id = $1 ORDER BY seq"
        ))
        .bind(*booking_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(&format!("payments of {booking_id}"), &e))?
        .iter()
        .map(decode_payment)
        .collect()
    }

    async fn booking_logs(&self, booking_id: BookingId) -> Result<Vec<BookingLogEntry>> {
        sqlx::query(&format!(
            "SELECT {LOG_COLUMNS} FROM booking_logs WHERE booking_id = $1 ORDER BY seq"
        ))
        .bind(*booking_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| db_error(&format!("logs of {booking_id}"), &e))?
        .iter()
        .map(decode_log)
        .collect()
    }
}

// ============================================================================
// Refunds
// ============================================================================

impl RefundRepository for PostgresReservationStore {
    async fn active_refund(&self, booking_id: BookingId) -> Result<Option<Refund>> {
        sqlx::query(&format!(
            "SELECT {REFUND_COLUMNS} FROM refunds \
             WHERE booking_id = $1 AND status NOT IN ($2, $3)"
        ))
        .bind(*booking_id.as_uuid())
        .bind(RefundStatus::Rejected.as_str())
        .bind(RefundStatus::Cancelled.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| db_error(&format!("refunds of {booking_id}"), &e))?
        .as_ref()
        .map(decode_refund)
        .transpose()
    }

    async fn find_refund(&self, refund_id: RefundId) -> Result<Refund> {
        sqlx::query(&format!("SELECT {REFUND_COLUMNS} FROM refunds WHERE id = $1"))
            .bind(*refund_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| db_error(&format!("refund {refund_id}"), &e))?
            .ok_or(ReservationError::RefundNotFound(refund_id))
            .and_then(|row| decode_refund(&row))
    }

    async fn create_refund(&self, refund: &Refund, transition: &BookingTransition) -> Result<()> {
        let mut tx = self.begin().await?;

        let inserted = sqlx::query(&format!(
            "INSERT INTO refunds ({REFUND_COLUMNS}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)"
        ))
        .bind(*refund.id.as_uuid())
        .bind(*refund.booking_id.as_uuid())
        .bind(*refund.payment_id.as_uuid())
        .bind(to_db_cents(refund.amount)?)
        .bind(&refund.reason)
        .bind(refund.status.as_str())
        .bind(&refund.refund_method)
        .bind(refund.transaction_id.as_deref())
        .bind(refund.created_at)
        .bind(refund.updated_at)
        .execute(&mut *tx)
        .await;

        if let Err(error) = inserted {
            let _ = tx.rollback().await; // Ignore rollback errors
            if !is_unique_violation(&error) {
                return Err(db_error(&format!("refund {}", refund.id), &error));
            }
            return Err(match self.active_refund(refund.booking_id).await? {
                Some(active) => ReservationError::RefundAlreadyActive {
                    booking_id: refund.booking_id,
                    refund_id: active.id,
                },
                // The blocking refund closed in the meantime.
                None => ReservationError::ConcurrencyConflict {
                    resource: format!("refunds of {}", refund.booking_id),
                },
            });
        }

        apply_transition(&mut tx, transition).await?;
        Self::commit(tx).await
    }

    async fn update_refund(
        &self,
        refund: &Refund,
        expected: RefundStatus,
        transition: Option<&BookingTransition>,
    ) -> Result<()> {
        let mut tx = self.begin().await?;

        let updated = sqlx::query(
            "UPDATE refunds SET status = $3, transaction_id = $4, updated_at = $5 \
             WHERE id = $1 AND status = $2",
        )
        .bind(*refund.id.as_uuid())
        .bind(expected.as_str())
        .bind(refund.status.as_str())
        .bind(refund.transaction_id.as_deref())
        .bind(refund.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| db_error(&format!("refund {}", refund.id), &e))?;

        if updated.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM refunds WHERE id = $1")
                .bind(*refund.id.as_uuid())
                .fetch_optional(&mut *tx)
                .await
                .map_err(|e| db_error(&format!("refund {}", refund.id), &e))?;
            return Err(match exists {
                Some(_) => ReservationError::ConcurrencyConflict {
                    resource: format!("refund {}", refund.id),
                },
                None => ReservationError::RefundNotFound(refund.id),
            });
        }

        if let Some(transition) = transition {
            apply_transition(&mut tx, transition).await?;
        }
        Self::commit(tx).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use ferry_testing::fixtures::ScheduleBuilder;

    fn noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 8, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_fresh_ledger_is_open_for_active_schedule() {
        let snapshot = ScheduleBuilder::new().build();
        let key = LedgerKey::new(snapshot.schedule.id, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());

        let ledger = fresh_ledger(&snapshot.schedule, key, noon());

        assert_eq!(ledger, CapacityLedger::open(key, noon()));
    }

    #[test]
    fn test_fresh_ledger_follows_suspended_schedule() {
        let snapshot = ScheduleBuilder::new().inactive("dry dock", None).build();
        let key = LedgerKey::new(snapshot.schedule.id, NaiveDate::from_ymd_opt(2025, 1, 10).unwrap());

        let ledger = fresh_ledger(&snapshot.schedule, key, noon());

        assert_eq!(ledger.status, LedgerStatus::Inactive);
        assert_eq!(ledger.status_reason.as_deref(), Some("dry dock"));
        assert!(ledger.modified_by_schedule);
        assert!(ledger.counts.is_zero());
    }
}
