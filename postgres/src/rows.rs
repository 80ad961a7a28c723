//! Row decoding and database error mapping.

use ferry_core::{
    ActorType, BoardingStatus, BookingChannel, BookingId, BookingLogEntry, BookingStatus,
    CapacityLedger, CategoryCounts, FerryId, LedgerKey, LedgerStatus, Money, OperatingDays,
    PassengerDetails, Payment, PaymentId, PaymentReference, PaymentStatus, Refund, RefundId,
    RefundStatus, ReservationError, Result, RouteId, RoutePricing, Schedule, ScheduleId,
    ScheduleSnapshot, ScheduleStatus, Ticket, TicketStatus, UserId, Vehicle, VehicleDetails,
    VehicleType,
};
use sqlx::Postgres;
use sqlx::Row;
use sqlx::postgres::PgRow;
use uuid::Uuid;

/// `lock_not_available`: `lock_timeout` expired.
const LOCK_NOT_AVAILABLE: &str = "55P03";
/// `serialization_failure`
const SERIALIZATION_FAILURE: &str = "40001";
/// `deadlock_detected`
const DEADLOCK_DETECTED: &str = "40P01";

/// Maps a sqlx error: lock timeouts, serialization failures and deadlocks
/// become `ConcurrencyConflict` on `resource`, everything else `Persistence`.
pub(crate) fn db_error(resource: &str, error: &sqlx::Error) -> ReservationError {
    if let sqlx::Error::Database(db) = error {
        if let Some(code) = db.code() {
            if matches!(
                code.as_ref(),
                LOCK_NOT_AVAILABLE | SERIALIZATION_FAILURE | DEADLOCK_DETECTED
            ) {
                return ReservationError::ConcurrencyConflict {
                    resource: resource.to_string(),
                };
            }
        }
    }
    ReservationError::Persistence(format!("{resource}: {error}"))
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

// ============================================================================
// Scalars
// ============================================================================

pub(crate) fn to_db_count(value: u32) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ReservationError::Persistence(format!("count {value} does not fit the schema")))
}

pub(crate) fn to_db_index(value: usize) -> Result<i32> {
    i32::try_from(value)
        .map_err(|_| ReservationError::Persistence(format!("index {value} does not fit the schema")))
}

pub(crate) fn to_db_cents(value: Money) -> Result<i64> {
    i64::try_from(value.cents())
        .map_err(|_| ReservationError::Persistence(format!("amount {value} does not fit the schema")))
}

fn col<'r, T>(row: &'r PgRow, column: &str) -> Result<T>
where
    T: sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    row.try_get(column).map_err(|e| db_error(column, &e))
}

fn count(row: &PgRow, column: &str) -> Result<u32> {
    let raw: i32 = col(row, column)?;
    u32::try_from(raw)
        .map_err(|_| ReservationError::Persistence(format!("negative {column}: {raw}")))
}

fn money(row: &PgRow, column: &str) -> Result<Money> {
    let raw: i64 = col(row, column)?;
    u64::try_from(raw)
        .map(Money::from_cents)
        .map_err(|_| ReservationError::Persistence(format!("negative {column}: {raw}")))
}

fn parsed<T>(row: &PgRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<T> {
    let raw: String = col(row, column)?;
    parse(&raw).ok_or_else(|| {
        ReservationError::Persistence(format!("unknown {column} value {raw:?}"))
    })
}

fn parsed_opt<T>(row: &PgRow, column: &str, parse: fn(&str) -> Option<T>) -> Result<Option<T>> {
    let raw: Option<String> = col(row, column)?;
    raw.map(|raw| {
        parse(&raw).ok_or_else(|| {
            ReservationError::Persistence(format!("unknown {column} value {raw:?}"))
        })
    })
    .transpose()
}

// ============================================================================
// Schedules and ledgers
// ============================================================================

pub(crate) const SCHEDULE_COLUMNS: &str = "id, route_id, ferry_id, departure_time, arrival_time, \
     operating_days, status, status_reason, status_expires_at, \
     capacity_passengers, capacity_motorcycles, capacity_cars, capacity_buses, capacity_trucks, \
     base_price, motorcycle_price, car_price, bus_price, truck_price";

pub(crate) fn operating_days_to_db(days: OperatingDays) -> Vec<i16> {
    days.numbers().into_iter().map(i16::from).collect()
}

pub(crate) fn decode_snapshot(row: &PgRow) -> Result<ScheduleSnapshot> {
    let days: Vec<i16> = col(row, "operating_days")?;
    let mut numbers = Vec::with_capacity(days.len());
    for day in days {
        numbers.push(u8::try_from(day).map_err(|_| {
            ReservationError::Persistence(format!("operating day {day} out of range"))
        })?);
    }

    Ok(ScheduleSnapshot {
        schedule: Schedule {
            id: ScheduleId::from_uuid(col(row, "id")?),
            route_id: RouteId::from_uuid(col(row, "route_id")?),
            ferry_id: FerryId::from_uuid(col(row, "ferry_id")?),
            departure_time: col(row, "departure_time")?,
            arrival_time: col(row, "arrival_time")?,
            operating_days: OperatingDays::from_numbers(numbers)?,
            status: parsed(row, "status", ScheduleStatus::parse)?,
            status_reason: col(row, "status_reason")?,
            status_expires_at: col(row, "status_expires_at")?,
        },
        capacity: CategoryCounts {
            passengers: count(row, "capacity_passengers")?,
            motorcycles: count(row, "capacity_motorcycles")?,
            cars: count(row, "capacity_cars")?,
            buses: count(row, "capacity_buses")?,
            trucks: count(row, "capacity_trucks")?,
        },
        pricing: RoutePricing {
            base_price: money(row, "base_price")?,
            motorcycle_price: money(row, "motorcycle_price")?,
            car_price: money(row, "car_price")?,
            bus_price: money(row, "bus_price")?,
            truck_price: money(row, "truck_price")?,
        },
    })
}

pub(crate) const LEDGER_COLUMNS: &str = "schedule_id, sailing_date, status, status_reason, \
     status_expires_at, passengers, motorcycles, cars, buses, trucks, modified_by_schedule, updated_at";

pub(crate) fn decode_ledger(row: &PgRow) -> Result<CapacityLedger> {
    Ok(CapacityLedger {
        key: LedgerKey::new(
            ScheduleId::from_uuid(col(row, "schedule_id")?),
            col(row, "sailing_date")?,
        ),
        status: parsed(row, "status", LedgerStatus::parse)?,
        status_reason: col(row, "status_reason")?,
        status_expires_at: col(row, "status_expires_at")?,
        counts: CategoryCounts {
            passengers: count(row, "passengers")?,
            motorcycles: count(row, "motorcycles")?,
            cars: count(row, "cars")?,
            buses: count(row, "buses")?,
            trucks: count(row, "trucks")?,
        },
        modified_by_schedule: col(row, "modified_by_schedule")?,
        updated_at: col(row, "updated_at")?,
    })
}

// ============================================================================
// Bookings
// ============================================================================

pub(crate) const BOOKING_COLUMNS: &str = "id, booking_code, user_id, schedule_id, booking_date, \
     passenger_count, vehicle_count, total_amount, status, cancellation_reason, channel, \
     created_at, updated_at";

/// A booking row without its tickets and vehicles.
pub(crate) fn decode_booking(row: &PgRow) -> Result<ferry_core::Booking> {
    Ok(ferry_core::Booking {
        id: BookingId::from_uuid(col(row, "id")?),
        booking_code: col(row, "booking_code")?,
        user_id: UserId::from_uuid(col(row, "user_id")?),
        schedule_id: ScheduleId::from_uuid(col(row, "schedule_id")?),
        booking_date: col(row, "booking_date")?,
        passenger_count: count(row, "passenger_count")?,
        vehicle_count: count(row, "vehicle_count")?,
        total_amount: money(row, "total_amount")?,
        status: parsed(row, "status", BookingStatus::parse)?,
        cancellation_reason: col(row, "cancellation_reason")?,
        channel: parsed(row, "channel", BookingChannel::parse)?,
        tickets: Vec::new(),
        vehicles: Vec::new(),
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}

pub(crate) const TICKET_COLUMNS: &str = "ticket_code, booking_id, qr_code, passenger_name, id_type, \
     id_number, boarding_status, status, checked_in, boarding_time";

pub(crate) fn decode_ticket(row: &PgRow) -> Result<Ticket> {
    Ok(Ticket {
        ticket_code: col(row, "ticket_code")?,
        booking_id: BookingId::from_uuid(col(row, "booking_id")?),
        qr_code: col(row, "qr_code")?,
        passenger: PassengerDetails {
            name: col(row, "passenger_name")?,
            id_type: col(row, "id_type")?,
            id_number: col(row, "id_number")?,
        },
        boarding_status: parsed(row, "boarding_status", BoardingStatus::parse)?,
        status: parsed(row, "status", TicketStatus::parse)?,
        checked_in: col(row, "checked_in")?,
        boarding_time: col(row, "boarding_time")?,
    })
}

pub(crate) fn decode_vehicle(row: &PgRow) -> Result<Vehicle> {
    Ok(Vehicle {
        booking_id: BookingId::from_uuid(col(row, "booking_id")?),
        details: VehicleDetails {
            vehicle_type: parsed(row, "vehicle_type", VehicleType::parse)?,
            license_plate: col(row, "license_plate")?,
            owner_name: col(row, "owner_name")?,
        },
    })
}

pub(crate) const LOG_COLUMNS: &str =
    "booking_id, previous_status, new_status, changed_by_type, changed_by_id, notes, created_at";

pub(crate) fn decode_log(row: &PgRow) -> Result<BookingLogEntry> {
    let changed_by_id: Option<Uuid> = col(row, "changed_by_id")?;
    Ok(BookingLogEntry {
        booking_id: BookingId::from_uuid(col(row, "booking_id")?),
        previous_status: parsed_opt(row, "previous_status", BookingStatus::parse)?,
        new_status: parsed(row, "new_status", BookingStatus::parse)?,
        changed_by_type: parsed(row, "changed_by_type", ActorType::parse)?,
        changed_by_id,
        notes: col(row, "notes")?,
        created_at: col(row, "created_at")?,
    })
}

// ============================================================================
// Payments and refunds
// ============================================================================

pub(crate) const PAYMENT_COLUMNS: &str =
    "id, booking_id, reference, amount, status, created_at, settled_at";

pub(crate) fn decode_payment(row: &PgRow) -> Result<Payment> {
    Ok(Payment {
        id: PaymentId::from_uuid(col(row, "id")?),
        booking_id: BookingId::from_uuid(col(row, "booking_id")?),
        reference: PaymentReference(col(row, "reference")?),
        amount: money(row, "amount")?,
        status: parsed(row, "status", PaymentStatus::parse)?,
        created_at: col(row, "created_at")?,
        settled_at: col(row, "settled_at")?,
    })
}

pub(crate) const REFUND_COLUMNS: &str = "id, booking_id, payment_id, amount, reason, status, \
     refund_method, transaction_id, created_at, updated_at";

pub(crate) fn decode_refund(row: &PgRow) -> Result<Refund> {
    Ok(Refund {
        id: RefundId::from_uuid(col(row, "id")?),
        booking_id: BookingId::from_uuid(col(row, "booking_id")?),
        payment_id: PaymentId::from_uuid(col(row, "payment_id")?),
        amount: money(row, "amount")?,
        reason: col(row, "reason")?,
        status: parsed(row, "status", RefundStatus::parse)?,
        refund_method: col(row, "refund_method")?,
        transaction_id: col(row, "transaction_id")?,
        created_at: col(row, "created_at")?,
        updated_at: col(row, "updated_at")?,
    })
}
