//! Metrics for reservations, transitions, ledger contention and sweeps.
//!
//! Recording goes through the `metrics` facade and is a no-op until the
//! host process installs a recorder (a Prometheus exporter, for instance).
//! Call [`register_metrics`] once at startup to publish descriptions.

use ferry_core::{BookingStatus, ReservationError};
use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
use std::time::Duration;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Successful reservations.
pub const RESERVATIONS_CREATED: &str = "ferry.reservations.created";
/// Reservations rejected, labelled by error kind and cause.
pub const RESERVATIONS_REJECTED: &str = "ferry.reservations.rejected";
/// Compensating releases after a failed booking write.
pub const RESERVATIONS_COMPENSATED: &str = "ferry.reservations.compensated";
/// End-to-end booking latency.
pub const RESERVATION_DURATION: &str = "ferry.reservations.duration_seconds";
/// Booking state transitions, labelled by action and resulting status.
pub const BOOKING_TRANSITIONS: &str = "ferry.bookings.transitions";
/// Contended ledger row lock attempts.
pub const LEDGER_LOCK_RETRIES: &str = "ferry.ledger.lock_retries";
/// Sweeper runs.
pub const SWEEPER_RUNS: &str = "ferry.sweeper.runs";
/// Schedules reactivated by the sweeper.
pub const SWEEPER_SCHEDULES_REACTIVATED: &str = "ferry.sweeper.schedules_reactivated";
/// Ledger rows reopened by the sweeper.
pub const SWEEPER_LEDGERS_REOPENED: &str = "ferry.sweeper.ledgers_reopened";
/// Rows touched by the most recent sweep.
pub const SWEEPER_LAST_CHANGED: &str = "ferry.sweeper.last_changed";

/// Register all metric descriptions.
pub fn register_metrics() {
    describe_counter!(RESERVATIONS_CREATED, "Bookings created with capacity reserved");
    describe_counter!(
        RESERVATIONS_REJECTED,
        "Booking requests rejected (validation, state, capacity, contention, storage)"
    );
    describe_counter!(
        RESERVATIONS_COMPENSATED,
        "Reserved capacity released again because the booking could not be stored"
    );
    describe_histogram!(
        RESERVATION_DURATION,
        Unit::Seconds,
        "Time taken to validate, reserve and persist a booking"
    );
    describe_counter!(BOOKING_TRANSITIONS, "Committed booking state transitions");
    describe_counter!(
        LEDGER_LOCK_RETRIES,
        "Ledger row operations that hit lock contention"
    );
    describe_counter!(SWEEPER_RUNS, "Status expiry sweeps executed");
    describe_counter!(
        SWEEPER_SCHEDULES_REACTIVATED,
        "Schedules whose temporary INACTIVE status expired"
    );
    describe_counter!(
        SWEEPER_LEDGERS_REOPENED,
        "Ledger rows reopened after a schedule reactivation or lapsed weather hold"
    );
    describe_gauge!(SWEEPER_LAST_CHANGED, "Rows changed by the most recent sweep");
}

pub(crate) fn reservation_created(elapsed: Duration) {
    counter!(RESERVATIONS_CREATED).increment(1);
    histogram!(RESERVATION_DURATION).record(elapsed.as_secs_f64());
}

pub(crate) fn reservation_rejected(error: &ReservationError) {
    let cause = match error {
        ReservationError::CapacityExceeded { category, .. } => category.as_str(),
        ReservationError::DateUnavailable { status, .. } => status.as_str(),
        ReservationError::DayNotOperating { .. } => "day_not_operating",
        _ => "other",
    };
    counter!(
        RESERVATIONS_REJECTED,
        "kind" => format!("{:?}", error.kind()),
        "cause" => cause
    )
    .increment(1);
}

pub(crate) fn reservation_compensated() {
    counter!(RESERVATIONS_COMPENSATED).increment(1);
}

pub(crate) fn transition(action: &'static str, status: BookingStatus) {
    counter!(BOOKING_TRANSITIONS, "action" => action, "status" => status.as_str()).increment(1);
}

pub(crate) fn lock_retry() {
    counter!(LEDGER_LOCK_RETRIES).increment(1);
}

pub(crate) fn sweep(schedules: usize, ledgers: usize) {
    counter!(SWEEPER_RUNS).increment(1);
    counter!(SWEEPER_SCHEDULES_REACTIVATED).increment(u64::try_from(schedules).unwrap_or(u64::MAX));
    counter!(SWEEPER_LEDGERS_REOPENED).increment(u64::try_from(ledgers).unwrap_or(u64::MAX));
    #[allow(clippy::cast_precision_loss)]
    let changed = (schedules + ledgers) as f64;
    gauge!(SWEEPER_LAST_CHANGED).set(changed);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        register_metrics();
        reservation_created(Duration::from_millis(5));
        reservation_rejected(&ReservationError::Validation("empty".to_string()));
        transition("cancel", BookingStatus::Cancelled);
        sweep(1, 2);
    }
}
