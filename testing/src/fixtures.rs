//! Schedules and booking requests for tests.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use ferry_core::{
    BookingChannel, BookingRequest, CategoryCounts, FerryId, Money, OperatingDays,
    PassengerDetails, RouteId, RoutePricing, Schedule, ScheduleId, ScheduleSnapshot,
    ScheduleStatus, UserId, VehicleDetails, VehicleType,
};

/// A calendar date.
///
/// # Panics
///
/// Panics on an impossible date.
#[must_use]
#[allow(clippy::expect_used)]
pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid fixture date")
}

/// Default ferry: 100 passengers, 20 motorcycles, 10 cars, 2 buses, 2 trucks.
#[must_use]
pub const fn default_capacity() -> CategoryCounts {
    CategoryCounts {
        passengers: 100,
        motorcycles: 20,
        cars: 10,
        buses: 2,
        trucks: 2,
    }
}

/// Default route prices, in cents.
#[must_use]
pub const fn default_pricing() -> RoutePricing {
    RoutePricing {
        base_price: Money::from_cents(5_000),
        motorcycle_price: Money::from_cents(2_500),
        car_price: Money::from_cents(15_000),
        bus_price: Money::from_cents(40_000),
        truck_price: Money::from_cents(55_000),
    }
}

/// Builds a [`ScheduleSnapshot`]. Defaults to a daily 08:00-10:00 sailing.
#[derive(Clone, Debug)]
pub struct ScheduleBuilder {
    snapshot: ScheduleSnapshot,
}

impl ScheduleBuilder {
    /// Daily ACTIVE schedule with the default ferry and prices
    #[must_use]
    pub fn new() -> Self {
        Self {
            snapshot: ScheduleSnapshot {
                schedule: Schedule {
                    id: ScheduleId::new(),
                    route_id: RouteId::new(),
                    ferry_id: FerryId::new(),
                    departure_time: NaiveTime::MIN + chrono::Duration::hours(8),
                    arrival_time: NaiveTime::MIN + chrono::Duration::hours(10),
                    operating_days: OperatingDays::DAILY,
                    status: ScheduleStatus::Active,
                    status_reason: None,
                    status_expires_at: None,
                },
                capacity: default_capacity(),
                pricing: default_pricing(),
            },
        }
    }

    /// Sail only on these weekday numbers (Monday = 1).
    ///
    /// # Panics
    ///
    /// Panics if a number is outside `1..=7`.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn operating_on(mut self, weekdays: &[u8]) -> Self {
        self.snapshot.schedule.operating_days =
            OperatingDays::from_numbers(weekdays.iter().copied()).expect("valid weekdays");
        self
    }

    /// Ferry capacity
    #[must_use]
    pub const fn capacity(mut self, capacity: CategoryCounts) -> Self {
        self.snapshot.capacity = capacity;
        self
    }

    /// Route prices
    #[must_use]
    pub const fn pricing(mut self, pricing: RoutePricing) -> Self {
        self.snapshot.pricing = pricing;
        self
    }

    /// Start INACTIVE
    #[must_use]
    pub fn inactive(mut self, reason: &str, expires_at: Option<DateTime<Utc>>) -> Self {
        self.snapshot.schedule.status = ScheduleStatus::Inactive;
        self.snapshot.schedule.status_reason = Some(reason.to_string());
        self.snapshot.schedule.status_expires_at = expires_at;
        self
    }

    /// Finish
    #[must_use]
    pub fn build(self) -> ScheduleSnapshot {
        self.snapshot
    }
}

impl Default for ScheduleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` passengers named "Passenger 1", "Passenger 2", ...
#[must_use]
pub fn passengers(count: usize) -> Vec<PassengerDetails> {
    (1..=count)
        .map(|n| PassengerDetails::named(format!("Passenger {n}")))
        .collect()
}

/// One vehicle per entry, with generated plates.
#[must_use]
pub fn vehicles(types: &[VehicleType]) -> Vec<VehicleDetails> {
    types
        .iter()
        .enumerate()
        .map(|(n, vehicle_type)| VehicleDetails::new(*vehicle_type, format!("TEST {}", n + 1)))
        .collect()
}

/// An online booking request.
#[must_use]
pub fn booking_request(
    schedule_id: ScheduleId,
    date: NaiveDate,
    passenger_count: usize,
    vehicle_types: &[VehicleType],
) -> BookingRequest {
    BookingRequest {
        user_id: UserId::new(),
        schedule_id,
        date,
        passengers: passengers(passenger_count),
        vehicles: vehicles(vehicle_types),
        channel: BookingChannel::Online,
    }
}
