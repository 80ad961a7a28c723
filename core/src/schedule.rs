//! Schedules and the read-only inputs captured with them at booking time.

use crate::calendar::{OperatingDays, Weekday};
use crate::error::{ReservationError, Result};
use crate::types::{CategoryCounts, FerryId, Money, RouteId, ScheduleId, VehicleType};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Schedule-level availability.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduleStatus {
    /// Sailing normally
    Active,
    /// Suspended, possibly until `status_expires_at`
    Inactive,
}

impl ScheduleStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Inactive => "INACTIVE",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(Self::Active),
            "INACTIVE" => Some(Self::Inactive),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recurring sailing of one ferry on one route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Identifier
    pub id: ScheduleId,
    /// Route sailed
    pub route_id: RouteId,
    /// Ferry used
    pub ferry_id: FerryId,
    /// Local departure time
    pub departure_time: NaiveTime,
    /// Local arrival time, after departure
    pub arrival_time: NaiveTime,
    /// Weekdays the schedule sails on
    pub operating_days: OperatingDays,
    /// Current status
    pub status: ScheduleStatus,
    /// Why the status was set
    pub status_reason: Option<String>,
    /// When a temporary INACTIVE status lapses
    pub status_expires_at: Option<DateTime<Utc>>,
}

impl Schedule {
    /// Checks the schedule's own invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Validation`] if departure is not before
    /// arrival or the schedule never sails.
    pub fn validate(&self) -> Result<()> {
        if self.departure_time >= self.arrival_time {
            return Err(ReservationError::Validation(format!(
                "departure {} must be before arrival {}",
                self.departure_time, self.arrival_time
            )));
        }
        if self.operating_days.is_empty() {
            return Err(ReservationError::Validation(
                "schedule must operate on at least one weekday".to_string(),
            ));
        }
        Ok(())
    }

    /// True iff the schedule sails on `date`'s weekday.
    #[must_use]
    pub fn is_operating_on(&self, date: NaiveDate) -> bool {
        self.operating_days.is_operating_on(date)
    }

    /// Operating dates within `[start, end]`.
    #[must_use]
    pub fn expand_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        self.operating_days.expand_date_range(start, end)
    }

    /// Fails with `DayNotOperating` when `date` is not a sailing day.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::DayNotOperating`].
    pub fn ensure_operating_on(&self, date: NaiveDate) -> Result<()> {
        if self.is_operating_on(date) {
            Ok(())
        } else {
            Err(ReservationError::DayNotOperating {
                schedule_id: self.id,
                date,
                weekday: Weekday::of(date).to_string(),
            })
        }
    }

    /// True when an INACTIVE status has lapsed at `now`.
    #[must_use]
    pub fn inactive_status_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == ScheduleStatus::Inactive
            && self.status_expires_at.is_some_and(|expiry| expiry < now)
    }
}

/// Route prices in effect when a booking is priced.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutePricing {
    /// Price per passenger
    pub base_price: Money,
    /// Price per motorcycle
    pub motorcycle_price: Money,
    /// Price per car
    pub car_price: Money,
    /// Price per bus
    pub bus_price: Money,
    /// Price per truck
    pub truck_price: Money,
}

impl RoutePricing {
    /// Price of one vehicle of `vehicle_type`
    #[must_use]
    pub const fn vehicle_price(&self, vehicle_type: VehicleType) -> Money {
        match vehicle_type {
            VehicleType::Motorcycle => self.motorcycle_price,
            VehicleType::Car => self.car_price,
            VehicleType::Bus => self.bus_price,
            VehicleType::Truck => self.truck_price,
        }
    }

    /// `passengers × base_price + Σ vehicle prices`.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Validation`] on arithmetic overflow.
    pub fn quote(&self, passengers: u32, vehicles: &[VehicleType]) -> Result<Money> {
        let overflow = || ReservationError::Validation("booking total overflows".to_string());
        let mut total = self.base_price.checked_mul(passengers).ok_or_else(overflow)?;
        for vehicle in vehicles {
            total = total
                .checked_add(self.vehicle_price(*vehicle))
                .ok_or_else(overflow)?;
        }
        Ok(total)
    }
}

/// A schedule together with its ferry capacity and route prices, read once
/// per request so the capacity check and the price use the same inputs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleSnapshot {
    /// The schedule
    pub schedule: Schedule,
    /// Ferry capacity per category
    pub capacity: CategoryCounts,
    /// Route prices
    pub pricing: RoutePricing,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    fn schedule() -> Schedule {
        Schedule {
            id: ScheduleId::new(),
            route_id: RouteId::new(),
            ferry_id: FerryId::new(),
            departure_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            arrival_time: NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
            operating_days: OperatingDays::from_numbers([1, 3, 5]).unwrap(),
            status: ScheduleStatus::Active,
            status_reason: None,
            status_expires_at: None,
        }
    }

    #[test]
    fn test_departure_must_precede_arrival() {
        let mut s = schedule();
        assert!(s.validate().is_ok());

        s.arrival_time = s.departure_time;
        assert!(matches!(s.validate(), Err(ReservationError::Validation(_))));
    }

    #[test]
    fn test_day_not_operating_names_weekday() {
        let s = schedule();
        let tuesday = NaiveDate::from_ymd_opt(2025, 1, 7).unwrap();

        let err = s.ensure_operating_on(tuesday).unwrap_err();
        match err {
            ReservationError::DayNotOperating { weekday, date, .. } => {
                assert_eq!(weekday, "Tuesday");
                assert_eq!(date, tuesday);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_quote_sums_passengers_and_vehicles() {
        let pricing = RoutePricing {
            base_price: Money::from_cents(5_000),
            motorcycle_price: Money::from_cents(2_000),
            car_price: Money::from_cents(15_000),
            bus_price: Money::from_cents(40_000),
            truck_price: Money::from_cents(60_000),
        };

        let total = pricing
            .quote(3, &[VehicleType::Car, VehicleType::Motorcycle])
            .unwrap();
        assert_eq!(total, Money::from_cents(3 * 5_000 + 15_000 + 2_000));
    }

    #[test]
    fn test_inactive_expiry() {
        let now = Utc::now();
        let mut s = schedule();
        s.status = ScheduleStatus::Inactive;
        s.status_expires_at = Some(now - chrono::Duration::hours(1));
        assert!(s.inactive_status_expired(now));

        s.status_expires_at = None;
        assert!(!s.inactive_status_expired(now));
    }
}
