//! Operating calendar for recurring schedules.
//!
//! This is the only place in the crate that converts between calendar dates
//! and weekday numbers. The numbering is ISO 8601: Monday is 1 and Sunday
//! is 7. Nothing else in the workspace does weekday arithmetic.

use crate::error::ReservationError;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A weekday number in `1..=7`, Monday first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Weekday(u8);

impl Weekday {
    /// Monday
    pub const MONDAY: Self = Self(1);
    /// Tuesday
    pub const TUESDAY: Self = Self(2);
    /// Wednesday
    pub const WEDNESDAY: Self = Self(3);
    /// Thursday
    pub const THURSDAY: Self = Self(4);
    /// Friday
    pub const FRIDAY: Self = Self(5);
    /// Saturday
    pub const SATURDAY: Self = Self(6);
    /// Sunday
    pub const SUNDAY: Self = Self(7);

    /// Creates a weekday from its number.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Validation`] unless `number` is in `1..=7`.
    pub fn new(number: u8) -> Result<Self, ReservationError> {
        if (1..=7).contains(&number) {
            Ok(Self(number))
        } else {
            Err(ReservationError::Validation(format!(
                "weekday must be between 1 (Monday) and 7 (Sunday), got {number}"
            )))
        }
    }

    /// The weekday a date falls on.
    #[must_use]
    pub fn of(date: NaiveDate) -> Self {
        #[allow(clippy::cast_possible_truncation)] // number_from_monday is 1..=7
        let number = date.weekday().number_from_monday() as u8;
        Self(number)
    }

    /// The weekday number
    #[must_use]
    pub const fn number(&self) -> u8 {
        self.0
    }

    const fn bit(self) -> u8 {
        1 << (self.0 - 1)
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.0 {
            1 => "Monday",
            2 => "Tuesday",
            3 => "Wednesday",
            4 => "Thursday",
            5 => "Friday",
            6 => "Saturday",
            _ => "Sunday",
        };
        f.write_str(name)
    }
}

/// The set of weekdays a schedule sails on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperatingDays(u8);

impl OperatingDays {
    /// Every day of the week
    pub const DAILY: Self = Self(0b111_1111);

    /// Builds the set from weekday numbers (Monday = 1).
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::Validation`] if any number is outside
    /// `1..=7`.
    pub fn from_numbers(numbers: impl IntoIterator<Item = u8>) -> Result<Self, ReservationError> {
        let mut days = Self(0);
        for number in numbers {
            days = days.with(Weekday::new(number)?);
        }
        Ok(days)
    }

    /// Returns the set with `day` added
    #[must_use]
    pub const fn with(self, day: Weekday) -> Self {
        Self(self.0 | day.bit())
    }

    /// Whether `day` is in the set
    #[must_use]
    pub const fn contains(&self, day: Weekday) -> bool {
        self.0 & day.bit() != 0
    }

    /// True when the schedule never sails
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Weekday numbers in ascending order (for persistence)
    #[must_use]
    pub fn numbers(&self) -> Vec<u8> {
        (1..=7u8).filter(|n| self.0 & (1 << (n - 1)) != 0).collect()
    }

    /// True iff `date` falls on one of the operating weekdays
    #[must_use]
    pub fn is_operating_on(&self, date: NaiveDate) -> bool {
        self.contains(Weekday::of(date))
    }

    /// Every operating date in `[start, end]`, inclusive, in ascending order.
    ///
    /// An inverted range yields nothing.
    #[must_use]
    pub fn expand_date_range(&self, start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
        start
            .iter_days()
            .take_while(|date| *date <= end)
            .filter(|date| self.is_operating_on(*date))
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_weekday_numbering_is_monday_first() {
        // 2025-01-06 is a Monday, 2025-01-12 a Sunday
        assert_eq!(Weekday::of(date(2025, 1, 6)), Weekday::MONDAY);
        assert_eq!(Weekday::of(date(2025, 1, 7)), Weekday::TUESDAY);
        assert_eq!(Weekday::of(date(2025, 1, 11)), Weekday::SATURDAY);
        assert_eq!(Weekday::of(date(2025, 1, 12)), Weekday::SUNDAY);
        assert_eq!(Weekday::SUNDAY.number(), 7);
    }

    #[test]
    fn test_weekday_rejects_zero_and_eight() {
        assert!(Weekday::new(0).is_err());
        assert!(Weekday::new(8).is_err());
        assert!(Weekday::new(7).is_ok());
    }

    #[test]
    fn test_mon_wed_fri_excludes_tuesday() {
        let days = OperatingDays::from_numbers([1, 3, 5]).unwrap();

        assert!(days.is_operating_on(date(2025, 1, 6)));
        assert!(!days.is_operating_on(date(2025, 1, 7)));
        assert!(days.is_operating_on(date(2025, 1, 8)));
        assert!(days.is_operating_on(date(2025, 1, 10)));
        assert!(!days.is_operating_on(date(2025, 1, 12)));
    }

    #[test]
    fn test_sunday_only_schedule() {
        let days = OperatingDays::from_numbers([7]).unwrap();
        assert!(days.is_operating_on(date(2025, 1, 12)));
        assert!(!days.is_operating_on(date(2025, 1, 6)));
    }

    #[test]
    fn test_expand_date_range_is_inclusive() {
        let days = OperatingDays::from_numbers([1, 3, 5]).unwrap();
        let dates = days.expand_date_range(date(2025, 1, 6), date(2025, 1, 13));

        assert_eq!(
            dates,
            vec![
                date(2025, 1, 6),
                date(2025, 1, 8),
                date(2025, 1, 10),
                date(2025, 1, 13)
            ]
        );
    }

    #[test]
    fn test_expand_inverted_range_is_empty() {
        let dates = OperatingDays::DAILY.expand_date_range(date(2025, 2, 1), date(2025, 1, 1));
        assert!(dates.is_empty());
    }

    #[test]
    fn test_numbers_round_trip() {
        let days = OperatingDays::from_numbers([5, 1, 3, 1]).unwrap();
        assert_eq!(days.numbers(), vec![1, 3, 5]);
    }

    proptest! {
        #[test]
        fn prop_expanded_dates_all_operate(
            mask in 1u8..128,
            offset in 0i64..3650,
            span in 0i64..120,
        ) {
            let days = OperatingDays(mask);
            let start = date(2020, 1, 1) + chrono::Duration::days(offset);
            let end = start + chrono::Duration::days(span);
            let dates = days.expand_date_range(start, end);

            prop_assert!(dates.iter().all(|d| days.is_operating_on(*d)));
            prop_assert!(dates.iter().all(|d| *d >= start && *d <= end));
            prop_assert!(dates.windows(2).all(|w| w[0] < w[1]));
        }

        #[test]
        fn prop_daily_expands_to_every_date(offset in 0i64..3650, span in 0i64..60) {
            let start = date(2020, 1, 1) + chrono::Duration::days(offset);
            let end = start + chrono::Duration::days(span);
            let dates = OperatingDays::DAILY.expand_date_range(start, end);
            prop_assert_eq!(dates.len() as i64, span + 1);
        }
    }
}
