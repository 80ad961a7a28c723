//! # Ferry Reservation Core
//!
//! Domain model and pure business rules for capacity-safe ferry
//! reservations.
//!
//! ## Core Concepts
//!
//! - **Ledger row**: per (schedule, sailing date) running totals for
//!   passengers, motorcycles, cars, buses and trucks. No category may ever
//!   exceed the ferry's capacity.
//! - **Operating calendar**: the weekdays a schedule sails on, numbered
//!   Monday = 1 through Sunday = 7.
//! - **Booking**: a PENDING/CONFIRMED/... aggregate owning tickets, vehicles,
//!   payment attempts and an append-only audit trail.
//! - **Reducer**: the booking lifecycle is a pure function
//!   `(Booking, BookingAction, Environment) → (Booking, Effects)`.
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell: this crate does no I/O. The
//!   `ferry-runtime` crate drives it against a [`store::ReservationStore`].
//! - Dependencies (clock, payment collaborator) are injected via traits.
//! - Every rejection names its specific cause ([`ReservationError`]).

pub mod booking;
pub mod calendar;
pub mod environment;
pub mod error;
pub mod ledger;
pub mod reducer;
pub mod refund;
pub mod schedule;
pub mod state_machine;
pub mod store;
pub mod types;

pub use booking::{
    Booking, BookingChannel, BookingLogEntry, BookingRequest, BookingStatus, BoardingStatus,
    PassengerDetails, Payment, PaymentOutcome, PaymentReference, PaymentStatus, Ticket,
    TicketStatus, Vehicle, VehicleDetails,
};
pub use calendar::{OperatingDays, Weekday};
pub use environment::{Clock, PaymentCollaborator, PaymentFuture, SystemClock};
pub use error::{ErrorKind, ReservationError, Result};
pub use ledger::{Availability, CapacityLedger, LedgerKey, LedgerStatus, LedgerStatusUpdate};
pub use reducer::Reducer;
pub use refund::{Refund, RefundStatus, RefundStep};
pub use schedule::{RoutePricing, Schedule, ScheduleSnapshot, ScheduleStatus};
pub use state_machine::{
    BookingAction, BookingEffect, BookingEnvironment, BookingReducer, BookingTransition,
    CancellationPolicy,
};
pub use store::{
    BookingRepository, LedgerRepository, RefundRepository, ReservationStore, ScheduleCascade,
    ScheduleRepository, ScheduleStatusChange,
};
pub use types::{
    Actor, ActorType, BookingId, Category, CategoryCounts, FerryId, Money, PaymentId, RefundId,
    RouteId, ScheduleId, UserId, VehicleType,
};

// Re-export commonly used types
pub use chrono::{DateTime, NaiveDate, Utc};
pub use smallvec::{SmallVec, smallvec};
