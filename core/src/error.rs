//! Error taxonomy for the reservation core.

use crate::booking::BookingStatus;
use crate::ledger::{LedgerKey, LedgerStatus};
use crate::refund::RefundStatus;
use crate::types::{BookingId, Category, RefundId, ScheduleId};
use chrono::NaiveDate;
use thiserror::Error;

/// Result type alias for reservation operations.
pub type Result<T> = std::result::Result<T, ReservationError>;

/// Coarse classification used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed request; nothing happened
    Validation,
    /// Schedule, booking, ledger, refund or payment missing
    NotFound,
    /// The entity is in a state that forbids the operation
    StateConflict,
    /// A capacity category would be oversold
    CapacityExceeded,
    /// Lock or compare-and-swap contention; retry later
    ConcurrencyConflict,
    /// Storage failed; any reservation already made was compensated
    Persistence,
    /// The payment collaborator failed
    ExternalCollaborator,
}

/// Every way a reservation-core operation can fail.
///
/// Each rejection names its specific cause so callers can tell apart a full
/// car deck from a closed cancellation window.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReservationError {
    // ═══════════════════════════════════════════════════════════
    // Validation
    // ═══════════════════════════════════════════════════════════

    /// The request itself is malformed.
    #[error("Invalid request: {0}")]
    Validation(String),

    // ═══════════════════════════════════════════════════════════
    // Not found
    // ═══════════════════════════════════════════════════════════

    /// No schedule with this id.
    #[error("Schedule {0} not found")]
    ScheduleNotFound(ScheduleId),

    /// No booking with this id or code.
    #[error("Booking {0} not found")]
    BookingNotFound(String),

    /// No ledger row for this schedule and date.
    #[error("No capacity ledger for {0}")]
    LedgerNotFound(LedgerKey),

    /// No refund with this id.
    #[error("Refund {0} not found")]
    RefundNotFound(RefundId),

    /// No payment attempt with this reference.
    #[error("Payment {0} not found")]
    PaymentNotFound(String),

    /// No ticket with this code.
    #[error("Ticket {0} not found")]
    TicketNotFound(String),

    // ═══════════════════════════════════════════════════════════
    // State conflicts
    // ═══════════════════════════════════════════════════════════

    /// The schedule does not sail on the requested weekday.
    #[error("Schedule {schedule_id} does not operate on {date} ({weekday})")]
    DayNotOperating {
        /// Schedule that was requested
        schedule_id: ScheduleId,
        /// Requested sailing date
        date: NaiveDate,
        /// Weekday name of the date
        weekday: String,
    },

    /// The sailing date is not open for reservations.
    #[error("Sailing {key} is not available: {status}")]
    DateUnavailable {
        /// Ledger row that rejected the request
        key: LedgerKey,
        /// Its status at the time of the check
        status: LedgerStatus,
        /// Operator supplied reason, if any
        reason: Option<String>,
    },

    /// The booking cannot be cancelled from its current status.
    #[error("Booking {booking_id} cannot be cancelled while {status}")]
    BookingNotCancellable {
        /// Booking
        booking_id: BookingId,
        /// Its current status
        status: BookingStatus,
    },

    /// Self-service cancellation is closed for this sailing date.
    #[error("Cancellation window closed for booking {booking_id} sailing on {booking_date} (today is {today})")]
    CancellationWindowClosed {
        /// Booking
        booking_id: BookingId,
        /// Sailing date
        booking_date: NaiveDate,
        /// Date the cancellation was attempted
        today: NaiveDate,
    },

    /// Any other illegal booking transition.
    #[error("Booking {booking_id} cannot {action} while {status}")]
    InvalidTransition {
        /// Booking
        booking_id: BookingId,
        /// Its current status
        status: BookingStatus,
        /// Attempted action
        action: &'static str,
    },

    /// Illegal refund transition or a second active refund.
    #[error("Refund {refund_id} cannot {action} while {status}")]
    InvalidRefundTransition {
        /// Refund
        refund_id: RefundId,
        /// Its current status
        status: RefundStatus,
        /// Attempted action
        action: &'static str,
    },

    /// The booking already has a refund in flight.
    #[error("Booking {booking_id} already has active refund {refund_id}")]
    RefundAlreadyActive {
        /// Booking
        booking_id: BookingId,
        /// The active refund
        refund_id: RefundId,
    },

    /// The ticket cannot be checked in.
    #[error("Ticket {ticket_code} cannot be checked in: {reason}")]
    TicketNotBoardable {
        /// Ticket
        ticket_code: String,
        /// Why not
        reason: String,
    },

    // ═══════════════════════════════════════════════════════════
    // Capacity
    // ═══════════════════════════════════════════════════════════

    /// Reserving would oversell a category.
    #[error("Insufficient {category} capacity: {current} reserved + {requested} requested > {capacity}")]
    CapacityExceeded {
        /// The first category that failed
        category: Category,
        /// Reserved before this request
        current: u32,
        /// Requested by this request
        requested: u32,
        /// Ferry capacity for the category
        capacity: u32,
    },

    // ═══════════════════════════════════════════════════════════
    // Transient / system
    // ═══════════════════════════════════════════════════════════

    /// Lock contention or a lost compare-and-swap.
    #[error("Concurrent update on {resource}; retry")]
    ConcurrencyConflict {
        /// What was contended
        resource: String,
    },

    /// Storage failed.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Payment initiation failed; the booking exists and stays PENDING.
    #[error("Payment initiation failed for booking {booking_code}: {reason}")]
    PaymentInitiationFailed {
        /// Booking that awaits payment
        booking_id: BookingId,
        /// Its shareable code
        booking_code: String,
        /// Collaborator message
        reason: String,
    },

    /// The payment collaborator failed outside booking creation.
    #[error("Payment collaborator error: {0}")]
    ExternalCollaborator(String),
}

impl ReservationError {
    /// Classify the error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::ScheduleNotFound(_)
            | Self::BookingNotFound(_)
            | Self::LedgerNotFound(_)
            | Self::RefundNotFound(_)
            | Self::PaymentNotFound(_)
            | Self::TicketNotFound(_) => ErrorKind::NotFound,
            Self::DayNotOperating { .. }
            | Self::DateUnavailable { .. }
            | Self::BookingNotCancellable { .. }
            | Self::CancellationWindowClosed { .. }
            | Self::InvalidTransition { .. }
            | Self::InvalidRefundTransition { .. }
            | Self::RefundAlreadyActive { .. }
            | Self::TicketNotBoardable { .. } => ErrorKind::StateConflict,
            Self::CapacityExceeded { .. } => ErrorKind::CapacityExceeded,
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::Persistence(_) => ErrorKind::Persistence,
            Self::PaymentInitiationFailed { .. } | Self::ExternalCollaborator(_) => {
                ErrorKind::ExternalCollaborator
            }
        }
    }

    /// Returns `true` if repeating the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::ConcurrencyConflict | ErrorKind::Persistence | ErrorKind::ExternalCollaborator
        )
    }

    /// Shorthand for a contention error on a ledger row.
    #[must_use]
    pub fn ledger_contended(key: &LedgerKey) -> Self {
        Self::ConcurrencyConflict {
            resource: format!("ledger {key}"),
        }
    }
}
