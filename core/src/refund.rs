//! Refunds and their status transitions.

use crate::booking::{Booking, BookingStatus};
use crate::error::{ReservationError, Result};
use crate::types::{BookingId, Money, PaymentId, RefundId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Refund status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefundStatus {
    /// Requested, awaiting staff decision
    Pending,
    /// Approved; money not yet returned
    Approved,
    /// Declined by staff
    Rejected,
    /// Money returned
    Completed,
    /// Withdrawn before a decision
    Cancelled,
}

impl RefundStatus {
    /// Database representation
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
        }
    }

    /// Parse from the database representation
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(Self::Pending),
            "APPROVED" => Some(Self::Approved),
            "REJECTED" => Some(Self::Rejected),
            "COMPLETED" => Some(Self::Completed),
            "CANCELLED" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Active refunds block a second request for the same booking.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Rejected | Self::Cancelled)
    }
}

impl fmt::Display for RefundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What staff or the collaborator did to a refund.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefundStep {
    /// Staff approved
    Approve,
    /// Staff declined
    Reject,
    /// Requester withdrew
    Cancel,
    /// Collaborator returned the money
    Complete,
}

impl RefundStep {
    const fn verb(self) -> &'static str {
        match self {
            Self::Approve => "be approved",
            Self::Reject => "be rejected",
            Self::Cancel => "be cancelled",
            Self::Complete => "complete",
        }
    }
}

/// A request to return money for a booking.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Refund {
    /// Identifier
    pub id: RefundId,
    /// Booking refunded
    pub booking_id: BookingId,
    /// Payment the money goes back through
    pub payment_id: PaymentId,
    /// Amount, at most the booking total
    pub amount: Money,
    /// Requester's reason
    pub reason: String,
    /// Status
    pub status: RefundStatus,
    /// How the money is returned (original method, bank transfer, ...)
    pub refund_method: String,
    /// Collaborator transaction id once completed
    pub transaction_id: Option<String>,
    /// Created
    pub created_at: DateTime<Utc>,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl Refund {
    /// Validates a new refund for `booking` and builds it in PENDING.
    ///
    /// # Errors
    ///
    /// - [`ReservationError::Validation`] for a zero amount, an amount above
    ///   the booking total, or a blank reason
    /// - [`ReservationError::InvalidTransition`] unless the booking is
    ///   CONFIRMED or COMPLETED
    pub fn request(
        booking: &Booking,
        payment_id: PaymentId,
        amount: Money,
        reason: &str,
        refund_method: &str,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if !matches!(
            booking.status,
            BookingStatus::Confirmed | BookingStatus::Completed
        ) {
            return Err(ReservationError::InvalidTransition {
                booking_id: booking.id,
                status: booking.status,
                action: "request a refund",
            });
        }
        if amount.is_zero() {
            return Err(ReservationError::Validation(
                "refund amount must be greater than zero".to_string(),
            ));
        }
        if amount > booking.total_amount {
            return Err(ReservationError::Validation(format!(
                "refund {amount} exceeds booking total {}",
                booking.total_amount
            )));
        }
        if reason.trim().is_empty() {
            return Err(ReservationError::Validation(
                "refund reason is required".to_string(),
            ));
        }

        Ok(Self {
            id: RefundId::new(),
            booking_id: booking.id,
            payment_id,
            amount,
            reason: reason.to_string(),
            status: RefundStatus::Pending,
            refund_method: refund_method.to_string(),
            transaction_id: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// The status `step` leads to from the current status.
    ///
    /// # Errors
    ///
    /// Returns [`ReservationError::InvalidRefundTransition`] for any step not
    /// in: PENDING → APPROVED | REJECTED | CANCELLED, APPROVED → COMPLETED.
    pub const fn next_status(&self, step: RefundStep) -> Result<RefundStatus> {
        match (self.status, step) {
            (RefundStatus::Pending, RefundStep::Approve) => Ok(RefundStatus::Approved),
            (RefundStatus::Pending, RefundStep::Reject) => Ok(RefundStatus::Rejected),
            (RefundStatus::Pending, RefundStep::Cancel) => Ok(RefundStatus::Cancelled),
            (RefundStatus::Approved, RefundStep::Complete) => Ok(RefundStatus::Completed),
            (status, step) => Err(ReservationError::InvalidRefundTransition {
                refund_id: self.id,
                status,
                action: step.verb(),
            }),
        }
    }

    /// Applies `step`.
    ///
    /// # Errors
    ///
    /// See [`next_status`](Self::next_status).
    pub fn advance(&mut self, step: RefundStep, now: DateTime<Utc>) -> Result<RefundStatus> {
        let previous = self.status;
        self.status = self.next_status(step)?;
        self.updated_at = now;
        Ok(previous)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::booking::{BookingChannel, BookingRequest, PassengerDetails};
    use crate::types::{ScheduleId, UserId};
    use chrono::NaiveDate;

    fn confirmed_booking(total: u64) -> Booking {
        let request = BookingRequest {
            user_id: UserId::new(),
            schedule_id: ScheduleId::new(),
            date: NaiveDate::from_ymd_opt(2025, 3, 3).unwrap(),
            passengers: vec![PassengerDetails::named("Ana")],
            vehicles: vec![],
            channel: BookingChannel::Online,
        };
        let mut booking =
            Booking::pending(&request, "FBTESTTEST".to_string(), Money::from_cents(total), Utc::now());
        booking.status = BookingStatus::Confirmed;
        booking
    }

    #[test]
    fn test_refund_amount_capped_by_booking_total() {
        let booking = confirmed_booking(10_000);
        let over = Refund::request(
            &booking,
            PaymentId::new(),
            Money::from_cents(10_001),
            "trip cancelled",
            "ORIGINAL",
            Utc::now(),
        );
        assert!(matches!(over, Err(ReservationError::Validation(_))));

        let exact = Refund::request(
            &booking,
            PaymentId::new(),
            Money::from_cents(10_000),
            "trip cancelled",
            "ORIGINAL",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(exact.status, RefundStatus::Pending);
    }

    #[test]
    fn test_pending_booking_cannot_request_refund() {
        let mut booking = confirmed_booking(10_000);
        booking.status = BookingStatus::Pending;

        let err = Refund::request(
            &booking,
            PaymentId::new(),
            Money::from_cents(100),
            "changed plans",
            "ORIGINAL",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, ReservationError::InvalidTransition { .. }));
    }

    #[test]
    fn test_refund_transitions() {
        let booking = confirmed_booking(10_000);
        let mut refund = Refund::request(
            &booking,
            PaymentId::new(),
            Money::from_cents(5_000),
            "illness",
            "ORIGINAL",
            Utc::now(),
        )
        .unwrap();

        assert!(refund.next_status(RefundStep::Complete).is_err());
        refund.advance(RefundStep::Approve, Utc::now()).unwrap();
        assert!(refund.next_status(RefundStep::Reject).is_err());
        refund.advance(RefundStep::Complete, Utc::now()).unwrap();
        assert_eq!(refund.status, RefundStatus::Completed);
        assert!(refund.status.is_active());
    }

    #[test]
    fn test_rejected_and_cancelled_are_inactive() {
        assert!(!RefundStatus::Rejected.is_active());
        assert!(!RefundStatus::Cancelled.is_active());
        assert!(RefundStatus::Pending.is_active());
        assert!(RefundStatus::Approved.is_active());
    }
}
