//! Booking lifecycle as a reducer.
//!
//! ```text
//! PENDING ──confirm──▶ CONFIRMED ──complete──▶ COMPLETED
//! PENDING | CONFIRMED ──cancel──▶ CANCELLED
//! CONFIRMED | COMPLETED ──request refund──▶ REFUND_PENDING
//! REFUND_PENDING ──settle──▶ REFUNDED
//! REFUND_PENDING ──withdraw──▶ CONFIRMED
//! PENDING ──reschedule──▶ RESCHEDULED
//! ```
//!
//! CANCELLED, REFUNDED and RESCHEDULED release the booking's capacity and
//! void its unused tickets. Every transition appends exactly one audit log
//! entry. The reducer only decides; [`BookingTransition`] is the unit the
//! store commits atomically.

use crate::booking::{Booking, BookingLogEntry, BookingStatus, TicketStatus};
use crate::environment::Clock;
use crate::error::{ReservationError, Result};
use crate::ledger::LedgerKey;
use crate::reducer::Reducer;
use crate::types::{Actor, ActorType, BookingId, CategoryCounts, RefundId};
use chrono::{DateTime, NaiveDate, Utc};
use smallvec::{SmallVec, smallvec};
use std::sync::Arc;

/// Self-service cancellation closes when the sailing is fewer than this many
/// days away (so today and tomorrow are closed).
pub const SELF_SERVICE_CUTOFF_DAYS: i64 = 2;

// ============================================================================
// Actions and effects
// ============================================================================

/// How the cancellation cutoff applies. Always passed explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancellationPolicy {
    /// Customer cancellation, subject to the H-1 cutoff
    SelfService,
    /// Staff (or system compensation) cancellation that bypasses the cutoff
    AdminOverride,
}

/// Inputs to the booking state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingAction {
    /// Payment captured
    Confirm {
        /// Who confirmed (SYSTEM for payment callbacks)
        actor: Actor,
        /// Log notes, usually the payment reference
        notes: Option<String>,
    },
    /// Cancel and release capacity
    Cancel {
        /// Who cancelled
        actor: Actor,
        /// Stored on the booking and in the log
        reason: String,
        /// Whether the cutoff applies
        policy: CancellationPolicy,
    },
    /// Sailing done
    Complete {
        /// Who completed it
        actor: Actor,
    },
    /// A refund was requested
    RequestRefund {
        /// Requester
        actor: Actor,
        /// The new refund
        refund_id: RefundId,
    },
    /// A refund was approved; money goes back and capacity is released
    SettleRefund {
        /// Approver
        actor: Actor,
        /// The approved refund
        refund_id: RefundId,
    },
    /// A refund was rejected or withdrawn; the booking stands again
    WithdrawRefund {
        /// Who rejected or withdrew
        actor: Actor,
        /// The refund
        refund_id: RefundId,
        /// Why
        notes: String,
    },
    /// Moved to another sailing
    Reschedule {
        /// Who moved it
        actor: Actor,
        /// Code of the replacement booking
        replacement_code: String,
    },
}

impl BookingAction {
    /// The acting party
    #[must_use]
    pub const fn actor(&self) -> Actor {
        match self {
            Self::Confirm { actor, .. }
            | Self::Cancel { actor, .. }
            | Self::Complete { actor }
            | Self::RequestRefund { actor, .. }
            | Self::SettleRefund { actor, .. }
            | Self::WithdrawRefund { actor, .. }
            | Self::Reschedule { actor, .. } => *actor,
        }
    }

    /// Short name for logs and metric labels
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Confirm { .. } => "confirm",
            Self::Cancel { .. } => "cancel",
            Self::Complete { .. } => "complete",
            Self::RequestRefund { .. } => "request_refund",
            Self::SettleRefund { .. } => "settle_refund",
            Self::WithdrawRefund { .. } => "withdraw_refund",
            Self::Reschedule { .. } => "reschedule",
        }
    }
}

/// Side effects a transition requires. Executed by the store, atomically
/// with the status write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BookingEffect {
    /// Give the booking's counters back to its ledger row
    ReleaseCapacity {
        /// Ledger row
        key: LedgerKey,
        /// Exactly what the booking reserved
        delta: CategoryCounts,
    },
    /// Void every ACTIVE ticket
    CancelTickets,
    /// Persist the cancellation reason
    RecordCancellationReason(String),
    /// Append to the audit trail
    AppendLog(BookingLogEntry),
}

/// Dependencies of the booking reducer.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Source of "now" for cutoffs and timestamps
    pub clock: Arc<dyn Clock>,
}

impl BookingEnvironment {
    /// Creates a new `BookingEnvironment`
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer for the booking lifecycle.
#[derive(Clone, Copy, Debug, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates a new `BookingReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decides the target status, or why the action is illegal.
    fn target_status(
        booking: &Booking,
        action: &BookingAction,
        today: NaiveDate,
    ) -> Result<BookingStatus> {
        let invalid = |action: &'static str| ReservationError::InvalidTransition {
            booking_id: booking.id,
            status: booking.status,
            action,
        };

        match (action, booking.status) {
            (BookingAction::Confirm { .. }, BookingStatus::Pending) => Ok(BookingStatus::Confirmed),
            (BookingAction::Confirm { .. }, _) => Err(invalid("be confirmed")),

            (BookingAction::Cancel { actor, policy, .. }, BookingStatus::Pending | BookingStatus::Confirmed) => {
                match policy {
                    CancellationPolicy::AdminOverride
                        if !actor.kind.is_staff() && actor.kind != ActorType::System =>
                    {
                        Err(ReservationError::Validation(format!(
                            "cancellation override requires an ADMIN, OPERATOR or SYSTEM actor, got {}",
                            actor.kind.as_str()
                        )))
                    }
                    CancellationPolicy::SelfService
                        if (booking.booking_date - today).num_days() < SELF_SERVICE_CUTOFF_DAYS =>
                    {
                        Err(ReservationError::CancellationWindowClosed {
                            booking_id: booking.id,
                            booking_date: booking.booking_date,
                            today,
                        })
                    }
                    _ => Ok(BookingStatus::Cancelled),
                }
            }
            (BookingAction::Cancel { .. }, status) => Err(ReservationError::BookingNotCancellable {
                booking_id: booking.id,
                status,
            }),

            (BookingAction::Complete { .. }, BookingStatus::Confirmed) => Ok(BookingStatus::Completed),
            (BookingAction::Complete { .. }, _) => Err(invalid("be completed")),

            (
                BookingAction::RequestRefund { .. },
                BookingStatus::Confirmed | BookingStatus::Completed,
            ) => Ok(BookingStatus::RefundPending),
            (BookingAction::RequestRefund { .. }, _) => Err(invalid("request a refund")),

            (BookingAction::SettleRefund { .. }, BookingStatus::RefundPending) => Ok(BookingStatus::Refunded),
            (BookingAction::SettleRefund { .. }, _) => Err(invalid("be refunded")),

            (BookingAction::WithdrawRefund { .. }, BookingStatus::RefundPending) => Ok(BookingStatus::Confirmed),
            (BookingAction::WithdrawRefund { .. }, _) => Err(invalid("withdraw a refund")),

            (BookingAction::Reschedule { .. }, BookingStatus::Pending) => Ok(BookingStatus::Rescheduled),
            (BookingAction::Reschedule { .. }, _) => Err(invalid("be rescheduled")),
        }
    }

    fn log_notes(action: &BookingAction) -> Option<String> {
        match action {
            BookingAction::Confirm { notes, .. } => notes.clone(),
            BookingAction::Cancel { reason, .. } => Some(reason.clone()),
            BookingAction::Complete { .. } => None,
            BookingAction::RequestRefund { refund_id, .. } => Some(format!("refund {refund_id} requested")),
            BookingAction::SettleRefund { refund_id, .. } => Some(format!("refund {refund_id} approved")),
            BookingAction::WithdrawRefund { notes, .. } => Some(notes.clone()),
            BookingAction::Reschedule { replacement_code, .. } => {
                Some(format!("rescheduled to {replacement_code}"))
            }
        }
    }
}

impl Reducer for BookingReducer {
    type State = Booking;
    type Action = BookingAction;
    type Environment = BookingEnvironment;
    type Effect = BookingEffect;

    fn reduce(
        &self,
        state: &mut Booking,
        action: BookingAction,
        env: &BookingEnvironment,
    ) -> Result<SmallVec<[BookingEffect; 4]>> {
        let now = env.clock.now();
        let next = Self::target_status(state, &action, now.date_naive())?;
        let actor = action.actor();
        let previous = state.status;

        let mut effects: SmallVec<[BookingEffect; 4]> = smallvec![];

        if !next.holds_capacity() && previous.holds_capacity() {
            effects.push(BookingEffect::ReleaseCapacity {
                key: state.ledger_key(),
                delta: state.capacity_delta(),
            });
            effects.push(BookingEffect::CancelTickets);
            for ticket in &mut state.tickets {
                if ticket.status == TicketStatus::Active {
                    ticket.status = TicketStatus::Cancelled;
                }
            }
        }

        if let BookingAction::Cancel { reason, .. } = &action {
            state.cancellation_reason = Some(reason.clone());
            effects.push(BookingEffect::RecordCancellationReason(reason.clone()));
        }

        state.status = next;
        state.updated_at = now;
        effects.push(BookingEffect::AppendLog(BookingLogEntry {
            booking_id: state.id,
            previous_status: Some(previous),
            new_status: next,
            changed_by_type: actor.kind,
            changed_by_id: actor.id,
            notes: Self::log_notes(&action),
            created_at: now,
        }));

        Ok(effects)
    }
}

// ============================================================================
// Commit unit
// ============================================================================

/// Everything one transition writes, committed as one atomic unit.
///
/// The store applies it only if the booking is still in `expected_status`;
/// otherwise it reports a concurrency conflict and writes nothing. A racing
/// second cancel therefore cannot release capacity twice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookingTransition {
    /// Booking
    pub booking_id: BookingId,
    /// Status the decision was based on
    pub expected_status: BookingStatus,
    /// Status to write
    pub new_status: BookingStatus,
    /// Reason to store, if cancelling
    pub cancellation_reason: Option<String>,
    /// Void ACTIVE tickets
    pub cancel_tickets: bool,
    /// Capacity to return to a ledger row
    pub release: Option<(LedgerKey, CategoryCounts)>,
    /// Audit entries to append
    pub log: Vec<BookingLogEntry>,
    /// When
    pub at: DateTime<Utc>,
}

impl BookingTransition {
    /// Folds reducer effects into a commit unit.
    #[must_use]
    pub fn fold(
        expected_status: BookingStatus,
        after: &Booking,
        effects: impl IntoIterator<Item = BookingEffect>,
    ) -> Self {
        let mut transition = Self {
            booking_id: after.id,
            expected_status,
            new_status: after.status,
            cancellation_reason: None,
            cancel_tickets: false,
            release: None,
            log: Vec::new(),
            at: after.updated_at,
        };
        for effect in effects {
            match effect {
                BookingEffect::ReleaseCapacity { key, delta } => transition.release = Some((key, delta)),
                BookingEffect::CancelTickets => transition.cancel_tickets = true,
                BookingEffect::RecordCancellationReason(reason) => {
                    transition.cancellation_reason = Some(reason);
                }
                BookingEffect::AppendLog(entry) => transition.log.push(entry),
            }
        }
        transition
    }

    /// Runs the reducer on a copy of `booking` and folds the result.
    ///
    /// # Errors
    ///
    /// Returns the reducer's rejection.
    pub fn plan(
        booking: &Booking,
        action: BookingAction,
        env: &BookingEnvironment,
    ) -> Result<(Booking, Self)> {
        let mut after = booking.clone();
        let effects = BookingReducer::new().reduce(&mut after, action, env)?;
        let transition = Self::fold(booking.status, &after, effects);
        Ok((after, transition))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::booking::{BookingChannel, BookingRequest, PassengerDetails, VehicleDetails};
    use crate::types::{ActorType, Money, ScheduleId, UserId, VehicleType};
    use chrono::TimeZone;

    struct Fixed(DateTime<Utc>);

    impl Clock for Fixed {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    fn env_at(y: i32, m: u32, d: u32) -> BookingEnvironment {
        BookingEnvironment::new(Arc::new(Fixed(
            Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap(),
        )))
    }

    fn booking(status: BookingStatus, sailing: NaiveDate) -> Booking {
        let request = BookingRequest {
            user_id: UserId::new(),
            schedule_id: ScheduleId::new(),
            date: sailing,
            passengers: vec![PassengerDetails::named("Ana"), PassengerDetails::named("Budi")],
            vehicles: vec![VehicleDetails::new(VehicleType::Car, "B 1 XY")],
            channel: BookingChannel::Online,
        };
        let mut booking = Booking::pending(&request, "FBCANCEL22".to_string(), Money::from_cents(1), Utc::now());
        booking.status = status;
        booking
    }

    fn sailing() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 6, 10).unwrap()
    }

    fn self_cancel(user: UserId) -> BookingAction {
        BookingAction::Cancel {
            actor: Actor::user(user),
            reason: "plans changed".to_string(),
            policy: CancellationPolicy::SelfService,
        }
    }

    #[test]
    fn test_cancel_releases_exact_delta_and_voids_tickets() {
        let mut state = booking(BookingStatus::Confirmed, sailing());
        let user = state.user_id;
        let effects = BookingReducer::new()
            .reduce(&mut state, self_cancel(user), &env_at(2025, 6, 1))
            .unwrap();

        assert_eq!(state.status, BookingStatus::Cancelled);
        assert_eq!(state.cancellation_reason.as_deref(), Some("plans changed"));
        assert!(state.tickets.iter().all(|t| t.status == TicketStatus::Cancelled));
        assert_eq!(
            effects[0],
            BookingEffect::ReleaseCapacity {
                key: state.ledger_key(),
                delta: CategoryCounts { passengers: 2, cars: 1, ..CategoryCounts::ZERO },
            }
        );
        match effects.last().unwrap() {
            BookingEffect::AppendLog(entry) => {
                assert_eq!(entry.previous_status, Some(BookingStatus::Confirmed));
                assert_eq!(entry.new_status, BookingStatus::Cancelled);
                assert_eq!(entry.changed_by_type, ActorType::User);
            }
            other => panic!("expected log entry, got {other:?}"),
        }
    }

    #[test]
    fn test_self_service_cutoff_closes_today_and_tomorrow() {
        for today in [10, 9] {
            let mut state = booking(BookingStatus::Confirmed, sailing());
            let user = state.user_id;
            let err = BookingReducer::new()
                .reduce(&mut state, self_cancel(user), &env_at(2025, 6, today))
                .unwrap_err();
            assert!(matches!(err, ReservationError::CancellationWindowClosed { .. }));
            assert_eq!(state.status, BookingStatus::Confirmed);
        }

        let mut state = booking(BookingStatus::Confirmed, sailing());
        let user = state.user_id;
        assert!(
            BookingReducer::new()
                .reduce(&mut state, self_cancel(user), &env_at(2025, 6, 8))
                .is_ok()
        );
    }

    #[test]
    fn test_admin_override_bypasses_cutoff() {
        let mut state = booking(BookingStatus::Confirmed, sailing());
        let action = BookingAction::Cancel {
            actor: Actor::admin(uuid::Uuid::new_v4()),
            reason: "vessel swap".to_string(),
            policy: CancellationPolicy::AdminOverride,
        };

        BookingReducer::new()
            .reduce(&mut state, action, &env_at(2025, 6, 10))
            .unwrap();
        assert_eq!(state.status, BookingStatus::Cancelled);
    }

    #[test]
    fn test_admin_without_override_still_hits_cutoff() {
        let mut state = booking(BookingStatus::Confirmed, sailing());
        let action = BookingAction::Cancel {
            actor: Actor::admin(uuid::Uuid::new_v4()),
            reason: "late".to_string(),
            policy: CancellationPolicy::SelfService,
        };

        let err = BookingReducer::new()
            .reduce(&mut state, action, &env_at(2025, 6, 10))
            .unwrap_err();
        assert!(matches!(err, ReservationError::CancellationWindowClosed { .. }));
    }

    #[test]
    fn test_user_cannot_claim_override() {
        let mut state = booking(BookingStatus::Pending, sailing());
        let action = BookingAction::Cancel {
            actor: Actor::user(state.user_id),
            reason: "please".to_string(),
            policy: CancellationPolicy::AdminOverride,
        };

        let err = BookingReducer::new()
            .reduce(&mut state, action, &env_at(2025, 6, 1))
            .unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)));
    }

    #[test]
    fn test_completed_booking_is_not_cancellable() {
        let mut state = booking(BookingStatus::Completed, sailing());
        let user = state.user_id;
        let err = BookingReducer::new()
            .reduce(&mut state, self_cancel(user), &env_at(2025, 6, 1))
            .unwrap_err();
        assert!(matches!(
            err,
            ReservationError::BookingNotCancellable { status: BookingStatus::Completed, .. }
        ));
    }

    #[test]
    fn test_confirm_only_from_pending() {
        let env = env_at(2025, 6, 1);
        let confirm = BookingAction::Confirm {
            actor: Actor::system(),
            notes: Some("pay_1".to_string()),
        };

        let mut state = booking(BookingStatus::Pending, sailing());
        let effects = BookingReducer::new().reduce(&mut state, confirm.clone(), &env).unwrap();
        assert_eq!(state.status, BookingStatus::Confirmed);
        assert_eq!(effects.len(), 1);

        let err = BookingReducer::new().reduce(&mut state, confirm, &env).unwrap_err();
        assert!(matches!(err, ReservationError::InvalidTransition { .. }));
    }

    #[test]
    fn test_refund_request_keeps_capacity_and_settlement_releases_it() {
        let env = env_at(2025, 6, 1);
        let refund_id = RefundId::new();
        let mut state = booking(BookingStatus::Confirmed, sailing());
        let user = state.user_id;

        let effects = BookingReducer::new()
            .reduce(
                &mut state,
                BookingAction::RequestRefund { actor: Actor::user(user), refund_id },
                &env,
            )
            .unwrap();
        assert_eq!(state.status, BookingStatus::RefundPending);
        assert!(!effects.iter().any(|e| matches!(e, BookingEffect::ReleaseCapacity { .. })));

        let effects = BookingReducer::new()
            .reduce(
                &mut state,
                BookingAction::SettleRefund { actor: Actor::admin(uuid::Uuid::new_v4()), refund_id },
                &env,
            )
            .unwrap();
        assert_eq!(state.status, BookingStatus::Refunded);
        assert!(effects.iter().any(|e| matches!(e, BookingEffect::ReleaseCapacity { .. })));
    }

    #[test]
    fn test_withdrawn_refund_restores_confirmed_without_capacity_change() {
        let mut state = booking(BookingStatus::RefundPending, sailing());
        let effects = BookingReducer::new()
            .reduce(
                &mut state,
                BookingAction::WithdrawRefund {
                    actor: Actor::admin(uuid::Uuid::new_v4()),
                    refund_id: RefundId::new(),
                    notes: "refund rejected".to_string(),
                },
                &env_at(2025, 6, 1),
            )
            .unwrap();

        assert_eq!(state.status, BookingStatus::Confirmed);
        assert_eq!(effects.len(), 1);
    }

    #[test]
    fn test_reschedule_only_from_pending() {
        let env = env_at(2025, 6, 1);
        let action = BookingAction::Reschedule {
            actor: Actor::system(),
            replacement_code: "FBNEWCODE2".to_string(),
        };

        let mut confirmed = booking(BookingStatus::Confirmed, sailing());
        assert!(BookingReducer::new().reduce(&mut confirmed, action.clone(), &env).is_err());

        let pending = booking(BookingStatus::Pending, sailing());
        let (after, transition) = BookingTransition::plan(&pending, action, &env).unwrap();
        assert_eq!(after.status, BookingStatus::Rescheduled);
        assert_eq!(transition.expected_status, BookingStatus::Pending);
        assert_eq!(transition.release.map(|(_, delta)| delta), Some(pending.capacity_delta()));
        assert!(transition.cancel_tickets);
        assert_eq!(transition.log.len(), 1);
        assert_eq!(transition.log[0].notes.as_deref(), Some("rescheduled to FBNEWCODE2"));
    }
}
