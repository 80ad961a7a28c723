//! Booking lifecycle: drives [`BookingReducer`](ferry_core::BookingReducer)
//! decisions through the store.
//!
//! Every transition loads the booking, lets the reducer decide, and commits
//! the resulting [`BookingTransition`] conditional on the status it was
//! decided from. A lost race is retried from a fresh load, so the loser of
//! two concurrent cancels sees `BookingNotCancellable` instead of releasing
//! capacity a second time.

use crate::engine::{BookingReceipt, ReservationEngine};
use crate::metrics;
use crate::retry::retry_on_contention;
use chrono::NaiveDate;
use ferry_core::{
    Actor, Booking, BookingAction, BookingId, BookingLogEntry, BookingRepository, BookingStatus,
    BookingTransition, CancellationPolicy, CapacityLedger, LedgerKey, LedgerStatus,
    LedgerStatusUpdate, Payment, PaymentOutcome, PaymentReference, PaymentStatus,
    ReservationError, ReservationStore, Result, ScheduleId, ScheduleRepository, TicketStatus,
};

/// Result of closing out a sailing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SailingCompletion {
    /// Bookings moved CONFIRMED → COMPLETED
    pub completed: Vec<BookingId>,
    /// The ledger row, now DEPARTED
    pub ledger: CapacityLedger,
}

/// Applies state transitions, payment outcomes, reschedules and check-ins.
pub struct BookingLifecycle<S> {
    engine: ReservationEngine<S>,
}

impl<S> Clone for BookingLifecycle<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
        }
    }
}

impl<S: ReservationStore> BookingLifecycle<S> {
    /// Creates a new `BookingLifecycle`
    #[must_use]
    pub const fn new(engine: ReservationEngine<S>) -> Self {
        Self { engine }
    }

    fn store(&self) -> &S {
        &self.engine.env().store
    }

    /// Decides and commits one transition, retrying lost races.
    pub(crate) async fn apply(&self, booking_id: BookingId, action: BookingAction) -> Result<Booking> {
        let env = self.engine.env();
        let store = &env.store;
        let booking_env = env.booking_env();
        let name = action.name();

        let outcome = retry_on_contention(env.lock_retry, || {
            let action = action.clone();
            let booking_env = &booking_env;
            async move {
                let booking = store.load_booking(booking_id).await?;
                let (_, transition) = BookingTransition::plan(&booking, action, booking_env)?;
                store.commit_transition(&transition).await
            }
        })
        .await;

        match &outcome {
            Ok(booking) => {
                metrics::transition(name, booking.status);
                tracing::info!(
                    booking_code = %booking.booking_code,
                    action = name,
                    status = %booking.status,
                    "Booking transition committed"
                );
            }
            Err(error) => {
                tracing::warn!(
                    booking_id = %booking_id,
                    action = name,
                    error = %error,
                    "Booking transition rejected"
                );
            }
        }
        outcome
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    /// PENDING → CONFIRMED.
    ///
    /// # Errors
    ///
    /// `BookingNotFound`, `InvalidTransition` or a store error.
    pub async fn confirm(&self, booking_id: BookingId, actor: Actor, notes: Option<String>) -> Result<Booking> {
        self.apply(booking_id, BookingAction::Confirm { actor, notes }).await
    }

    /// PENDING | CONFIRMED → CANCELLED, releasing exactly the booking's
    /// reserved counts and voiding its tickets in the same unit.
    ///
    /// # Errors
    ///
    /// - `Validation` for a blank reason, or an override from a customer
    /// - `BookingNotCancellable` from any other status
    /// - `CancellationWindowClosed` for self-service inside the cutoff
    /// - `ConcurrencyConflict` / `Persistence`, with nothing written
    pub async fn cancel(
        &self,
        booking_id: BookingId,
        reason: &str,
        actor: Actor,
        policy: CancellationPolicy,
    ) -> Result<Booking> {
        if reason.trim().is_empty() {
            return Err(ReservationError::Validation(
                "a cancellation needs a reason".to_string(),
            ));
        }
        self.apply(
            booking_id,
            BookingAction::Cancel {
                actor,
                reason: reason.to_string(),
                policy,
            },
        )
        .await
    }

    /// CONFIRMED → COMPLETED.
    ///
    /// # Errors
    ///
    /// `BookingNotFound`, `InvalidTransition` or a store error.
    pub async fn complete(&self, booking_id: BookingId, actor: Actor) -> Result<Booking> {
        self.apply(booking_id, BookingAction::Complete { actor }).await
    }

    // ========================================================================
    // Payments
    // ========================================================================

    /// Payment collaborator callback.
    ///
    /// SUCCESS marks the attempt PAID and confirms a PENDING booking; repeated
    /// success callbacks change nothing. A first success for a booking that is
    /// no longer PENDING (cancelled, rescheduled, or paid by another attempt)
    /// is refunded through the collaborator at once. FAILURE marks the attempt FAILED and
    /// leaves the booking PENDING for [`retry_payment`](Self::retry_payment).
    ///
    /// # Errors
    ///
    /// `PaymentNotFound`, `ExternalCollaborator` if a stray capture could not
    /// be returned (the attempt then stays PAID), or a store error.
    pub async fn on_payment_result(
        &self,
        reference: &PaymentReference,
        outcome: PaymentOutcome,
    ) -> Result<Booking> {
        let store = self.store();
        let payment = store.find_payment(reference).await?;
        let now = self.engine.env().clock.now();

        match outcome {
            PaymentOutcome::Success => {
                let mut captured = None;
                if matches!(payment.status, PaymentStatus::Initiated | PaymentStatus::Failed) {
                    match store
                        .update_payment_status(reference, payment.status, PaymentStatus::Paid, now)
                        .await
                    {
                        Ok(paid) => captured = Some(paid),
                        // Someone else settled it first.
                        Err(ReservationError::ConcurrencyConflict { .. }) => {}
                        Err(error) => return Err(error),
                    }
                }

                let booking = store.load_booking(payment.booking_id).await?;
                if let Some(paid) = captured.filter(|_| booking.status != BookingStatus::Pending) {
                    self.return_stray_capture(&booking, &paid).await?;
                    return Ok(booking);
                }
                if booking.status != BookingStatus::Pending {
                    tracing::debug!(
                        booking_code = %booking.booking_code,
                        reference = %reference,
                        status = %booking.status,
                        "Payment success for a settled booking; nothing to do"
                    );
                    return Ok(booking);
                }

                let confirm = BookingAction::Confirm {
                    actor: Actor::system(),
                    notes: Some(format!("payment {reference} captured")),
                };
                match self.apply(booking.id, confirm).await {
                    Err(ReservationError::InvalidTransition {
                        status: BookingStatus::Confirmed,
                        ..
                    }) => store.load_booking(booking.id).await,
                    other => other,
                }
            }
            PaymentOutcome::Failure => {
                if payment.status == PaymentStatus::Initiated {
                    match store
                        .update_payment_status(
                            reference,
                            PaymentStatus::Initiated,
                            PaymentStatus::Failed,
                            now,
                        )
                        .await
                    {
                        Ok(_) | Err(ReservationError::ConcurrencyConflict { .. }) => {}
                        Err(error) => return Err(error),
                    }
                }
                let booking = store.load_booking(payment.booking_id).await?;
                tracing::warn!(
                    booking_code = %booking.booking_code,
                    reference = %reference,
                    "Payment failed; booking stays PENDING"
                );
                Ok(booking)
            }
        }
    }

    /// Gives back money captured after the booking stopped waiting for it,
    /// e.g. a late success for a booking already cancelled or confirmed by
    /// another attempt. The attempt ends REFUNDED.
    async fn return_stray_capture(&self, booking: &Booking, payment: &Payment) -> Result<()> {
        let env = self.engine.env();
        let transaction_id = match env.payments.refund(&payment.reference, payment.amount).await {
            Ok(transaction_id) => transaction_id,
            Err(error) => {
                tracing::error!(
                    booking_code = %booking.booking_code,
                    reference = %payment.reference,
                    status = %booking.status,
                    amount = %payment.amount,
                    error = %error,
                    "Captured payment for a booking that no longer takes it; return failed"
                );
                return Err(error);
            }
        };

        env.store
            .update_payment_status(
                &payment.reference,
                PaymentStatus::Paid,
                PaymentStatus::Refunded,
                env.clock.now(),
            )
            .await?;
        tracing::warn!(
            booking_code = %booking.booking_code,
            reference = %payment.reference,
            status = %booking.status,
            amount = %payment.amount,
            transaction_id = %transaction_id,
            "Payment captured after the booking moved on; returned in full"
        );
        Ok(())
    }

    /// Starts a new payment attempt for a PENDING booking.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless PENDING, `PaymentInitiationFailed` if the
    /// collaborator fails again.
    pub async fn retry_payment(&self, booking_id: BookingId) -> Result<Payment> {
        let booking = self.store().load_booking(booking_id).await?;
        if booking.status != BookingStatus::Pending {
            return Err(ReservationError::InvalidTransition {
                booking_id,
                status: booking.status,
                action: "retry payment",
            });
        }
        self.engine.env().initiate_payment(&booking).await
    }

    /// Payment attempts for a booking, oldest first.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` or `Persistence`.
    pub async fn payments(&self, booking_id: BookingId) -> Result<Vec<Payment>> {
        self.store().load_booking(booking_id).await?;
        self.store().payments_for(booking_id).await
    }

    // ========================================================================
    // Rescheduling
    // ========================================================================

    /// Moves a PENDING booking to another sailing.
    ///
    /// The new sailing is booked first; the old booking then becomes
    /// RESCHEDULED and releases its capacity in one unit. If that second step
    /// fails, the new booking is cancelled again by the system, so a move is
    /// never partial. Payment is initiated for the new booking.
    ///
    /// # Errors
    ///
    /// - `InvalidTransition` unless the booking is PENDING
    /// - `Validation` when moving to the same sailing
    /// - every [`ReservationEngine::book`] rejection for the new sailing
    /// - `PaymentInitiationFailed`: the move is complete, the new booking
    ///   awaits payment
    pub async fn reschedule(
        &self,
        booking_id: BookingId,
        schedule_id: ScheduleId,
        date: NaiveDate,
        actor: Actor,
    ) -> Result<BookingReceipt> {
        let original = self.store().load_booking(booking_id).await?;
        if original.status != BookingStatus::Pending {
            return Err(ReservationError::InvalidTransition {
                booking_id,
                status: original.status,
                action: "be rescheduled",
            });
        }
        if original.ledger_key() == LedgerKey::new(schedule_id, date) {
            return Err(ReservationError::Validation(format!(
                "booking {} is already on sailing {}",
                original.booking_code,
                original.ledger_key()
            )));
        }

        let replacement = self
            .engine
            .place(&original.rebook_request(schedule_id, date), actor)
            .await?;

        let moved = self
            .apply(
                original.id,
                BookingAction::Reschedule {
                    actor,
                    replacement_code: replacement.booking_code.clone(),
                },
            )
            .await;
        if let Err(error) = moved {
            self.undo_replacement(&original, &replacement, &error).await;
            return Err(error);
        }

        tracing::info!(
            from = %original.booking_code,
            to = %replacement.booking_code,
            ledger = %replacement.ledger_key(),
            "Booking rescheduled"
        );
        let payment = self.engine.env().initiate_payment(&replacement).await?;
        Ok(BookingReceipt {
            booking: replacement,
            payment,
        })
    }

    async fn undo_replacement(&self, original: &Booking, replacement: &Booking, cause: &ReservationError) {
        let compensation = BookingAction::Cancel {
            actor: Actor::system(),
            reason: format!("reschedule of {} failed", original.booking_code),
            policy: CancellationPolicy::AdminOverride,
        };
        match self.apply(replacement.id, compensation).await {
            Ok(_) => tracing::warn!(
                booking_code = %original.booking_code,
                replacement = %replacement.booking_code,
                cause = %cause,
                "Reschedule rolled back"
            ),
            Err(error) => tracing::error!(
                booking_code = %original.booking_code,
                replacement = %replacement.booking_code,
                cause = %cause,
                error = %error,
                "Reschedule rollback failed; replacement booking still holds capacity"
            ),
        }
    }

    // ========================================================================
    // Boarding
    // ========================================================================

    /// Boards one passenger: the ticket must be ACTIVE, its booking
    /// CONFIRMED, and the sailing today.
    ///
    /// # Errors
    ///
    /// `TicketNotFound`, `TicketNotBoardable` or a store error.
    pub async fn check_in_ticket(&self, ticket_code: &str, actor: Actor) -> Result<Booking> {
        let store = self.store();
        let booking = store.find_booking_by_ticket(ticket_code).await?;
        let not_boardable = |reason: String| ReservationError::TicketNotBoardable {
            ticket_code: ticket_code.to_string(),
            reason,
        };

        if booking.status != BookingStatus::Confirmed {
            return Err(not_boardable(format!("booking is {}", booking.status)));
        }
        let ticket = booking
            .tickets
            .iter()
            .find(|t| t.ticket_code == ticket_code)
            .ok_or_else(|| ReservationError::TicketNotFound(ticket_code.to_string()))?;
        if ticket.status != TicketStatus::Active {
            return Err(not_boardable(format!("ticket is {}", ticket.status.as_str())));
        }
        let now = self.engine.env().clock.now();
        if booking.booking_date != now.date_naive() {
            return Err(not_boardable(format!("sails on {}", booking.booking_date)));
        }

        store
            .mark_ticket_boarded(ticket_code, now)
            .await
            .map_err(|error| match error {
                ReservationError::ConcurrencyConflict { .. } => {
                    not_boardable("already boarded".to_string())
                }
                other => other,
            })?;
        tracing::info!(
            ticket_code,
            booking_code = %booking.booking_code,
            actor = actor.kind.as_str(),
            "Passenger boarded"
        );
        store.load_booking(booking.id).await
    }

    /// Completes every CONFIRMED booking on a departed sailing and marks its
    /// ledger row DEPARTED.
    ///
    /// # Errors
    ///
    /// `Validation` for a future sailing, `ScheduleNotFound`, or a store
    /// error.
    pub async fn complete_sailing(
        &self,
        schedule_id: ScheduleId,
        date: NaiveDate,
        actor: Actor,
    ) -> Result<SailingCompletion> {
        let today = self.engine.env().clock.now().date_naive();
        if date > today {
            return Err(ReservationError::Validation(format!(
                "sailing on {date} has not departed yet"
            )));
        }
        let store = self.store();
        store.load_schedule(schedule_id).await?;

        let key = LedgerKey::new(schedule_id, date);
        let mut completed = Vec::new();
        for booking in store.bookings_for_sailing(key, BookingStatus::Confirmed).await? {
            match self.complete(booking.id, actor).await {
                Ok(done) => completed.push(done.id),
                // Cancelled or refunded since the query.
                Err(ReservationError::InvalidTransition { .. }) => {}
                Err(error) => return Err(error),
            }
        }

        let ledger = self
            .engine
            .set_ledger_status(
                key,
                LedgerStatusUpdate {
                    status: LedgerStatus::Departed,
                    reason: Some("departed".to_string()),
                    expires_at: None,
                },
                actor,
            )
            .await?;
        tracing::info!(ledger = %key, completed = completed.len(), "Sailing completed");
        Ok(SailingCompletion { completed, ledger })
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Load a booking by id.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` or `Persistence`.
    pub async fn booking(&self, booking_id: BookingId) -> Result<Booking> {
        self.store().load_booking(booking_id).await
    }

    /// Load a booking by its shareable code.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` or `Persistence`.
    pub async fn booking_by_code(&self, booking_code: &str) -> Result<Booking> {
        self.store().find_booking_by_code(booking_code).await
    }

    /// The booking's audit trail in append order; the first entry records
    /// its creation.
    ///
    /// # Errors
    ///
    /// `BookingNotFound` or `Persistence`.
    pub async fn booking_logs(&self, booking_id: BookingId) -> Result<Vec<BookingLogEntry>> {
        self.store().load_booking(booking_id).await?;
        self.store().booking_logs(booking_id).await
    }
}
