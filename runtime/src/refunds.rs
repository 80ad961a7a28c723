//! Refund Desk.
//!
//! ```text
//! refund   PENDING ──approve──▶ APPROVED ──collaborator──▶ COMPLETED
//!          PENDING ──reject / cancel──▶ REJECTED / CANCELLED
//! booking  CONFIRMED|COMPLETED ──request──▶ REFUND_PENDING
//!          REFUND_PENDING ──approve──▶ REFUNDED (capacity released)
//!          REFUND_PENDING ──reject / cancel──▶ CONFIRMED (nothing re-reserved)
//! ```
//!
//! The refund row and the booking transition are always written together.
//! Capacity stays reserved while a refund is pending; it is released only on
//! approval. The money moves after approval commits; if the collaborator
//! fails, the refund stays APPROVED and
//! [`retry_refund_settlement`](RefundDesk::retry_refund_settlement) finishes
//! it.

use crate::environment::ReservationEnvironment;
use crate::metrics;
use crate::retry::retry_on_contention;
use ferry_core::{
    Actor, BookingAction, BookingId, BookingRepository, BookingStatus, BookingTransition, Money,
    PaymentStatus, Refund, RefundId, RefundRepository, RefundStep, ReservationError,
    ReservationStore, Result,
};

/// Requests, approves, rejects and settles refunds.
pub struct RefundDesk<S> {
    env: ReservationEnvironment<S>,
}

impl<S> Clone for RefundDesk<S> {
    fn clone(&self) -> Self {
        Self {
            env: self.env.clone(),
        }
    }
}

impl<S: ReservationStore> RefundDesk<S> {
    /// Creates a new `RefundDesk`
    #[must_use]
    pub const fn new(env: ReservationEnvironment<S>) -> Self {
        Self { env }
    }

    /// Opens a PENDING refund against the booking's captured payment and
    /// moves the booking to REFUND_PENDING.
    ///
    /// # Errors
    ///
    /// - `RefundAlreadyActive` if a refund is already in flight
    /// - `InvalidTransition` unless the booking is CONFIRMED or COMPLETED
    /// - `Validation` for a zero amount, an amount above the total, or a
    ///   blank reason
    /// - `PaymentNotFound` if no payment was captured
    pub async fn request_refund(
        &self,
        booking_id: BookingId,
        amount: Money,
        reason: &str,
        refund_method: &str,
        actor: Actor,
    ) -> Result<Refund> {
        let store = &self.env.store;
        let booking_env = self.env.booking_env();
        let now = self.env.clock.now();

        let refund = retry_on_contention(self.env.lock_retry, || {
            let booking_env = &booking_env;
            async move {
                let booking = store.load_booking(booking_id).await?;
                if let Some(active) = store.active_refund(booking_id).await? {
                    return Err(ReservationError::RefundAlreadyActive {
                        booking_id,
                        refund_id: active.id,
                    });
                }
                let captured = store
                    .payments_for(booking_id)
                    .await?
                    .into_iter()
                    .find(|p| p.status == PaymentStatus::Paid);
                let Some(payment) = captured else {
                    return Err(match booking.status {
                        BookingStatus::Confirmed | BookingStatus::Completed => {
                            ReservationError::PaymentNotFound(format!(
                                "no captured payment for booking {}",
                                booking.booking_code
                            ))
                        }
                        status => ReservationError::InvalidTransition {
                            booking_id,
                            status,
                            action: "request a refund",
                        },
                    });
                };

                let refund = Refund::request(&booking, payment.id, amount, reason, refund_method, now)?;
                let (_, transition) = BookingTransition::plan(
                    &booking,
                    BookingAction::RequestRefund {
                        actor,
                        refund_id: refund.id,
                    },
                    booking_env,
                )?;
                store.create_refund(&refund, &transition).await?;
                Ok(refund)
            }
        })
        .await?;

        metrics::transition("request_refund", BookingStatus::RefundPending);
        tracing::info!(
            refund_id = %refund.id,
            booking_id = %booking_id,
            amount = %refund.amount,
            "Refund requested"
        );
        Ok(refund)
    }

    /// Approves a PENDING refund: the booking becomes REFUNDED, its tickets
    /// are voided and its capacity released, all in one unit. Then the
    /// payment collaborator returns the money and the refund COMPLETES.
    ///
    /// # Errors
    ///
    /// - `InvalidRefundTransition` unless the refund is PENDING
    /// - `ExternalCollaborator` if the money could not be returned; the
    ///   refund stays APPROVED
    pub async fn approve_refund(&self, refund_id: RefundId, actor: Actor) -> Result<Refund> {
        let store = &self.env.store;
        let booking_env = self.env.booking_env();
        let now = self.env.clock.now();

        let approved = retry_on_contention(self.env.lock_retry, || {
            let booking_env = &booking_env;
            async move {
                let mut refund = store.find_refund(refund_id).await?;
                let booking = store.load_booking(refund.booking_id).await?;
                let previous = refund.advance(RefundStep::Approve, now)?;
                let (_, transition) = BookingTransition::plan(
                    &booking,
                    BookingAction::SettleRefund { actor, refund_id },
                    booking_env,
                )?;
                store.update_refund(&refund, previous, Some(&transition)).await?;
                Ok(refund)
            }
        })
        .await?;

        metrics::transition("settle_refund", BookingStatus::Refunded);
        tracing::info!(
            refund_id = %refund_id,
            booking_id = %approved.booking_id,
            actor = actor.kind.as_str(),
            "Refund approved; capacity released"
        );
        self.settle(approved).await
    }

    /// Declines a PENDING refund; the booking is CONFIRMED again.
    ///
    /// # Errors
    ///
    /// `InvalidRefundTransition` unless the refund is PENDING.
    pub async fn reject_refund(&self, refund_id: RefundId, actor: Actor, notes: &str) -> Result<Refund> {
        self.withdraw(refund_id, RefundStep::Reject, actor, notes).await
    }

    /// Withdraws a PENDING refund at the requester's wish; the booking is
    /// CONFIRMED again.
    ///
    /// # Errors
    ///
    /// `InvalidRefundTransition` unless the refund is PENDING.
    pub async fn cancel_refund(&self, refund_id: RefundId, actor: Actor, notes: &str) -> Result<Refund> {
        self.withdraw(refund_id, RefundStep::Cancel, actor, notes).await
    }

    /// Finishes an APPROVED refund whose collaborator call failed.
    ///
    /// # Errors
    ///
    /// `InvalidRefundTransition` unless APPROVED, `ExternalCollaborator` if
    /// the collaborator fails again.
    pub async fn retry_refund_settlement(&self, refund_id: RefundId) -> Result<Refund> {
        let refund = self.env.store.find_refund(refund_id).await?;
        refund.next_status(RefundStep::Complete)?;
        self.settle(refund).await
    }

    /// Load a refund.
    ///
    /// # Errors
    ///
    /// `RefundNotFound` or `Persistence`.
    pub async fn refund(&self, refund_id: RefundId) -> Result<Refund> {
        self.env.store.find_refund(refund_id).await
    }

    async fn withdraw(&self, refund_id: RefundId, step: RefundStep, actor: Actor, notes: &str) -> Result<Refund> {
        let store = &self.env.store;
        let booking_env = self.env.booking_env();
        let now = self.env.clock.now();

        let refund = retry_on_contention(self.env.lock_retry, || {
            let booking_env = &booking_env;
            async move {
                let mut refund = store.find_refund(refund_id).await?;
                let booking = store.load_booking(refund.booking_id).await?;
                let previous = refund.advance(step, now)?;
                let (_, transition) = BookingTransition::plan(
                    &booking,
                    BookingAction::WithdrawRefund {
                        actor,
                        refund_id,
                        notes: format!("refund {refund_id} {}: {notes}", refund.status),
                    },
                    booking_env,
                )?;
                store.update_refund(&refund, previous, Some(&transition)).await?;
                Ok(refund)
            }
        })
        .await?;

        metrics::transition("withdraw_refund", BookingStatus::Confirmed);
        tracing::info!(
            refund_id = %refund_id,
            status = %refund.status,
            booking_id = %refund.booking_id,
            "Refund closed; booking confirmed again"
        );
        Ok(refund)
    }

    /// Returns the money for an APPROVED refund and completes it.
    async fn settle(&self, refund: Refund) -> Result<Refund> {
        let store = &self.env.store;
        let payment = store
            .payments_for(refund.booking_id)
            .await?
            .into_iter()
            .find(|p| p.id == refund.payment_id)
            .ok_or_else(|| ReservationError::PaymentNotFound(refund.payment_id.to_string()))?;

        let transaction_id = match self.env.payments.refund(&payment.reference, refund.amount).await {
            Ok(transaction_id) => transaction_id,
            Err(error) => {
                tracing::warn!(
                    refund_id = %refund.id,
                    reference = %payment.reference,
                    error = %error,
                    "Refund settlement failed; refund stays APPROVED"
                );
                return Err(error);
            }
        };

        let now = self.env.clock.now();
        let mut completed = refund;
        let previous = completed.advance(RefundStep::Complete, now)?;
        completed.transaction_id = Some(transaction_id);
        store.update_refund(&completed, previous, None).await?;

        if completed.amount == payment.amount && payment.status == PaymentStatus::Paid {
            match store
                .update_payment_status(&payment.reference, PaymentStatus::Paid, PaymentStatus::Refunded, now)
                .await
            {
                Ok(_) | Err(ReservationError::ConcurrencyConflict { .. }) => {}
                Err(error) => return Err(error),
            }
        }

        tracing::info!(
            refund_id = %completed.id,
            transaction_id = completed.transaction_id.as_deref().unwrap_or_default(),
            amount = %completed.amount,
            "Refund completed"
        );
        Ok(completed)
    }
}
