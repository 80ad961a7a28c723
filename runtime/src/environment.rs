//! Injected dependencies shared by the engine, lifecycle, refund desk and
//! sweeper.

use crate::retry::RetryPolicy;
use ferry_core::{
    Booking, BookingEnvironment, BookingRepository, Clock, PaymentCollaborator, Payment, PaymentId,
    PaymentStatus, ReservationError, ReservationStore, Result,
};
use std::sync::Arc;

/// Store, clock, payment collaborator and contention policy.
pub struct ReservationEnvironment<S> {
    /// Persistence
    pub store: Arc<S>,
    /// Time source; never read the wall clock directly
    pub clock: Arc<dyn Clock>,
    /// External payment service
    pub payments: Arc<dyn PaymentCollaborator>,
    /// How often a contended ledger row operation is retried
    pub lock_retry: RetryPolicy,
}

impl<S> Clone for ReservationEnvironment<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            payments: Arc::clone(&self.payments),
            lock_retry: self.lock_retry,
        }
    }
}

impl<S: ReservationStore> ReservationEnvironment<S> {
    /// Creates a new `ReservationEnvironment` with the default retry policy
    #[must_use]
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, payments: Arc<dyn PaymentCollaborator>) -> Self {
        Self {
            store,
            clock,
            payments,
            lock_retry: RetryPolicy::default(),
        }
    }

    /// Replace the contention retry policy
    #[must_use]
    pub fn with_lock_retry(mut self, policy: RetryPolicy) -> Self {
        self.lock_retry = policy;
        self
    }

    /// The reducer's view of this environment.
    #[must_use]
    pub fn booking_env(&self) -> BookingEnvironment {
        BookingEnvironment::new(Arc::clone(&self.clock))
    }

    /// Asks the collaborator for a payment reference and appends an
    /// INITIATED attempt to the booking's history.
    ///
    /// # Errors
    ///
    /// [`ReservationError::PaymentInitiationFailed`] if the collaborator
    /// fails; the booking is not touched.
    pub(crate) async fn initiate_payment(&self, booking: &Booking) -> Result<Payment> {
        let reference = self.payments.initiate(booking).await.map_err(|error| {
            tracing::warn!(
                booking_code = %booking.booking_code,
                error = %error,
                "Payment initiation failed; booking stays PENDING"
            );
            ReservationError::PaymentInitiationFailed {
                booking_id: booking.id,
                booking_code: booking.booking_code.clone(),
                reason: error.to_string(),
            }
        })?;

        let payment = Payment {
            id: PaymentId::new(),
            booking_id: booking.id,
            reference,
            amount: booking.total_amount,
            status: PaymentStatus::Initiated,
            created_at: self.clock.now(),
            settled_at: None,
        };
        self.store.record_payment(&payment).await?;

        tracing::info!(
            booking_code = %booking.booking_code,
            reference = %payment.reference,
            amount = %payment.amount,
            "Payment initiated"
        );
        Ok(payment)
    }
}
