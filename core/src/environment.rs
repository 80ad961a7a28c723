//! Injected dependencies: time and the payment collaborator.
//!
//! Everything time-dependent in the core takes its "now" from a [`Clock`],
//! so cancellation cutoffs and expiry sweeps are plain comparisons that tests
//! can pin to a fixed instant.

use crate::booking::{Booking, PaymentReference};
use crate::error::Result;
use crate::types::Money;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Boxed future returned by the payment collaborator.
pub type PaymentFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// The external payment service, reduced to the calls the core makes.
///
/// The collaborator reports payment outcomes asynchronously; they come back
/// in through `BookingLifecycle::on_payment_result`.
pub trait PaymentCollaborator: Send + Sync {
    /// Starts a payment for a PENDING booking.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalCollaborator`](crate::ReservationError::ExternalCollaborator)
    /// if the service refuses or is unreachable.
    fn initiate(&self, booking: &Booking) -> PaymentFuture<PaymentReference>;

    /// Returns `amount` through the original payment; yields the
    /// collaborator's transaction id.
    ///
    /// # Errors
    ///
    /// Returns [`ExternalCollaborator`](crate::ReservationError::ExternalCollaborator)
    /// if the refund is not accepted.
    fn refund(&self, reference: &PaymentReference, amount: Money) -> PaymentFuture<String>;
}
