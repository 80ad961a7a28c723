//! Mock payment collaborator for tests.

use ferry_core::{
    Booking, BookingId, Money, PaymentCollaborator, PaymentFuture, PaymentReference,
    ReservationError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
struct Script {
    failing_initiations: AtomicUsize,
    failing_refunds: AtomicUsize,
    initiated: Mutex<Vec<(BookingId, PaymentReference)>>,
    refunded: Mutex<Vec<(PaymentReference, Money)>>,
}

fn take_failure(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Payment service that succeeds unless told to fail, and records calls.
///
/// References look like `mock_pay_<uuid>`, refund transaction ids like
/// `mock_refund_<uuid>`.
#[derive(Clone, Debug, Default)]
pub struct MockPaymentCollaborator {
    script: Arc<Script>,
}

impl MockPaymentCollaborator {
    /// Creates a new mock payment collaborator
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an Arc-wrapped instance for sharing
    #[must_use]
    pub fn shared() -> Arc<dyn PaymentCollaborator> {
        Arc::new(Self::new())
    }

    /// The next `count` initiations fail.
    pub fn fail_next_initiations(&self, count: usize) {
        self.script.failing_initiations.store(count, Ordering::SeqCst);
    }

    /// The next `count` refunds fail.
    pub fn fail_next_refunds(&self, count: usize) {
        self.script.failing_refunds.store(count, Ordering::SeqCst);
    }

    /// Successful initiations so far.
    #[must_use]
    pub fn initiated(&self) -> Vec<(BookingId, PaymentReference)> {
        self.script
            .initiated
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    /// Successful refunds so far.
    #[must_use]
    pub fn refunded(&self) -> Vec<(PaymentReference, Money)> {
        self.script
            .refunded
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl PaymentCollaborator for MockPaymentCollaborator {
    fn initiate(&self, booking: &Booking) -> PaymentFuture<PaymentReference> {
        let script = Arc::clone(&self.script);
        let booking_id = booking.id;
        let amount = booking.total_amount;
        Box::pin(async move {
            if take_failure(&script.failing_initiations) {
                return Err(ReservationError::ExternalCollaborator(
                    "payment service unavailable".to_string(),
                ));
            }

            let reference = PaymentReference(format!("mock_pay_{}", uuid::Uuid::new_v4()));
            tracing::info!(
                booking_id = %booking_id,
                amount = amount.cents(),
                reference = %reference,
                "Mock payment initiated"
            );
            script
                .initiated
                .lock()
                .map_err(|_| ReservationError::ExternalCollaborator("mock poisoned".to_string()))?
                .push((booking_id, reference.clone()));
            Ok(reference)
        })
    }

    fn refund(&self, reference: &PaymentReference, amount: Money) -> PaymentFuture<String> {
        let script = Arc::clone(&self.script);
        let reference = reference.clone();
        Box::pin(async move {
            if take_failure(&script.failing_refunds) {
                return Err(ReservationError::ExternalCollaborator(
                    "refund declined by payment service".to_string(),
                ));
            }

            let transaction_id = format!("mock_refund_{}", uuid::Uuid::new_v4());
            tracing::info!(
                reference = %reference,
                amount = amount.cents(),
                transaction_id = %transaction_id,
                "Mock refund processed"
            );
            script
                .refunded
                .lock()
                .map_err(|_| ReservationError::ExternalCollaborator("mock poisoned".to_string()))?
                .push((reference, amount));
            Ok(transaction_id)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fixtures::{booking_request, date};
    use ferry_core::ScheduleId;

    fn booking() -> Booking {
        let request = booking_request(ScheduleId::new(), date(2025, 1, 6), 1, &[]);
        Booking::pending(
            &request,
            "FBMOCKMOCK".to_string(),
            Money::from_cents(5_000),
            chrono::Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_mock_initiation_success() {
        let payments = MockPaymentCollaborator::new();
        let booking = booking();

        let reference = payments.initiate(&booking).await.unwrap();

        assert!(reference.0.starts_with("mock_pay_"));
        assert_eq!(payments.initiated(), vec![(booking.id, reference)]);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed() {
        let payments = MockPaymentCollaborator::new();
        payments.fail_next_initiations(1);
        let booking = booking();

        assert!(matches!(
            payments.initiate(&booking).await,
            Err(ReservationError::ExternalCollaborator(_))
        ));
        assert!(payments.initiate(&booking).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_refund() {
        let payments = MockPaymentCollaborator::new();
        let reference = PaymentReference("mock_pay_1".to_string());

        let transaction_id = payments
            .refund(&reference, Money::from_cents(2_000))
            .await
            .unwrap();

        assert!(transaction_id.starts_with("mock_refund_"));
        assert_eq!(payments.refunded(), vec![(reference, Money::from_cents(2_000))]);
    }
}
