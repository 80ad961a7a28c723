//! Shared wiring for the runtime integration tests.

#![allow(dead_code, clippy::unwrap_used)]

use chrono::{DateTime, NaiveDate, Utc};
use ferry_core::{
    Booking, CategoryCounts, Clock, LedgerKey, LedgerRepository, PaymentOutcome, ScheduleSnapshot,
};
use ferry_runtime::{
    BookingLifecycle, BookingReceipt, RefundDesk, ReservationEngine, ReservationEnvironment,
    RetryPolicy, StatusSweeper,
};
use ferry_testing::{FixedClock, InMemoryReservationStore, MockPaymentCollaborator};
use std::sync::Arc;
use std::time::Duration;

pub use ferry_testing::fixtures::{booking_request, date, ScheduleBuilder};

/// Everything a test drives, wired to one in-memory store.
pub struct Harness {
    pub store: Arc<InMemoryReservationStore>,
    pub payments: MockPaymentCollaborator,
    pub clock: FixedClock,
    pub engine: ReservationEngine<InMemoryReservationStore>,
    pub lifecycle: BookingLifecycle<InMemoryReservationStore>,
    pub refunds: RefundDesk<InMemoryReservationStore>,
    pub sweeper: StatusSweeper<InMemoryReservationStore>,
}

/// Short, generous backoff so contended tests finish quickly.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(50)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(10))
        .build()
}

impl Harness {
    /// A harness whose clock reads 09:00 UTC on `today`.
    pub fn on(today: NaiveDate) -> Self {
        Self::build(InMemoryReservationStore::new(), today, fast_retry())
    }

    pub fn build(store: InMemoryReservationStore, today: NaiveDate, lock_retry: RetryPolicy) -> Self {
        init_tracing();
        let store = Arc::new(store);
        let payments = MockPaymentCollaborator::new();
        let clock = FixedClock::on(today);
        let env = ReservationEnvironment::new(
            Arc::clone(&store),
            Arc::new(clock.clone()),
            Arc::new(payments.clone()),
        )
        .with_lock_retry(lock_retry);

        let engine = ReservationEngine::new(env.clone());
        Self {
            store,
            payments,
            clock,
            lifecycle: BookingLifecycle::new(engine.clone()),
            refunds: RefundDesk::new(env.clone()),
            sweeper: StatusSweeper::new(env),
            engine,
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub async fn register(&self, snapshot: ScheduleSnapshot) -> ScheduleSnapshot {
        self.engine.register_schedule(&snapshot).await.unwrap();
        snapshot
    }

    /// Reserved counts on an existing ledger row.
    pub async fn reserved(&self, key: LedgerKey) -> CategoryCounts {
        self.store.find_ledger(key).await.unwrap().unwrap().counts
    }

    /// Books and reports payment success, leaving the booking CONFIRMED.
    pub async fn confirmed(&self, receipt: BookingReceipt) -> Booking {
        self.lifecycle
            .on_payment_result(&receipt.payment.reference, PaymentOutcome::Success)
            .await
            .unwrap()
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
