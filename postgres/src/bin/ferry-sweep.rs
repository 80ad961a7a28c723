//! One-shot status expiry sweep against the configured database.
//!
//! Run it from cron (or any scheduler) as often as expiry precision requires:
//!
//! ```bash
//! DATABASE_URL=postgres://... RUST_LOG=info ferry-sweep
//! ```

use anyhow::Context;
use chrono::Utc;
use ferry_core::{
    Booking, Money, PaymentCollaborator, PaymentFuture, PaymentReference, ReservationError,
    SystemClock,
};
use ferry_postgres::{Config, PostgresReservationStore};
use ferry_runtime::{ReservationEnvironment, StatusSweeper};
use std::sync::Arc;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// The sweep never moves money.
struct NoPayments;

impl PaymentCollaborator for NoPayments {
    fn initiate(&self, booking: &Booking) -> PaymentFuture<PaymentReference> {
        let code = booking.booking_code.clone();
        Box::pin(async move {
            Err(ReservationError::ExternalCollaborator(format!(
                "payments are not available to the sweeper (booking {code})"
            )))
        })
    }

    fn refund(&self, reference: &PaymentReference, _amount: Money) -> PaymentFuture<String> {
        let reference = reference.clone();
        Box::pin(async move {
            Err(ReservationError::ExternalCollaborator(format!(
                "payments are not available to the sweeper (payment {reference})"
            )))
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info,ferry=debug,sqlx=warn".into()))
        .with(fmt::layer().with_target(false))
        .init();

    let config = Config::from_env();
    tracing::info!(database = %config.redacted_url(), "Connecting");

    let store = PostgresReservationStore::connect(&config)
        .await
        .context("connecting to the reservation database")?;
    store.migrate().await.context("applying migrations")?;
    ferry_runtime::metrics::register_metrics();

    let env = ReservationEnvironment::new(Arc::new(store), Arc::new(SystemClock), Arc::new(NoPayments))
        .with_lock_retry(config.lock_retry_policy());
    let report = StatusSweeper::new(env)
        .sweep_expired_statuses(Utc::now())
        .await
        .context("sweeping expired statuses")?;

    if report.is_empty() {
        tracing::info!("Nothing expired");
    } else {
        tracing::info!(
            schedules = report.schedules_reactivated.len(),
            ledgers = report.ledgers_reactivated,
            weather_holds = report.weather_holds_lifted.len(),
            "Sweep complete"
        );
    }
    Ok(())
}
