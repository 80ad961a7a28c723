//! `PostgreSQL` storage for the ferry reservation core.
//!
//! [`PostgresReservationStore`] implements the `ferry-core` repository traits
//! over a `sqlx` pool. Capacity ledger rows are guarded with
//! `SELECT ... FOR UPDATE` under a bounded `lock_timeout`, so two bookings
//! racing for the last seat serialize on the row and the loser sees the
//! winner's counts.
//!
//! # Example
//!
//! ```ignore
//! use ferry_postgres::{Config, PostgresReservationStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresReservationStore::connect(&Config::from_env()).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
mod rows;
pub mod store;

pub use config::Config;
pub use store::PostgresReservationStore;
