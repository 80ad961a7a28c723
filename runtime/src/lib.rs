//! # Ferry Runtime
//!
//! The imperative shell around `ferry-core`: everything here talks to a
//! [`ReservationStore`](ferry_core::ReservationStore), a clock and the payment
//! collaborator, and nothing here owns business rules.
//!
//! ## Core Components
//!
//! - [`ReservationEngine`]: book a sailing end to end, query availability,
//!   administer ledger rows and schedule status
//! - [`BookingLifecycle`]: confirm, cancel, complete, payment callbacks,
//!   rescheduling, check-in and sailing completion
//! - [`RefundDesk`]: refund requests, approval and settlement
//! - [`StatusSweeper`]: the periodic expiry sweep
//!
//! ## Example
//!
//! ```ignore
//! use ferry_runtime::{ReservationEngine, ReservationEnvironment};
//!
//! let env = ReservationEnvironment::new(store, Arc::new(SystemClock), payments);
//! let engine = ReservationEngine::new(env);
//!
//! let receipt = engine.book(request).await?;
//! println!("booked {}", receipt.booking.booking_code);
//! ```

pub mod engine;
pub mod environment;
pub mod lifecycle;
pub mod refunds;
pub mod sweeper;

/// Bounded retry with exponential backoff
pub mod retry;

/// Metric names and recording helpers
pub mod metrics;

pub use engine::{BookingReceipt, ReservationEngine};
pub use environment::ReservationEnvironment;
pub use lifecycle::{BookingLifecycle, SailingCompletion};
pub use refunds::RefundDesk;
pub use retry::RetryPolicy;
pub use sweeper::{StatusSweeper, SweepReport};
