//! # Ferry Testing
//!
//! Test doubles for the ferry reservation core:
//!
//! - [`FixedClock`]: time that only moves when the test moves it
//! - [`InMemoryReservationStore`]: per-row locked store with fault injection
//! - [`MockPaymentCollaborator`]: scripted payment service
//! - [`fixtures`]: schedules and booking requests
//! - [`ReducerTest`]: Given-When-Then harness for reducers
//!
//! ```ignore
//! use ferry_testing::{fixtures, InMemoryReservationStore};
//!
//! #[tokio::test]
//! async fn test_booking_flow() {
//!     let store = InMemoryReservationStore::new();
//!     store.store_schedule(&fixtures::ScheduleBuilder::new().build()).await.unwrap();
//!     // ... drive a ReservationEngine against it
//! }
//! ```

pub mod clock;
pub mod fixtures;
pub mod memory;
pub mod payments;

pub use clock::{FixedClock, test_clock};
pub use memory::InMemoryReservationStore;
pub use payments::MockPaymentCollaborator;
pub use reducer_test::ReducerTest;
