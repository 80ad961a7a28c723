//! Property: whatever sequence of bookings and cancellations runs against a
//! sailing, its ledger equals the sum of the bookings still holding capacity
//! and never exceeds the ferry.

#![allow(clippy::unwrap_used, clippy::panic)]

mod common;

use common::{booking_request, date, Harness, ScheduleBuilder};
use ferry_core::{
    Actor, BookingId, CancellationPolicy, Category, CategoryCounts, ReservationError, VehicleType,
};
use proptest::prelude::*;

#[derive(Clone, Debug)]
enum Step {
    Book { passengers: usize, vehicles: Vec<VehicleType> },
    Cancel(usize),
}

fn vehicle_type() -> impl Strategy<Value = VehicleType> {
    prop_oneof![
        Just(VehicleType::Motorcycle),
        Just(VehicleType::Car),
        Just(VehicleType::Bus),
        Just(VehicleType::Truck),
    ]
}

fn step() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (1usize..5, prop::collection::vec(vehicle_type(), 0..3))
            .prop_map(|(passengers, vehicles)| Step::Book { passengers, vehicles }),
        1 => (0usize..16).prop_map(Step::Cancel),
    ]
}

fn capacity() -> CategoryCounts {
    CategoryCounts {
        passengers: 12,
        motorcycles: 3,
        cars: 3,
        buses: 1,
        trucks: 1,
    }
}

fn add(total: &mut CategoryCounts, delta: &CategoryCounts) {
    for category in Category::ALL {
        *total.get_mut(category) += delta.get(category);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn ledger_matches_live_bookings(steps in prop::collection::vec(step(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let (reserved, expected) = runtime.block_on(async {
            let h = Harness::on(date(2025, 1, 1));
            let schedule = h.register(ScheduleBuilder::new().capacity(capacity()).build()).await;
            let id = schedule.schedule.id;
            let sailing = date(2025, 1, 10);
            let mut live: Vec<(BookingId, CategoryCounts)> = Vec::new();

            for step in steps {
                match step {
                    Step::Book { passengers, vehicles } => {
                        match h.engine.book(booking_request(id, sailing, passengers, &vehicles)).await {
                            Ok(receipt) => {
                                live.push((receipt.booking.id, receipt.booking.capacity_delta()));
                            }
                            Err(ReservationError::CapacityExceeded { .. }) => {}
                            Err(other) => panic!("unexpected rejection: {other}"),
                        }
                    }
                    Step::Cancel(index) if !live.is_empty() => {
                        let (booking_id, _) = live.remove(index % live.len());
                        h.lifecycle
                            .cancel(booking_id, "property", Actor::system(), CancellationPolicy::AdminOverride)
                            .await
                            .unwrap();
                    }
                    Step::Cancel(_) => {}
                }
            }

            let mut expected = CategoryCounts::ZERO;
            for (_, delta) in &live {
                add(&mut expected, delta);
            }
            let reserved = h
                .engine
                .availability(id, sailing)
                .await
                .unwrap()
                .reserved;
            (reserved, expected)
        });

        prop_assert_eq!(reserved, expected);
        for category in Category::ALL {
            prop_assert!(reserved.get(category) <= capacity().get(category));
        }
    }
}
