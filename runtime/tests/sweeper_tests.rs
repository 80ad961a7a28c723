//! Status expiry sweeps.

#![allow(clippy::unwrap_used)]

mod common;

use chrono::{Duration, TimeZone, Utc};
use common::{booking_request, date, Harness, ScheduleBuilder};
use ferry_core::{
    Actor, LedgerKey, LedgerRepository, LedgerStatus, LedgerStatusUpdate, ScheduleRepository,
    ScheduleStatus, ScheduleStatusChange,
};
use ferry_runtime::RetryPolicy;
use ferry_testing::InMemoryReservationStore;

fn operator() -> Actor {
    Actor::operator(uuid::Uuid::new_v4())
}

fn override_to(status: LedgerStatus, reason: &str) -> LedgerStatusUpdate {
    LedgerStatusUpdate {
        status,
        reason: Some(reason.to_string()),
        expires_at: None,
    }
}

async fn status_of(h: &Harness, key: LedgerKey) -> LedgerStatus {
    h.store.find_ledger(key).await.unwrap().unwrap().status
}

#[tokio::test]
async fn test_expired_suspension_reopens_only_schedule_closed_rows() {
    let h = Harness::on(date(2025, 1, 10));
    let schedule = h.register(ScheduleBuilder::new().build()).await;
    let id = schedule.schedule.id;
    h.engine
        .ensure_ledgers(id, date(2025, 1, 12), date(2025, 1, 15))
        .await
        .unwrap();

    let cancelled = LedgerKey::new(id, date(2025, 1, 13));
    let closed_by_hand = LedgerKey::new(id, date(2025, 1, 15));
    h.engine
        .set_ledger_status(cancelled, override_to(LedgerStatus::Cancelled, "engine fault"), operator())
        .await
        .unwrap();
    h.engine
        .set_ledger_status(closed_by_hand, override_to(LedgerStatus::Inactive, "charter"), operator())
        .await
        .unwrap();

    let yesterday = Utc.with_ymd_and_hms(2025, 1, 9, 18, 0, 0).unwrap();
    let cascade = h
        .engine
        .set_schedule_status(id, ScheduleStatus::Inactive, Some("refit".to_string()), Some(yesterday), operator())
        .await
        .unwrap();
    assert_eq!(cascade.ledgers_changed, 2);

    let report = h.sweeper.sweep_expired_statuses(h.now()).await.unwrap();

    assert_eq!(report.schedules_reactivated, vec![id]);
    assert_eq!(report.ledgers_reactivated, 2);
    let snapshot = h.store.load_schedule(id).await.unwrap();
    assert_eq!(snapshot.schedule.status, ScheduleStatus::Active);
    assert_eq!(snapshot.schedule.status_reason, None);
    assert_eq!(snapshot.schedule.status_expires_at, None);

    assert_eq!(status_of(&h, LedgerKey::new(id, date(2025, 1, 12))).await, LedgerStatus::Available);
    assert_eq!(status_of(&h, LedgerKey::new(id, date(2025, 1, 14))).await, LedgerStatus::Available);
    assert_eq!(status_of(&h, cancelled).await, LedgerStatus::Cancelled);
    assert_eq!(status_of(&h, closed_by_hand).await, LedgerStatus::Inactive);

    h.engine
        .book(booking_request(id, date(2025, 1, 12), 1, &[]))
        .await
        .unwrap();

    let again = h.sweeper.sweep_expired_statuses(h.now()).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_unexpired_suspension_is_left_alone() {
    let h = Harness::on(date(2025, 1, 10));
    let schedule = h.register(ScheduleBuilder::new().build()).await;
    let id = schedule.schedule.id;
    h.engine
        .ensure_ledgers(id, date(2025, 1, 11), date(2025, 1, 12))
        .await
        .unwrap();
    h.engine
        .set_schedule_status(
            id,
            ScheduleStatus::Inactive,
            Some("storm season".to_string()),
            Some(h.now() + Duration::days(1)),
            operator(),
        )
        .await
        .unwrap();

    let report = h.sweeper.sweep_expired_statuses(h.now()).await.unwrap();

    assert!(report.is_empty());
    assert_eq!(status_of(&h, LedgerKey::new(id, date(2025, 1, 11))).await, LedgerStatus::Inactive);
}

#[tokio::test]
async fn test_open_ended_suspension_is_never_swept() {
    let h = Harness::on(date(2025, 1, 10));
    let schedule = h
        .register(ScheduleBuilder::new().inactive("retired", None).build())
        .await;

    let report = h
        .sweeper
        .sweep_expired_statuses(h.now() + Duration::days(365))
        .await
        .unwrap();

    assert!(report.schedules_reactivated.is_empty());
    let snapshot = h.store.load_schedule(schedule.schedule.id).await.unwrap();
    assert_eq!(snapshot.schedule.status, ScheduleStatus::Inactive);
}

#[tokio::test]
async fn test_manual_reactivation_reopens_suspended_rows() {
    let h = Harness::on(date(2025, 1, 10));
    let schedule = h.register(ScheduleBuilder::new().build()).await;
    let id = schedule.schedule.id;
    h.engine
        .ensure_ledgers(id, date(2025, 1, 11), date(2025, 1, 13))
        .await
        .unwrap();
    let full = LedgerKey::new(id, date(2025, 1, 12));
    h.engine
        .set_ledger_status(full, override_to(LedgerStatus::Full, "charter group"), operator())
        .await
        .unwrap();

    h.engine
        .set_schedule_status(id, ScheduleStatus::Inactive, Some("audit".to_string()), None, operator())
        .await
        .unwrap();
    let cascade = h
        .engine
        .set_schedule_status(id, ScheduleStatus::Active, None, None, operator())
        .await
        .unwrap();

    assert_eq!(cascade.ledgers_changed, 2);
    assert_eq!(status_of(&h, full).await, LedgerStatus::Full);
    assert_eq!(status_of(&h, LedgerKey::new(id, date(2025, 1, 13))).await, LedgerStatus::Available);
}

#[tokio::test]
async fn test_lapsed_weather_hold_is_lifted() {
    let h = Harness::on(date(2025, 1, 10));
    let schedule = h.register(ScheduleBuilder::new().build()).await;
    let id = schedule.schedule.id;
    let lapsed = LedgerKey::new(id, date(2025, 1, 10));
    let holding = LedgerKey::new(id, date(2025, 1, 11));

    for (key, expires_at) in [
        (lapsed, h.now() - Duration::hours(1)),
        (holding, h.now() + Duration::hours(20)),
    ] {
        h.engine
            .set_ledger_status(
                key,
                LedgerStatusUpdate {
                    status: LedgerStatus::WeatherIssue,
                    reason: Some("gale warning".to_string()),
                    expires_at: Some(expires_at),
                },
                operator(),
            )
            .await
            .unwrap();
    }

    let report = h.sweeper.sweep_expired_statuses(h.now()).await.unwrap();

    assert_eq!(report.weather_holds_lifted, vec![lapsed]);
    assert_eq!(status_of(&h, lapsed).await, LedgerStatus::Available);
    assert_eq!(status_of(&h, holding).await, LedgerStatus::WeatherIssue);

    let err = h
        .engine
        .book(booking_request(id, holding.date, 1, &[]))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ferry_core::ReservationError::DateUnavailable {
            status: LedgerStatus::WeatherIssue,
            ..
        }
    ));
}

#[tokio::test]
async fn test_stale_reactivation_leaves_fresh_suspension_alone() {
    let h = Harness::on(date(2025, 1, 10));
    let schedule = h.register(ScheduleBuilder::new().build()).await;
    let id = schedule.schedule.id;
    h.engine
        .ensure_ledgers(id, date(2025, 1, 12), date(2025, 1, 13))
        .await
        .unwrap();

    let until = Utc.with_ymd_and_hms(2025, 1, 17, 9, 0, 0).unwrap();
    h.engine
        .set_schedule_status(id, ScheduleStatus::Inactive, Some("storm".to_string()), Some(until), operator())
        .await
        .unwrap();

    // A reactivation decided on an older read of the schedule.
    let cascade = h
        .store
        .apply_schedule_status(&ScheduleStatusChange {
            schedule_id: id,
            status: ScheduleStatus::Active,
            reason: None,
            expires_at: None,
            from_date: date(2025, 1, 10),
            at: h.now(),
            only_if_expired_before: Some(h.now()),
        })
        .await
        .unwrap();

    assert!(!cascade.applied);
    assert_eq!(cascade.ledgers_changed, 0);
    let snapshot = h.store.load_schedule(id).await.unwrap();
    assert_eq!(snapshot.schedule.status, ScheduleStatus::Inactive);
    assert_eq!(snapshot.schedule.status_expires_at, Some(until));
    assert_eq!(status_of(&h, LedgerKey::new(id, date(2025, 1, 12))).await, LedgerStatus::Inactive);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_resuspension_during_sweep_backoff_survives() {
    let retry = RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(std::time::Duration::from_millis(150))
        .max_delay(std::time::Duration::from_millis(150))
        .build();
    let h = Harness::build(
        InMemoryReservationStore::with_lock_timeout(std::time::Duration::from_millis(20)),
        date(2025, 1, 10),
        retry,
    );
    let schedule = h.register(ScheduleBuilder::new().build()).await;
    let id = schedule.schedule.id;
    let sailing = LedgerKey::new(id, date(2025, 1, 13));
    h.engine.ensure_ledgers(id, sailing.date, sailing.date).await.unwrap();

    let lapsed = Utc.with_ymd_and_hms(2025, 1, 9, 18, 0, 0).unwrap();
    h.engine
        .set_schedule_status(id, ScheduleStatus::Inactive, Some("refit".to_string()), Some(lapsed), operator())
        .await
        .unwrap();

    let held = h.store.hold_ledger_row(sailing).await.unwrap();
    let sweeper = h.sweeper.clone();
    let now = h.now();
    let sweep = tokio::spawn(async move { sweeper.sweep_expired_statuses(now).await });

    // The sweep's first attempt times out on the held row and backs off.
    tokio::time::sleep(std::time::Duration::from_millis(60)).await;
    drop(held);
    let until = Utc.with_ymd_and_hms(2025, 1, 17, 9, 0, 0).unwrap();
    h.engine
        .set_schedule_status(id, ScheduleStatus::Inactive, Some("storm".to_string()), Some(until), operator())
        .await
        .unwrap();

    let report = sweep.await.unwrap().unwrap();

    assert!(report.schedules_reactivated.is_empty());
    assert_eq!(report.ledgers_reactivated, 0);
    let snapshot = h.store.load_schedule(id).await.unwrap();
    assert_eq!(snapshot.schedule.status, ScheduleStatus::Inactive);
    assert_eq!(snapshot.schedule.status_reason.as_deref(), Some("storm"));
    assert_eq!(snapshot.schedule.status_expires_at, Some(until));
    assert_eq!(status_of(&h, sailing).await, LedgerStatus::Inactive);
}
