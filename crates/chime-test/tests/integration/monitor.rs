//! Integration tests for the appointment alert monitor.
//!
//! Tests:
//! - Lead-time window selection and ordering over the fixture store
//! - Dismissals surviving repeated polls until the appointment ends
//! - Snoozes waking only after their wake time
//! - Deleted and rescheduled appointments leaving the alert list
//! - Poll failures leaving state intact and restarting the monitor

use std::sync::{Arc, Mutex};

use chime_test::component::alert::{AlertEvent, MonitorState};
use chime_test::component::types::AppointmentId;
use chime_test::fixtures::ScriptedSource;
use chrono::TimeDelta;

use super::helpers::*;

#[test_log::test(tokio::test(start_paused = true))]
async fn lead_time_scenario() {
    let source = ScriptedSource::with_rows(vec![
        appointment(1, 10, 40),
        appointment(2, 20, 50),
        appointment(3, -5, 5),
    ]);
    let (monitor, _clock) = monitor(&source);

    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[3, 1]).await;
    assert!(monitor.is_alerting());
}

#[tokio::test(start_paused = true)]
async fn alerts_follow_the_clock() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 20, 30), appointment(2, 40, 45)]);
    let (monitor, clock) = monitor(&source);

    monitor.start().expect("start");
    wait_for_status(&monitor, |status| status.last_check.is_some() && !status.checking).await;
    assert!(!monitor.is_alerting());

    clock.advance(TimeDelta::minutes(6));
    run_for(PERIOD).await;
    wait_for_alerts(&monitor, &[1]).await;

    clock.advance(TimeDelta::minutes(25));
    run_for(PERIOD).await;
    wait_for_alerts(&monitor, &[2]).await;

    clock.advance(TimeDelta::minutes(30));
    run_for(PERIOD).await;
    wait_for_alerts(&monitor, &[]).await;
    assert!(!monitor.is_alerting());
}

#[tokio::test(start_paused = true)]
async fn dismissed_appointment_stays_hidden_until_it_ends() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40)]);
    let (monitor, clock) = monitor(&source);
    let mut alerting = monitor.subscribe_alerting();

    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1]).await;
    assert!(*alerting.borrow_and_update());

    assert!(monitor.dismiss(AppointmentId(1)).await.expect("dismiss"));
    assert!(alerting.has_changed().expect("monitor alive"));
    assert!(!*alerting.borrow_and_update());

    for _ in 0..10 {
        clock.advance(TimeDelta::minutes(2));
        run_for(PERIOD).await;
        assert!(!monitor.is_alerting());
    }

    // A second appointment in the same slot is not affected.
    source.upsert(appointment(2, 30, 60));
    clock.advance(TimeDelta::minutes(2));
    run_for(PERIOD).await;
    wait_for_alerts(&monitor, &[2]).await;
}

#[tokio::test(start_paused = true)]
async fn rescheduling_lifts_a_dismissal() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40)]);
    let (monitor, _clock) = monitor(&source);

    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1]).await;
    monitor.dismiss(AppointmentId(1)).await.expect("dismiss");

    source.upsert(appointment(1, 5, 40));
    run_for(PERIOD).await;
    wait_for_alerts(&monitor, &[1]).await;
}

#[tokio::test(start_paused = true)]
async fn snoozed_appointment_returns_after_wake_time() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40), appointment(2, 12, 40)]);
    let (monitor, clock) = monitor(&source);

    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1, 2]).await;

    assert_eq!(monitor.snooze_all(TimeDelta::minutes(5)).await.expect("snooze"), 2);
    wait_for_alerts(&monitor, &[]).await;

    clock.advance(TimeDelta::minutes(2));
    run_for(PERIOD).await;
    assert!(!monitor.is_alerting());

    clock.advance(TimeDelta::minutes(2));
    run_for(PERIOD).await;
    assert!(!monitor.is_alerting());

    clock.advance(TimeDelta::minutes(2));
    run_for(PERIOD).await;
    wait_for_alerts(&monitor, &[1, 2]).await;
}

#[tokio::test(start_paused = true)]
async fn deleted_appointment_leaves_on_next_poll_or_notification() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40), appointment(2, 5, 40)]);
    let (monitor, _clock) = monitor(&source);

    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[2, 1]).await;

    // Removed from the store without a notification: the poll notices.
    source.remove(AppointmentId(1));
    run_for(PERIOD).await;
    wait_for_alerts(&monitor, &[2]).await;

    // Notified directly: no poll needed.
    source.remove(AppointmentId(2));
    monitor.on_deleted(AppointmentId(2)).expect("delete");
    wait_for_alerts(&monitor, &[]).await;
}

#[tokio::test(start_paused = true)]
async fn notifications_and_polls_agree() {
    let source = ScriptedSource::default();
    let (monitor, _clock) = monitor(&source);

    for row in [appointment(1, 10, 40), appointment(2, 20, 50), appointment(3, -5, 5)] {
        source.upsert(row.clone());
        monitor.on_inserted(row.clone()).expect("insert");
        monitor.on_updated(row).expect("repeat as update");
    }
    wait_for_alerts(&monitor, &[3, 1]).await;

    monitor.start().expect("start");
    wait_for_status(&monitor, |status| status.last_check.is_some() && !status.checking).await;
    wait_for_alerts(&monitor, &[3, 1]).await;
}

#[test_log::test(tokio::test(start_paused = true))]
async fn poll_failure_keeps_state_and_restarts() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40), appointment(2, 12, 40)]);
    let (monitor, clock) = monitor(&source);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    monitor.listeners().add(move |event| {
        if let Ok(mut events) = sink.lock() {
            events.push(event.clone());
        }
    });

    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1, 2]).await;
    monitor.dismiss(AppointmentId(2)).await.expect("dismiss");

    source.fail(true);
    clock.advance(TimeDelta::minutes(2));
    run_for(PERIOD).await;
    wait_for_status(&monitor, |status| status.fault.is_some()).await;

    let status = monitor.status();
    assert_eq!(status.state, MonitorState::Running);
    wait_for_alerts(&monitor, &[1]).await;

    source.fail(false);
    clock.advance(TimeDelta::minutes(2));
    run_for(PERIOD).await;
    wait_for_status(&monitor, |status| !status.checking).await;
    // The dismissal survived the failure.
    wait_for_alerts(&monitor, &[1]).await;

    monitor.clear_fault().expect("clear");
    wait_for_status(&monitor, |status| status.fault.is_none()).await;

    let events = events.lock().expect("events");
    let failures = events
        .iter()
        .filter(|event| matches!(event, AlertEvent::PollFailed { .. }))
        .count();
    assert_eq!(failures, 1);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_polling() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40)]);
    let (monitor, _clock) = monitor(&source);

    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1]).await;
    let calls = source.calls();

    monitor.shutdown().await.expect("shutdown");
    run_for(PERIOD * 3).await;

    assert_eq!(source.calls(), calls);
    assert_eq!(monitor.status().state, MonitorState::Stopped);
}
