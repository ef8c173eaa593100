//! Integration tests for the alert HTTP API.
//!
//! Tests:
//! - Listing alerts with the monitor status
//! - Dismiss and snooze by id, including unknown ids and bad bodies
//! - Bulk actions and fault acknowledgement
//! - Appointment change events feeding the monitor

use salvo::http::StatusCode;
use salvo::test::{ResponseExt, TestClient};
use serde_json::{Value, json};

use chime_test::component::app::{ALERTS_ROUTE_PREFIX, APPOINTMENTS_ROUTE_PREFIX, API_ROUTE_PREFIX};
use chime_test::fixtures::ScriptedSource;

use super::helpers::*;

#[test_log::test(tokio::test(start_paused = true))]
async fn healthcheck_is_served_under_api() {
    let (monitor, _clock) = monitor(&ScriptedSource::default());
    let service = service(&monitor);

    let mut resp = TestClient::get(url(&format!("{API_ROUTE_PREFIX}/app/healthcheck")))
        .send(&service)
        .await;

    assert_eq!(resp.status_code, Some(StatusCode::OK));
    assert_eq!(resp.take_string().await.expect("body"), "OK");
}

#[test_log::test(tokio::test(start_paused = true))]
async fn list_reports_alerts_and_status() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40), appointment(3, -5, 5)]);
    let (monitor, _clock) = monitor(&source);
    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[3, 1]).await;
    let service = service(&monitor);

    let mut resp = TestClient::get(url(ALERTS_ROUTE_PREFIX))
        .send(&service)
        .await;

    assert_eq!(resp.status_code, Some(StatusCode::OK));
    let body: Value = resp.take_json().await.expect("json body");
    assert_eq!(body["alerting"], json!(true));
    assert_eq!(body["state"], json!("running"));
    assert_eq!(body["checking"], json!(false));
    assert_eq!(body["fault"], Value::Null);
    assert_eq!(body["lead_time_minutes"], json!(15));
    let ids: Vec<i64> = body["alerts"]
        .as_array()
        .expect("alerts array")
        .iter()
        .filter_map(|alert| alert["id"].as_i64())
        .collect();
    assert_eq!(ids, vec![3, 1]);
}

#[tokio::test(start_paused = true)]
async fn dismiss_by_id() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40)]);
    let (monitor, _clock) = monitor(&source);
    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1]).await;
    let service = service(&monitor);

    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/1/dismiss")))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::NO_CONTENT));
    assert!(!monitor.is_alerting());

    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/1/dismiss")))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::NOT_FOUND));

    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/abc/dismiss")))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));
}

#[tokio::test(start_paused = true)]
async fn snooze_by_id_validates_body() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40)]);
    let (monitor, _clock) = monitor(&source);
    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1]).await;
    let service = service(&monitor);
    let snooze_url = url(&format!("{ALERTS_ROUTE_PREFIX}/1/snooze"));

    let resp = TestClient::post(&snooze_url)
        .json(&json!({ "minutes": 0 }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));

    let resp = TestClient::post(&snooze_url)
        .raw_json("not json")
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));

    let resp = TestClient::post(&snooze_url)
        .json(&json!({ "minutes": 10 }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::NO_CONTENT));
    assert!(!monitor.is_alerting());

    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/42/snooze")))
        .json(&json!({ "minutes": 10 }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::NOT_FOUND));
}

#[tokio::test(start_paused = true)]
async fn oversized_snooze_is_rejected_without_disturbing_the_monitor() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40)]);
    let (monitor, _clock) = monitor(&source);
    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1]).await;
    let service = service(&monitor);

    // Fits in a duration but lands past the last representable instant.
    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/1/snooze")))
        .json(&json!({ "minutes": 1_000_000_000_000_i64 }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));

    // Does not fit in a duration at all.
    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/snooze-all")))
        .json(&json!({ "minutes": i64::MAX }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));

    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/snooze-all")))
        .json(&json!({ "minutes": 1_000_000_000_000_i64 }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));

    assert!(monitor.is_alerting());
    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/1/snooze")))
        .json(&json!({ "minutes": 10 }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::NO_CONTENT));
}

#[tokio::test(start_paused = true)]
async fn bulk_actions_report_counts() {
    let source = ScriptedSource::with_rows(vec![appointment(1, 10, 40), appointment(2, 12, 40)]);
    let (monitor, _clock) = monitor(&source);
    monitor.start().expect("start");
    wait_for_alerts(&monitor, &[1, 2]).await;
    let service = service(&monitor);

    let mut resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/snooze-all")))
        .json(&json!({ "minutes": 5 }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::OK));
    let body: Value = resp.take_json().await.expect("json body");
    assert_eq!(body["count"], json!(2));

    let mut resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/dismiss-all")))
        .send(&service)
        .await;
    let body: Value = resp.take_json().await.expect("json body");
    assert_eq!(body["count"], json!(0));

    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/fault/clear")))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::NO_CONTENT));
}

#[tokio::test(start_paused = true)]
async fn appointment_events_feed_the_monitor() {
    let (monitor, _clock) = monitor(&ScriptedSource::default());
    let service = service(&monitor);
    let events_url = url(&format!("{APPOINTMENTS_ROUTE_PREFIX}/events"));

    let resp = TestClient::post(&events_url)
        .json(&json!({ "kind": "inserted", "appointment": appointment(7, 5, 30) }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::ACCEPTED));
    wait_for_alerts(&monitor, &[7]).await;

    let resp = TestClient::post(&events_url)
        .json(&json!({ "kind": "updated", "appointment": appointment(7, 50, 80) }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::ACCEPTED));
    wait_for_alerts(&monitor, &[]).await;

    let resp = TestClient::post(&events_url)
        .json(&json!({ "kind": "inserted", "appointment": appointment(8, 30, 10) }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));

    let resp = TestClient::post(&events_url)
        .json(&json!({ "kind": "archived", "appointment": appointment(7, 5, 30) }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::BAD_REQUEST));

    monitor.on_inserted(appointment(9, 1, 30)).expect("insert");
    wait_for_alerts(&monitor, &[9]).await;
    let resp = TestClient::post(&events_url)
        .json(&json!({ "kind": "deleted", "appointment": appointment(9, 1, 30) }))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::ACCEPTED));
    wait_for_alerts(&monitor, &[]).await;
}

#[tokio::test(start_paused = true)]
async fn requests_after_shutdown_are_unavailable() {
    let (monitor, _clock) = monitor(&ScriptedSource::default());
    let service = service(&monitor);
    monitor.shutdown().await.expect("shutdown");

    let resp = TestClient::post(url(&format!("{ALERTS_ROUTE_PREFIX}/1/dismiss")))
        .send(&service)
        .await;
    assert_eq!(resp.status_code, Some(StatusCode::SERVICE_UNAVAILABLE));
}
