//! Alert listing and the dismiss/snooze actions a UI layer triggers.

use chime_core::types::AppointmentId;
use chime_db::model::appointment::AppointmentSnapshot;
use chime_service::alert::MonitorStatus;
use chrono::TimeDelta;
use salvo::{Depot, Request, Response, Router, handler, http::StatusCode, writing::Json};
use serde::{Deserialize, Serialize};

use super::ALERTS_ROUTE_COMPONENT;
use super::response::{render_app_error, render_error};
use crate::config::get_config_from_depot;
use crate::error::AppError;
use crate::monitor_handler::get_monitor_from_depot;

/// ## Summary
/// Alert state as seen by a UI layer.
#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerting: bool,
    #[serde(flatten)]
    pub status: MonitorStatus,
    pub lead_time_minutes: i64,
    pub alerts: Vec<AppointmentSnapshot>,
}

/// ## Summary
/// Snooze request payload
#[derive(Debug, Deserialize)]
pub struct SnoozeRequest {
    pub minutes: i64,
}

#[derive(Debug, Serialize)]
pub struct BulkActionResponse {
    pub count: usize,
}

fn appointment_id(req: &Request, res: &mut Response) -> Option<AppointmentId> {
    let id = req.param::<i32>("id").map(AppointmentId);
    if id.is_none() {
        render_error(res, StatusCode::BAD_REQUEST, "Invalid appointment id");
    }
    id
}

async fn snooze_duration(req: &mut Request, res: &mut Response) -> Option<TimeDelta> {
    match req.parse_json::<SnoozeRequest>().await {
        Ok(body) if body.minutes > 0 => {
            let duration = TimeDelta::try_minutes(body.minutes);
            if duration.is_none() {
                render_error(res, StatusCode::BAD_REQUEST, "Snooze minutes out of range");
            }
            duration
        }
        Ok(_) => {
            render_error(res, StatusCode::BAD_REQUEST, "Snooze minutes must be positive");
            None
        }
        Err(e) => {
            tracing::warn!(error = ?e, "Failed to parse snooze request");
            render_error(res, StatusCode::BAD_REQUEST, "Invalid request body");
            None
        }
    }
}

/// ## Summary
/// GET /api/alerts - Current alerting appointments ordered by start then end,
/// with the monitor status.
///
/// ## Errors
/// Returns HTTP 500 if the monitor or configuration is missing from the depot
#[handler]
async fn list_alerts(depot: &mut Depot, res: &mut Response) {
    let monitor = match get_monitor_from_depot(depot) {
        Ok(monitor) => monitor,
        Err(e) => {
            render_app_error(res, &e);
            return;
        }
    };
    let settings = match get_config_from_depot(depot) {
        Ok(settings) => settings,
        Err(e) => {
            render_app_error(res, &e);
            return;
        }
    };

    res.render(Json(AlertsResponse {
        alerting: monitor.is_alerting(),
        status: monitor.status(),
        lead_time_minutes: settings.alerts.lead_time_minutes,
        alerts: monitor.alerts().to_vec(),
    }));
}

/// ## Summary
/// POST /api/alerts/{id}/dismiss - Dismisses an alerting appointment.
///
/// ## Errors
/// Returns HTTP 400 for a non-numeric id
/// Returns HTTP 404 if the appointment is not alerting
/// Returns HTTP 503 if the monitor has shut down
#[handler]
async fn dismiss(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(id) = appointment_id(req, res) else {
        return;
    };
    let monitor = match get_monitor_from_depot(depot) {
        Ok(monitor) => monitor,
        Err(e) => {
            render_app_error(res, &e);
            return;
        }
    };

    match monitor.dismiss(id).await {
        Ok(true) => {
            res.status_code(StatusCode::NO_CONTENT);
        }
        Ok(false) => render_error(res, StatusCode::NOT_FOUND, "Appointment is not alerting"),
        Err(e) => render_app_error(res, &AppError::from(e)),
    }
}

/// ## Summary
/// POST /api/alerts/{id}/snooze - Snoozes an alerting appointment for the
/// number of minutes given in the body.
///
/// ## Errors
/// Returns HTTP 400 for a non-numeric id or a missing, non-positive or
/// out-of-range duration
/// Returns HTTP 404 if the appointment is not alerting
/// Returns HTTP 503 if the monitor has shut down
#[handler]
async fn snooze(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(id) = appointment_id(req, res) else {
        return;
    };
    let Some(duration) = snooze_duration(req, res).await else {
        return;
    };
    let monitor = match get_monitor_from_depot(depot) {
        Ok(monitor) => monitor,
        Err(e) => {
            render_app_error(res, &e);
            return;
        }
    };

    match monitor.snooze(id, duration).await {
        Ok(true) => {
            res.status_code(StatusCode::NO_CONTENT);
        }
        Ok(false) => render_error(res, StatusCode::NOT_FOUND, "Appointment is not alerting"),
        Err(e) => render_app_error(res, &AppError::from(e)),
    }
}

/// ## Summary
/// POST /api/alerts/dismiss-all
#[handler]
async fn dismiss_all(depot: &mut Depot, res: &mut Response) {
    let result = match get_monitor_from_depot(depot) {
        Ok(monitor) => monitor.dismiss_all().await.map_err(AppError::from),
        Err(e) => Err(e),
    };
    match result {
        Ok(count) => res.render(Json(BulkActionResponse { count })),
        Err(e) => render_app_error(res, &e),
    }
}

/// ## Summary
/// POST /api/alerts/snooze-all - Body as for a single snooze.
#[handler]
async fn snooze_all(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let Some(duration) = snooze_duration(req, res).await else {
        return;
    };
    let result = match get_monitor_from_depot(depot) {
        Ok(monitor) => monitor.snooze_all(duration).await.map_err(AppError::from),
        Err(e) => Err(e),
    };
    match result {
        Ok(count) => res.render(Json(BulkActionResponse { count })),
        Err(e) => render_app_error(res, &e),
    }
}

/// ## Summary
/// POST /api/alerts/fault/clear - Acknowledges the last poll failure.
#[handler]
async fn clear_fault(depot: &mut Depot, res: &mut Response) {
    let result = get_monitor_from_depot(depot)
        .and_then(|monitor| monitor.clear_fault().map_err(AppError::from));
    match result {
        Ok(()) => {
            res.status_code(StatusCode::NO_CONTENT);
        }
        Err(e) => render_app_error(res, &e),
    }
}

#[must_use]
pub fn routes() -> Router {
    Router::with_path(ALERTS_ROUTE_COMPONENT)
        .get(list_alerts)
        .push(Router::with_path("dismiss-all").post(dismiss_all))
        .push(Router::with_path("snooze-all").post(snooze_all))
        .push(Router::with_path("fault/clear").post(clear_fault))
        .push(Router::with_path("{id}/dismiss").post(dismiss))
        .push(Router::with_path("{id}/snooze").post(snooze))
}
