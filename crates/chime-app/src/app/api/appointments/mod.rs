//! Appointment change notifications from the rest of the application.

use chime_db::model::appointment::AppointmentSnapshot;
use salvo::{Depot, Request, Response, Router, handler, http::StatusCode};
use serde::Deserialize;

use super::APPOINTMENTS_ROUTE_COMPONENT;
use super::response::{render_app_error, render_error};
use crate::error::AppError;
use crate::monitor_handler::get_monitor_from_depot;

/// ## Summary
/// Appointment change event payload, tagged by `kind`.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppointmentEvent {
    Inserted { appointment: AppointmentSnapshot },
    Updated { appointment: AppointmentSnapshot },
    Deleted { appointment: AppointmentSnapshot },
}

/// ## Summary
/// POST /api/appointments/events - Feeds an inserted/updated/deleted
/// notification to the alert monitor. Repeating a notification is harmless.
///
/// ## Errors
/// Returns HTTP 400 if the body does not parse or the appointment ends before
/// it starts
/// Returns HTTP 503 if the monitor has shut down
#[handler]
async fn appointment_event(req: &mut Request, depot: &mut Depot, res: &mut Response) {
    let event: AppointmentEvent = match req.parse_json().await {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(error = ?e, "Failed to parse appointment event");
            render_error(res, StatusCode::BAD_REQUEST, "Invalid request body");
            return;
        }
    };
    let monitor = match get_monitor_from_depot(depot) {
        Ok(monitor) => monitor,
        Err(e) => {
            render_app_error(res, &e);
            return;
        }
    };

    tracing::debug!(event = ?event, "Appointment event received");
    let result = match event {
        AppointmentEvent::Inserted { appointment } => monitor.on_inserted(appointment),
        AppointmentEvent::Updated { appointment } => monitor.on_updated(appointment),
        AppointmentEvent::Deleted { appointment } => monitor.on_deleted(appointment.id),
    };
    match result {
        Ok(()) => {
            res.status_code(StatusCode::ACCEPTED);
        }
        Err(e) => render_app_error(res, &AppError::from(e)),
    }
}

#[must_use]
pub fn routes() -> Router {
    Router::with_path(APPOINTMENTS_ROUTE_COMPONENT)
        .push(Router::with_path("events").post(appointment_event))
}
