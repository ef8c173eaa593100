mod alerts;
mod app_specific;
mod appointments;
mod response;

use salvo::Router;

// Re-export route constants from core
pub use chime_core::constants::{
    ALERTS_ROUTE_COMPONENT, ALERTS_ROUTE_PREFIX, API_ROUTE_COMPONENT, API_ROUTE_PREFIX,
    APPOINTMENTS_ROUTE_COMPONENT, APPOINTMENTS_ROUTE_PREFIX,
};

/// ## Summary
/// Constructs the API router. Handlers expect the monitor and configuration
/// to have been injected into the depot by the outer router.
#[must_use]
pub fn routes() -> Router {
    Router::with_path(API_ROUTE_COMPONENT)
        .push(app_specific::routes())
        .push(alerts::routes())
        .push(appointments::routes())
}
