use salvo::async_trait;

use crate::error::AppResult;
use chime_core::error::CoreError;
use chime_service::alert::AlertMonitor;

pub struct MonitorHandler {
    pub monitor: AlertMonitor,
}

#[async_trait]
impl salvo::Handler for MonitorHandler {
    #[tracing::instrument(skip(self, _req, depot, _res, _ctrl))]
    async fn handle(
        &self,
        _req: &mut salvo::Request,
        depot: &mut salvo::Depot,
        _res: &mut salvo::Response,
        _ctrl: &mut salvo::FlowCtrl,
    ) {
        depot.inject(self.monitor.clone());
    }
}

/// ## Summary
/// Retrieves the alert monitor handle from the depot.
///
/// ## Errors
/// Returns an error if the monitor is not found in the depot.
pub fn get_monitor_from_depot(depot: &salvo::Depot) -> AppResult<AlertMonitor> {
    depot
        .obtain::<AlertMonitor>()
        .cloned()
        .map_err(|_err| CoreError::InvariantViolation("Alert monitor not found in depot").into())
}
