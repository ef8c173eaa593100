use std::sync::Arc;

pub use chime_core::config::*;
use salvo::async_trait;

use crate::error::{AppError, AppResult};

/// Shares one loaded [`Settings`] with every request.
pub struct ConfigHandler {
    settings: Arc<Settings>,
}

impl ConfigHandler {
    #[must_use]
    pub fn new(settings: Settings) -> Self {
        Self {
            settings: Arc::new(settings),
        }
    }
}

#[async_trait]
impl salvo::Handler for ConfigHandler {
    #[tracing::instrument(skip(self, _req, depot, _res, _ctrl))]
    async fn handle(
        &self,
        _req: &mut salvo::Request,
        depot: &mut salvo::Depot,
        _res: &mut salvo::Response,
        _ctrl: &mut salvo::FlowCtrl,
    ) {
        depot.inject(Arc::clone(&self.settings));
    }
}

/// ## Summary
/// Retrieves the shared settings injected by [`ConfigHandler`].
///
/// ## Errors
/// Returns an error if no [`ConfigHandler`] ran for this request.
pub fn get_config_from_depot(depot: &salvo::Depot) -> AppResult<Arc<Settings>> {
    depot.obtain::<Arc<Settings>>().cloned().map_err(|_missing| {
        AppError::CoreError(chime_core::error::CoreError::InvariantViolation(
            "Settings not found in depot",
        ))
    })
}
