use salvo::http::StatusCode;
use salvo::{Response, writing::Json};
use serde::Serialize;

use crate::error::AppError;
use chime_core::error::CoreError;
use chime_service::error::ServiceError;

/// ## Summary
/// Error response payload
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub fn render_error(res: &mut Response, status: StatusCode, message: impl Into<String>) {
    res.status_code(status);
    res.render(Json(ErrorResponse {
        error: message.into(),
    }));
}

/// Maps an application error onto a status code and JSON body.
pub fn render_app_error(res: &mut Response, error: &AppError) {
    let status = match error {
        AppError::ServiceError(ServiceError::MonitorUnavailable) => StatusCode::SERVICE_UNAVAILABLE,
        AppError::ServiceError(ServiceError::CoreError(CoreError::ValidationError(_)))
        | AppError::CoreError(CoreError::ValidationError(_)) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %error, "Request failed");
    } else {
        tracing::warn!(error = %error, "Request rejected");
    }
    render_error(res, status, error.to_string());
}
