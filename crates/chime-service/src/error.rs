use thiserror::Error;

/// Service layer errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    CoreError(#[from] chime_core::error::CoreError),

    #[error("Error checking impending appointments: {0}")]
    PollQueryError(#[source] chime_db::error::DbError),

    #[error("Alert monitor has shut down")]
    MonitorUnavailable,
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;
