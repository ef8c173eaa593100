use thiserror::Error;

use crate::db::lease::LeaseId;

/// Database layer errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Lease {0} is already open")]
    AlreadyOpen(LeaseId),

    #[error("Lease {0} is not open")]
    NotOpen(LeaseId),

    #[error("Failed to acquire database connection: {0}")]
    ConnectionAcquisition(#[from] diesel::ConnectionError),

    #[error("Database connection has been closed")]
    ConnectionClosed,

    #[error("Lease manager requires a tokio runtime")]
    NoRuntime,

    #[error("Database error: {0}")]
    QueryError(#[from] diesel::result::Error),

    #[error("Migration error: {0}")]
    MigrationError(String),

    #[error(transparent)]
    CoreError(#[from] chime_core::error::CoreError),
}

pub type DbResult<T> = std::result::Result<T, DbError>;
