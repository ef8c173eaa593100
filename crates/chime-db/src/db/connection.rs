use diesel::ConnectionError;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use futures::future::BoxFuture;

use crate::db::Connector;
use crate::db::lease::{LeaseManager, LeaseSettings};
use crate::error::DbResult;

pub type DbConnection = AsyncPgConnection;
pub type PgLeaseManager = LeaseManager<PgConnector>;

/// Establishes postgres connections for the lease manager.
pub struct PgConnector {
    database_url: String,
    server_name: String,
}

impl PgConnector {
    #[must_use]
    pub fn new(database_url: impl Into<String>) -> Self {
        let database_url = database_url.into();
        let server_name = server_name_of(&database_url);
        Self {
            database_url,
            server_name,
        }
    }
}

/// Host part of a connection URL, without credentials.
fn server_name_of(url: &str) -> String {
    let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
    let authority = rest.split('/').next().unwrap_or_default();
    authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host)
        .to_string()
}

impl Connector for PgConnector {
    type Connection = DbConnection;

    fn server_name(&self) -> &str {
        &self.server_name
    }

    fn connect(&self) -> BoxFuture<'_, DbResult<DbConnection>> {
        Box::pin(async move {
            tracing::debug!(server = %self.server_name, "Establishing postgres connection");
            let mut conn = AsyncPgConnection::establish(&self.database_url).await?;

            // Appointment times are stored and compared in UTC.
            diesel::sql_query("SET TIME ZONE 'UTC'")
                .execute(&mut conn)
                .await
                .map_err(ConnectionError::CouldntSetupConfiguration)?;

            Ok(conn)
        })
    }

    fn disconnect(&self, connection: DbConnection) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move {
            drop(connection);
            Ok(())
        })
    }
}

/// ## Summary
/// Creates a lease manager backed by a postgres connector.
///
/// ## Errors
/// Returns `DbError::NoRuntime` when called outside a tokio runtime.
#[tracing::instrument(skip(database_url, settings))]
pub fn create_lease_manager(
    database_url: &str,
    settings: LeaseSettings,
) -> DbResult<PgLeaseManager> {
    let connector = PgConnector::new(database_url);
    tracing::debug!(server = %connector.server_name(), "Creating connection lease manager");
    LeaseManager::new(connector, settings)
}
