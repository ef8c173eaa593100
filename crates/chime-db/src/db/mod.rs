use futures::future::BoxFuture;

use crate::error::DbResult;

pub mod connection;
pub mod lease;
pub mod migrations;
pub mod query;
pub mod schema;

/// Opens and closes the one physical connection the lease manager shares.
pub trait Connector: Send + Sync + 'static {
    type Connection: Send + 'static;

    /// Human-readable name of the server, used in log fields.
    fn server_name(&self) -> &str;

    fn connect(&self) -> BoxFuture<'_, DbResult<Self::Connection>>;

    fn disconnect(&self, connection: Self::Connection) -> BoxFuture<'_, DbResult<()>>;
}
