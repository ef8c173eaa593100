//! Query composition for `appointment`.

use chime_core::types::UserId;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use futures::future::BoxFuture;

use crate::db::connection::{DbConnection, PgLeaseManager};
use crate::db::schema::appointment;
use crate::error::{DbError, DbResult};
use crate::model::appointment::{Appointment, AppointmentSnapshot};

/// ## Summary
/// Loads the user's appointments whose `[start, end)` intersects `[from, to]`,
/// ordered by start then end.
///
/// ## Errors
/// Returns an error if the database operation fails.
pub async fn load_window(
    conn: &mut DbConnection,
    user: UserId,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
) -> QueryResult<Vec<Appointment>> {
    appointment::table
        .filter(appointment::user_id.eq(user.0))
        .filter(appointment::start_at.le(to))
        .filter(appointment::end_at.gt(from))
        .order((appointment::start_at.asc(), appointment::end_at.asc()))
        .select(Appointment::as_select())
        .load(conn)
        .await
}

/// Supplies the appointments the alert monitor polls for.
pub trait AppointmentSource: Send + Sync + 'static {
    /// Appointments of `user` whose time range intersects `[from, to]`.
    fn load_window(
        &self,
        user: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxFuture<'_, DbResult<Vec<AppointmentSnapshot>>>;
}

/// Runs the window query under a lease on the shared connection.
#[derive(Debug, Clone)]
pub struct LeasedAppointmentSource {
    leases: PgLeaseManager,
}

impl LeasedAppointmentSource {
    #[must_use]
    pub fn new(leases: PgLeaseManager) -> Self {
        Self { leases }
    }
}

impl AppointmentSource for LeasedAppointmentSource {
    fn load_window(
        &self,
        user: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxFuture<'_, DbResult<Vec<AppointmentSnapshot>>> {
        Box::pin(async move {
            let rows = self
                .leases
                .with_connection(|connection| async move {
                    let mut conn = connection.lock().await?;
                    let rows = load_window(&mut *conn, user, from, to).await?;
                    Ok::<_, DbError>(rows)
                })
                .await?;
            tracing::debug!(user = %user, count = rows.len(), "Loaded appointment window");
            Ok(rows.into_iter().map(AppointmentSnapshot::from).collect())
        })
    }
}
