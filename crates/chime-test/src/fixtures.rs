//! Doubles for the connector, the appointment store and the clock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chime_core::types::{AppointmentId, UserId};
use chime_db::db::Connector;
use chime_db::db::query::appointment::AppointmentSource;
use chime_db::error::{DbError, DbResult};
use chime_db::model::appointment::AppointmentSnapshot;
use chime_service::alert::Clock;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use futures::future::BoxFuture;

/// Locks a mutex and recovers from poisoning.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            mutex.clear_poison();
            poisoned.into_inner()
        }
    }
}

/// Fixed reference instant all scenarios are expressed against.
///
/// # Panics
/// Panics if the reference date is not a valid UTC instant.
#[must_use]
#[allow(clippy::expect_used)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .expect("reference instant is a valid UTC time")
}

/// ## Summary
/// An appointment for user 1 running from `start` to `end` minutes after
/// [`t0`].
#[must_use]
pub fn appointment(id: i32, start: i64, end: i64) -> AppointmentSnapshot {
    AppointmentSnapshot {
        id: AppointmentId(id),
        user_id: UserId(1),
        customer_id: 100 + id,
        title: format!("Appointment {id}"),
        location: "Phoenix, Arizona".to_string(),
        contact: "front desk".to_string(),
        appointment_type: "planning".to_string(),
        start: t0() + TimeDelta::minutes(start),
        end: t0() + TimeDelta::minutes(end),
    }
}

/// Connector whose connections are serial numbers. Counts opens and closes.
#[derive(Debug, Clone, Default)]
pub struct CountingConnector {
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
    serial: Arc<AtomicU32>,
    refuse: Arc<AtomicBool>,
}

impl CountingConnector {
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Makes subsequent opens fail as if the server were unreachable.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Connector for CountingConnector {
    type Connection = u32;

    fn server_name(&self) -> &str {
        "fixture"
    }

    fn connect(&self) -> BoxFuture<'_, DbResult<u32>> {
        Box::pin(async move {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(DbError::ConnectionAcquisition(
                    diesel::ConnectionError::BadConnection("connection refused".to_string()),
                ));
            }
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(self.serial.fetch_add(1, Ordering::SeqCst))
        })
    }

    fn disconnect(&self, _connection: u32) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(async move {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// ## Summary
/// In-memory appointment store answering window queries the way the database
/// query does: rows whose `[start, end)` intersects `[from, to]`, ordered by
/// start then end.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    rows: Arc<Mutex<Vec<AppointmentSnapshot>>>,
    failing: Arc<AtomicBool>,
    delay: Arc<Mutex<Option<Duration>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedSource {
    #[must_use]
    pub fn with_rows(rows: Vec<AppointmentSnapshot>) -> Self {
        let source = Self::default();
        source.set_rows(rows);
        source
    }

    pub fn set_rows(&self, rows: Vec<AppointmentSnapshot>) {
        *lock(&self.rows) = rows;
    }

    pub fn upsert(&self, row: AppointmentSnapshot) {
        let mut rows = lock(&self.rows);
        rows.retain(|existing| existing.id != row.id);
        rows.push(row);
    }

    pub fn remove(&self, id: AppointmentId) {
        lock(&self.rows).retain(|existing| existing.id != id);
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Makes every query take `delay` of (tokio) time.
    pub fn set_delay(&self, delay: Option<Duration>) {
        *lock(&self.delay) = delay;
    }

    /// Number of queries issued so far.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AppointmentSource for ScriptedSource {
    fn load_window(
        &self,
        user: UserId,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> BoxFuture<'_, DbResult<Vec<AppointmentSnapshot>>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let delay = *lock(&self.delay);
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(DbError::QueryError(diesel::result::Error::BrokenTransactionManager));
            }
            let mut rows: Vec<AppointmentSnapshot> = lock(&self.rows)
                .iter()
                .filter(|row| row.user_id == user && row.start <= to && row.end > from)
                .cloned()
                .collect();
            rows.sort_by(AppointmentSnapshot::compare_by_dates);
            Ok(rows)
        })
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Clone)]
pub struct ManualClock(Arc<Mutex<DateTime<Utc>>>);

impl ManualClock {
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self(Arc::new(Mutex::new(now)))
    }

    pub fn advance(&self, delta: TimeDelta) {
        *lock(&self.0) += delta;
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *lock(&self.0) = now;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.0)
    }
}
