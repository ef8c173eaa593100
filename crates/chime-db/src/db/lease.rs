//! Reference-counted leases on one shared database connection.
//!
//! The first lease to open establishes the physical connection. Closing the
//! last open lease starts a grace period; the connection is closed only if no
//! lease has opened again by the time the grace period runs out.
//!
//! Open leases form a chain ordered by the moment they were linked. The chain
//! is a registry keyed by a monotonically increasing link sequence, so its tail
//! is always the most recently opened lease.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chime_core::config::LeaseConfig;
use tokio::runtime::Handle;
use tokio::sync::{MappedMutexGuard, Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::db::Connector;
use crate::error::{DbError, DbResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LeaseId(u64);

impl std::fmt::Display for LeaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timing of the delayed close that follows the last lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    /// Quiet time required before the physical connection is closed.
    pub close_delay: Duration,
    /// Granularity at which the pending close re-checks the chain.
    pub close_check_interval: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self::from(&LeaseConfig::default())
    }
}

impl From<&LeaseConfig> for LeaseSettings {
    fn from(config: &LeaseConfig) -> Self {
        Self {
            close_delay: config.close_delay(),
            close_check_interval: config.close_check_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Connecting,
    Connected,
    /// The last physical open failed.
    ConnectionError,
}

/// Handle to the physical connection shared by every open lease.
///
/// Once the connection has been torn down, `lock` fails with
/// `DbError::ConnectionClosed` instead of handing out a dead connection.
pub struct SharedConnection<T> {
    slot: Arc<AsyncMutex<Option<T>>>,
}

impl<T> Clone for SharedConnection<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T> std::fmt::Debug for SharedConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedConnection")
            .field("handles", &Arc::strong_count(&self.slot))
            .finish()
    }
}

impl<T> SharedConnection<T> {
    fn new(connection: T) -> Self {
        Self {
            slot: Arc::new(AsyncMutex::new(Some(connection))),
        }
    }

    /// ## Summary
    /// Waits for exclusive use of the physical connection.
    ///
    /// ## Errors
    /// Returns `DbError::ConnectionClosed` if the connection was closed.
    pub async fn lock(&self) -> DbResult<MappedMutexGuard<'_, T>> {
        let guard = self.slot.lock().await;
        AsyncMutexGuard::try_map(guard, Option::as_mut).map_err(|_guard| DbError::ConnectionClosed)
    }

    /// Whether both handles refer to the same physical connection.
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.slot, &other.slot)
    }

    async fn take(&self) -> Option<T> {
        self.slot.lock().await.take()
    }
}

struct Linked<T> {
    seq: u64,
    connection: SharedConnection<T>,
}

struct Chain<T> {
    /// Link sequence -> lease. The last entry is the tail.
    links: BTreeMap<u64, LeaseId>,
    next_seq: u64,
    connection: Option<SharedConnection<T>>,
    state: ConnectionState,
    close_at: Option<Instant>,
    close_task: Option<JoinHandle<()>>,
}

impl<T> Chain<T> {
    fn link(&mut self, id: LeaseId, connection: SharedConnection<T>) -> Linked<T> {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.links.insert(seq, id);
        Linked { seq, connection }
    }

    fn tail(&self) -> Option<LeaseId> {
        self.links.last_key_value().map(|(_, id)| *id)
    }
}

/// Locks the chain and recovers from poisoning.
fn lock_chain<T>(chain: &Mutex<Chain<T>>) -> MutexGuard<'_, Chain<T>> {
    match chain.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            chain.clear_poison();
            poisoned.into_inner()
        }
    }
}

struct Shared<C: Connector> {
    connector: C,
    settings: LeaseSettings,
    runtime: Handle,
    next_lease_id: AtomicU64,
    /// Serialises physical opens so concurrent first leases connect once.
    open_gate: AsyncMutex<()>,
    chain: Mutex<Chain<C::Connection>>,
}

impl<C: Connector> Shared<C> {
    fn link_existing(&self, id: LeaseId) -> Option<Linked<C::Connection>> {
        let mut chain = lock_chain(&self.chain);
        let connection = chain.connection.clone()?;
        let linked = chain.link(id, connection);
        tracing::debug!(lease = %id, leases = chain.links.len(), "Lease linked");
        Some(linked)
    }

    async fn link(self: &Arc<Self>, id: LeaseId) -> DbResult<Linked<C::Connection>> {
        if let Some(linked) = self.link_existing(id) {
            return Ok(linked);
        }

        let _gate = self.open_gate.lock().await;
        if let Some(linked) = self.link_existing(id) {
            return Ok(linked);
        }

        lock_chain(&self.chain).state = ConnectionState::Connecting;
        tracing::info!(server = %self.connector.server_name(), "Connecting to database");

        match self.connector.connect().await {
            Ok(raw) => {
                let connection = SharedConnection::new(raw);
                let mut chain = lock_chain(&self.chain);
                chain.connection = Some(connection.clone());
                chain.state = ConnectionState::Connected;
                let linked = chain.link(id, connection);
                tracing::info!(server = %self.connector.server_name(), lease = %id, "Connected to database");
                Ok(linked)
            }
            Err(e) => {
                lock_chain(&self.chain).state = ConnectionState::ConnectionError;
                tracing::error!(
                    server = %self.connector.server_name(),
                    error = %e,
                    "Failed to open database connection"
                );
                Err(e)
            }
        }
    }

    fn is_linked(&self, seq: u64) -> bool {
        lock_chain(&self.chain).links.contains_key(&seq)
    }

    /// Removes a lease from the chain. Returns false if the lease had already
    /// been detached by `force_close_all`.
    fn unlink(self: &Arc<Self>, id: LeaseId, linked: &Linked<C::Connection>) -> bool {
        let mut chain = lock_chain(&self.chain);
        if chain.links.remove(&linked.seq).is_none() {
            tracing::debug!(lease = %id, "Lease was already detached");
            return false;
        }
        tracing::debug!(
            lease = %id,
            leases = chain.links.len(),
            tail = ?chain.tail(),
            "Lease unlinked"
        );
        if chain.links.is_empty() {
            self.schedule_close(&mut chain);
        }
        true
    }

    fn schedule_close(self: &Arc<Self>, chain: &mut Chain<C::Connection>) {
        if chain.connection.is_none() {
            return;
        }
        chain.close_at = Some(Instant::now() + self.settings.close_delay);
        if chain.close_task.is_some() {
            return;
        }
        tracing::debug!(delay = ?self.settings.close_delay, "Scheduling connection close");
        let shared = Arc::clone(self);
        chain.close_task = Some(self.runtime.spawn(shared.close_when_quiet()));
    }

    async fn close_when_quiet(self: Arc<Self>) {
        let mut wait = self
            .settings
            .close_check_interval
            .min(self.settings.close_delay);
        let connection = loop {
            tokio::time::sleep(wait).await;

            let mut chain = lock_chain(&self.chain);
            if !chain.links.is_empty() || chain.connection.is_none() {
                tracing::debug!("Connection back in use; close abandoned");
                chain.close_task = None;
                chain.close_at = None;
                return;
            }
            let remaining = chain.close_at.map_or(Duration::ZERO, |at| {
                at.saturating_duration_since(Instant::now())
            });
            if remaining.is_zero() {
                chain.close_task = None;
                chain.close_at = None;
                chain.state = ConnectionState::NotConnected;
                break chain.connection.take();
            }
            tracing::trace!(remaining = ?remaining, "Not ready to close");
            wait = remaining.min(self.settings.close_check_interval);
        };

        if let Some(connection) = connection {
            self.disconnect(connection).await;
        }
    }

    async fn disconnect(&self, connection: SharedConnection<C::Connection>) {
        let Some(raw) = connection.take().await else {
            return;
        };
        match self.connector.disconnect(raw).await {
            Ok(()) => {
                tracing::info!(server = %self.connector.server_name(), "Disconnected from database");
            }
            Err(e) => {
                tracing::error!(
                    server = %self.connector.server_name(),
                    error = %e,
                    "Error closing database connection"
                );
            }
        }
    }
}

/// Issues leases on the shared connection.
///
/// Cloning the manager yields another handle onto the same chain and
/// connection.
pub struct LeaseManager<C: Connector> {
    shared: Arc<Shared<C>>,
}

impl<C: Connector> Clone for LeaseManager<C> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C: Connector> std::fmt::Debug for LeaseManager<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseManager")
            .field("server", &self.shared.connector.server_name())
            .field("leases", &self.lease_count())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl<C: Connector> LeaseManager<C> {
    /// ## Summary
    /// Creates a manager with an empty chain and no connection.
    ///
    /// ## Errors
    /// Returns `DbError::NoRuntime` when called outside a tokio runtime; the
    /// delayed close runs on the runtime captured here.
    pub fn new(connector: C, settings: LeaseSettings) -> DbResult<Self> {
        let runtime = Handle::try_current().map_err(|_err| DbError::NoRuntime)?;
        Ok(Self {
            shared: Arc::new(Shared {
                connector,
                settings,
                runtime,
                next_lease_id: AtomicU64::new(1),
                open_gate: AsyncMutex::new(()),
                chain: Mutex::new(Chain {
                    links: BTreeMap::new(),
                    next_seq: 0,
                    connection: None,
                    state: ConnectionState::NotConnected,
                    close_at: None,
                    close_task: None,
                }),
            }),
        })
    }

    /// Allocates an unopened lease. The connection is not touched.
    #[must_use]
    pub fn acquire(&self) -> Lease<C> {
        let id = LeaseId(self.shared.next_lease_id.fetch_add(1, Ordering::Relaxed));
        Lease {
            id,
            shared: Arc::clone(&self.shared),
            slot: AsyncMutex::new(None),
        }
    }

    /// ## Summary
    /// Runs `callback` with the shared connection under a fresh lease. The lease
    /// is released whatever the callback returns.
    ///
    /// ## Errors
    /// Returns the error from opening the lease or from the callback.
    pub async fn with_connection<F, Fut, R>(&self, callback: F) -> DbResult<R>
    where
        F: FnOnce(SharedConnection<C::Connection>) -> Fut,
        Fut: Future<Output = DbResult<R>>,
    {
        let lease = self.acquire();
        let connection = lease.open().await?;
        let result = callback(connection).await;
        let closed = lease.close().await;
        let value = result?;
        closed?;
        Ok(value)
    }

    /// ## Summary
    /// Like `with_connection` for callbacks that produce no value.
    ///
    /// ## Errors
    /// Returns the error from opening the lease or from the callback.
    pub async fn run_with_connection<F, Fut>(&self, callback: F) -> DbResult<()>
    where
        F: FnOnce(SharedConnection<C::Connection>) -> Fut,
        Fut: Future<Output = DbResult<()>>,
    {
        self.with_connection(callback).await
    }

    /// ## Summary
    /// Tears everything down at once: cancels a pending delayed close, detaches
    /// every open lease without running its close logic, and closes the
    /// physical connection immediately.
    ///
    /// Holders of detached leases may still call `close()`; it succeeds without
    /// effect.
    #[tracing::instrument(skip(self))]
    pub async fn force_close_all(&self) {
        let connection = {
            let mut chain = lock_chain(&self.shared.chain);
            if let Some(task) = chain.close_task.take() {
                task.abort();
            }
            chain.close_at = None;
            let detached = chain.links.len();
            chain.links.clear();
            if chain.state == ConnectionState::Connected {
                chain.state = ConnectionState::NotConnected;
            }
            if detached > 0 {
                tracing::warn!(detached, "Detached open leases");
            }
            chain.connection.take()
        };

        if let Some(connection) = connection {
            self.shared.disconnect(connection).await;
        }
    }

    /// Number of leases currently linked into the chain.
    #[must_use]
    pub fn lease_count(&self) -> usize {
        lock_chain(&self.shared.chain).links.len()
    }

    /// Whether a physical connection currently exists.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        lock_chain(&self.shared.chain).connection.is_some()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock_chain(&self.shared.chain).state
    }

    #[must_use]
    pub fn connector(&self) -> &C {
        &self.shared.connector
    }
}

/// One consumer's claim on the shared connection.
///
/// A lease starts unopened. Dropping an open lease releases it like `close`.
pub struct Lease<C: Connector> {
    id: LeaseId,
    shared: Arc<Shared<C>>,
    slot: AsyncMutex<Option<Linked<C::Connection>>>,
}

impl<C: Connector> Lease<C> {
    #[must_use]
    pub fn id(&self) -> LeaseId {
        self.id
    }

    /// Whether this lease is linked into the chain.
    pub async fn is_open(&self) -> bool {
        match self.slot.lock().await.as_ref() {
            Some(linked) => self.shared.is_linked(linked.seq),
            None => false,
        }
    }

    /// ## Summary
    /// Links the lease to the chain tail and returns the shared connection,
    /// establishing it first if no other lease is open.
    ///
    /// ## Errors
    /// Returns `DbError::AlreadyOpen` if this lease is open, or the connector's
    /// error if the physical open fails. A failed open leaves the lease
    /// unlinked.
    #[tracing::instrument(skip(self), fields(lease = %self.id))]
    pub async fn open(&self) -> DbResult<SharedConnection<C::Connection>> {
        let mut slot = self.slot.lock().await;
        if let Some(linked) = slot.as_ref()
            && self.shared.is_linked(linked.seq)
        {
            return Err(DbError::AlreadyOpen(self.id));
        }

        let linked = self.shared.link(self.id).await?;
        let connection = linked.connection.clone();
        *slot = Some(linked);
        Ok(connection)
    }

    /// ## Summary
    /// Unlinks the lease. Closing the last open lease starts the grace period.
    ///
    /// ## Errors
    /// Returns `DbError::NotOpen` if the lease was never opened or is already
    /// closed.
    #[tracing::instrument(skip(self), fields(lease = %self.id))]
    pub async fn close(&self) -> DbResult<()> {
        let mut slot = self.slot.lock().await;
        let Some(linked) = slot.take() else {
            return Err(DbError::NotOpen(self.id));
        };
        self.shared.unlink(self.id, &linked);
        Ok(())
    }
}

impl<C: Connector> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(linked) = self.slot.get_mut().take() {
            self.shared.unlink(self.id, &linked);
        }
    }
}
