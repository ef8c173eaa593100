//! Periodic appointment alert monitor.
//!
//! All alert state is owned by one coordination task. Poll completions,
//! change notifications and user actions reach it as messages over a single
//! queue, so merges never interleave. Polls run in their own tasks and only
//! report back through that queue.

use std::sync::Arc;
use std::time::Duration;

use chime_core::config::{AlertConfig, OverlapPolicy};
use chime_core::error::CoreError;
use chime_core::types::{AppointmentId, UserId};
use chime_db::db::query::appointment::AppointmentSource;
use chime_db::error::DbResult;
use chime_db::model::appointment::AppointmentSnapshot;
use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::Instrument;

use crate::alert::book::AlertBook;
use crate::alert::clock::Clock;
use crate::alert::events::{AlertEvent, AlertListeners};
use crate::error::{ServiceError, ServiceResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Owner whose appointments are polled.
    pub user: UserId,
    pub lead_time: TimeDelta,
    pub check_frequency: Duration,
    pub overlap: OverlapPolicy,
}

impl MonitorSettings {
    #[must_use]
    pub fn new(user: UserId, config: &AlertConfig) -> Self {
        Self {
            user,
            lead_time: config.lead_time(),
            check_frequency: config.check_frequency(),
            overlap: config.overlap,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorState {
    Stopped,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorStatus {
    pub state: MonitorState,
    /// A poll is outstanding.
    pub checking: bool,
    /// Time the most recent poll was issued for.
    pub last_check: Option<DateTime<Utc>>,
    /// Message of the last poll failure, until cleared.
    pub fault: Option<String>,
}

impl MonitorStatus {
    fn stopped() -> Self {
        Self {
            state: MonitorState::Stopped,
            checking: false,
            last_check: None,
            fault: None,
        }
    }
}

enum Command {
    Start,
    Stop,
    PollFinished(DbResult<Vec<AppointmentSnapshot>>),
    Changed(AppointmentSnapshot),
    Deleted(AppointmentId),
    Dismiss(AppointmentId, oneshot::Sender<bool>),
    Snooze(AppointmentId, DateTime<Utc>, oneshot::Sender<bool>),
    DismissAll(oneshot::Sender<usize>),
    SnoozeAll(DateTime<Utc>, oneshot::Sender<usize>),
    ClearFault,
    Shutdown(oneshot::Sender<()>),
}

/// Cloneable handle on the monitor's coordination task.
#[derive(Clone)]
pub struct AlertMonitor {
    commands: mpsc::UnboundedSender<Command>,
    clock: Arc<dyn Clock>,
    alerting: watch::Receiver<bool>,
    alerts: watch::Receiver<Arc<[AppointmentSnapshot]>>,
    status: watch::Receiver<MonitorStatus>,
    listeners: AlertListeners,
}

impl std::fmt::Debug for AlertMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertMonitor")
            .field("status", &*self.status.borrow())
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}

impl AlertMonitor {
    /// ## Summary
    /// Spawns the coordination task in the stopped state and returns a handle
    /// on it. The task ends once every handle has been dropped or
    /// `shutdown` is called.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<S, C>(source: S, clock: C, settings: MonitorSettings) -> Self
    where
        S: AppointmentSource,
        C: Clock,
    {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (alerting_tx, alerting) = watch::channel(false);
        let (alerts_tx, alerts) = watch::channel(Arc::<[AppointmentSnapshot]>::from(Vec::new()));
        let (status_tx, status) = watch::channel(MonitorStatus::stopped());
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let listeners = AlertListeners::new();

        let coordinator = Coordinator {
            source: Arc::new(source),
            clock: Arc::clone(&clock),
            settings,
            book: AlertBook::new(settings.lead_time),
            state: MonitorState::Stopped,
            in_flight: 0,
            last_check: None,
            fault: None,
            ticker: None,
            commands: commands_tx.downgrade(),
            alerting_tx,
            alerts_tx,
            status_tx,
            listeners: listeners.clone(),
        };
        let span = tracing::info_span!("alert_monitor", user = %settings.user);
        tokio::spawn(coordinator.run(commands_rx).instrument(span));

        Self {
            commands: commands_tx,
            clock,
            alerting,
            alerts,
            status,
            listeners,
        }
    }

    fn send(&self, command: Command) -> ServiceResult<()> {
        self.commands
            .send(command)
            .map_err(|_closed| ServiceError::MonitorUnavailable)
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> ServiceResult<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx))?;
        reply_rx
            .await
            .map_err(|_dropped| ServiceError::MonitorUnavailable)
    }

    /// ## Summary
    /// Starts polling. The first poll runs immediately, then one per check
    /// period. Starting a running monitor has no effect.
    ///
    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` after shutdown.
    pub fn start(&self) -> ServiceResult<()> {
        self.send(Command::Start)
    }

    /// ## Summary
    /// Stops future ticks. A poll already in flight still completes and is
    /// merged.
    ///
    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` after shutdown.
    pub fn stop(&self) -> ServiceResult<()> {
        self.send(Command::Stop)
    }

    /// ## Summary
    /// Notification that an appointment was created.
    ///
    /// ## Errors
    /// Returns `ServiceError::CoreError` for an appointment that ends before
    /// it starts, or `ServiceError::MonitorUnavailable` after shutdown.
    pub fn on_inserted(&self, appointment: AppointmentSnapshot) -> ServiceResult<()> {
        appointment.validate()?;
        self.send(Command::Changed(appointment))
    }

    /// ## Summary
    /// Notification that an appointment was edited.
    ///
    /// ## Errors
    /// Same as [`AlertMonitor::on_inserted`].
    pub fn on_updated(&self, appointment: AppointmentSnapshot) -> ServiceResult<()> {
        appointment.validate()?;
        self.send(Command::Changed(appointment))
    }

    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` after shutdown.
    pub fn on_deleted(&self, id: AppointmentId) -> ServiceResult<()> {
        self.send(Command::Deleted(id))
    }

    /// ## Summary
    /// Dismisses an alerting (or snoozed) appointment until it ends.
    ///
    /// Returns false when the appointment was not alerting.
    ///
    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` after shutdown.
    pub async fn dismiss(&self, id: AppointmentId) -> ServiceResult<bool> {
        self.request(|reply| Command::Dismiss(id, reply)).await
    }

    /// ## Summary
    /// Snoozes an alerting appointment for `duration` from now.
    ///
    /// ## Errors
    /// Returns `CoreError::ValidationError` if the wake time is not
    /// representable, and `ServiceError::MonitorUnavailable` after shutdown.
    pub async fn snooze(&self, id: AppointmentId, duration: TimeDelta) -> ServiceResult<bool> {
        let wake_at = self.wake_time(duration)?;
        self.snooze_until(id, wake_at).await
    }

    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` after shutdown.
    pub async fn snooze_until(
        &self,
        id: AppointmentId,
        wake_at: DateTime<Utc>,
    ) -> ServiceResult<bool> {
        self.request(|reply| Command::Snooze(id, wake_at, reply))
            .await
    }

    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` after shutdown.
    pub async fn dismiss_all(&self) -> ServiceResult<usize> {
        self.request(Command::DismissAll).await
    }

    /// ## Errors
    /// Returns `CoreError::ValidationError` if the wake time is not
    /// representable, and `ServiceError::MonitorUnavailable` after shutdown.
    pub async fn snooze_all(&self, duration: TimeDelta) -> ServiceResult<usize> {
        let wake_at = self.wake_time(duration)?;
        self.request(|reply| Command::SnoozeAll(wake_at, reply))
            .await
    }

    fn wake_time(&self, duration: TimeDelta) -> ServiceResult<DateTime<Utc>> {
        self.clock.now().checked_add_signed(duration).ok_or_else(|| {
            CoreError::ValidationError(format!(
                "Snooze of {} minutes is out of range",
                duration.num_minutes()
            ))
            .into()
        })
    }

    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` after shutdown.
    pub fn clear_fault(&self) -> ServiceResult<()> {
        self.send(Command::ClearFault)
    }

    #[must_use]
    pub fn is_alerting(&self) -> bool {
        *self.alerting.borrow()
    }

    /// Alerting appointments ordered by start then end.
    #[must_use]
    pub fn alerts(&self) -> Arc<[AppointmentSnapshot]> {
        self.alerts.borrow().clone()
    }

    #[must_use]
    pub fn status(&self) -> MonitorStatus {
        self.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_alerting(&self) -> watch::Receiver<bool> {
        self.alerting.clone()
    }

    #[must_use]
    pub fn subscribe_alerts(&self) -> watch::Receiver<Arc<[AppointmentSnapshot]>> {
        self.alerts.clone()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    #[must_use]
    pub fn listeners(&self) -> &AlertListeners {
        &self.listeners
    }

    /// ## Summary
    /// Stops the monitor and ends the coordination task. Polls still in flight
    /// are discarded.
    ///
    /// ## Errors
    /// Returns `ServiceError::MonitorUnavailable` if the task had already
    /// shut down.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> ServiceResult<()> {
        self.request(Command::Shutdown).await
    }
}

enum Step {
    Tick,
    Command(Command),
    Closed,
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

struct Coordinator {
    source: Arc<dyn AppointmentSource>,
    clock: Arc<dyn Clock>,
    settings: MonitorSettings,
    book: AlertBook,
    state: MonitorState,
    in_flight: usize,
    last_check: Option<DateTime<Utc>>,
    fault: Option<String>,
    ticker: Option<Interval>,
    commands: mpsc::WeakUnboundedSender<Command>,
    alerting_tx: watch::Sender<bool>,
    alerts_tx: watch::Sender<Arc<[AppointmentSnapshot]>>,
    status_tx: watch::Sender<MonitorStatus>,
    listeners: AlertListeners,
}

impl Coordinator {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        loop {
            let step = tokio::select! {
                command = commands.recv() => command.map_or(Step::Closed, Step::Command),
                () = next_tick(&mut self.ticker) => Step::Tick,
            };
            match step {
                Step::Tick => self.on_tick(),
                Step::Command(Command::Shutdown(ack)) => {
                    self.halt();
                    if ack.send(()).is_err() {
                        tracing::debug!("Shutdown requester went away");
                    }
                    break;
                }
                Step::Command(command) => self.handle(command),
                Step::Closed => {
                    self.halt();
                    break;
                }
            }
            self.publish_status();
        }
        tracing::debug!("Alert monitor task finished");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Start => self.start(),
            Command::Stop => self.stop(),
            Command::PollFinished(result) => self.poll_finished(result),
            Command::Changed(appointment) => {
                let now = self.clock.now();
                let flipped = self.book.apply_change(appointment, now);
                self.publish(flipped);
            }
            Command::Deleted(id) => {
                let flipped = self.book.apply_delete(id);
                self.publish(flipped);
            }
            Command::Dismiss(id, reply) => {
                let was_alerting = self.book.is_alerting();
                let found = self.book.dismiss(id, self.clock.now());
                self.publish(was_alerting != self.book.is_alerting());
                reply_with(reply, found);
            }
            Command::Snooze(id, wake_at, reply) => {
                let was_alerting = self.book.is_alerting();
                let found = self.book.snooze(id, wake_at);
                self.publish(was_alerting != self.book.is_alerting());
                reply_with(reply, found);
            }
            Command::DismissAll(reply) => {
                let count = self.book.dismiss_all(self.clock.now());
                self.publish(count > 0);
                reply_with(reply, count);
            }
            Command::SnoozeAll(wake_at, reply) => {
                let count = self.book.snooze_all(wake_at);
                self.publish(count > 0);
                reply_with(reply, count);
            }
            Command::ClearFault => self.fault = None,
            Command::Shutdown(_) => {}
        }
    }

    fn start(&mut self) {
        if self.state == MonitorState::Running {
            tracing::debug!("Alert monitor already running");
            return;
        }
        self.start_ticker(Instant::now());
        tracing::info!(
            check_frequency = ?self.settings.check_frequency,
            lead_time_minutes = self.settings.lead_time.num_minutes(),
            "Alert monitor started"
        );
        self.listeners.dispatch(&AlertEvent::Started);
    }

    fn start_ticker(&mut self, first_tick: Instant) {
        let mut ticker = tokio::time::interval_at(first_tick, self.settings.check_frequency);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.state = MonitorState::Running;
    }

    fn stop(&mut self) {
        if self.state == MonitorState::Stopped {
            return;
        }
        self.ticker = None;
        self.state = MonitorState::Stopped;
        tracing::info!("Alert monitor stopped");
        self.listeners.dispatch(&AlertEvent::Stopped);
    }

    fn halt(&mut self) {
        self.stop();
        self.publish_status();
    }

    fn on_tick(&mut self) {
        if self.in_flight > 0 && self.settings.overlap == OverlapPolicy::Skip {
            tracing::warn!(
                in_flight = self.in_flight,
                "Previous appointment check still running, skipping tick"
            );
            return;
        }
        self.spawn_poll();
    }

    fn spawn_poll(&mut self) {
        let now = self.clock.now();
        let to = now + self.settings.lead_time;
        self.in_flight += 1;
        self.last_check = Some(now);

        let source = Arc::clone(&self.source);
        let commands = self.commands.clone();
        let user = self.settings.user;
        let span = tracing::debug_span!("appointment_check", from = %now, to = %to);
        tokio::spawn(
            async move {
                let result = source.load_window(user, now, to).await;
                let Some(commands) = commands.upgrade() else {
                    return;
                };
                if commands.send(Command::PollFinished(result)).is_err() {
                    tracing::debug!("Alert monitor gone before poll finished");
                }
            }
            .instrument(span),
        );
    }

    fn poll_finished(&mut self, result: DbResult<Vec<AppointmentSnapshot>>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        match result {
            Ok(appointments) => {
                let now = self.clock.now();
                let count = appointments.len();
                let flipped = self.book.merge(appointments, now);
                tracing::debug!(fetched = count, alerting = self.book.alerts().len(), "Merged appointment check");
                self.publish(flipped);
            }
            Err(error) => self.poll_failed(ServiceError::PollQueryError(error)),
        }
    }

    /// Stops, reports and restarts. The restarted monitor waits one full
    /// period before polling again.
    fn poll_failed(&mut self, error: ServiceError) {
        let message = error.to_string();
        tracing::error!(error = %message, "Appointment check failed");
        let was_running = self.state == MonitorState::Running;
        self.stop();
        self.fault = Some(message.clone());
        self.listeners.dispatch(&AlertEvent::PollFailed { message });
        if was_running {
            self.start_ticker(Instant::now() + self.settings.check_frequency);
            tracing::info!("Alert monitor restarted after failed check");
            self.listeners.dispatch(&AlertEvent::Started);
        }
    }

    fn publish(&self, flipped: bool) {
        let alerts = self.book.alerts();
        let list_changed = self.alerts_tx.send_if_modified(|current| {
            if current.as_ref() == alerts {
                false
            } else {
                *current = Arc::from(alerts);
                true
            }
        });
        if list_changed {
            self.listeners.dispatch(&AlertEvent::AlertsChanged {
                count: alerts.len(),
            });
        }

        let alerting = self.book.is_alerting();
        if flipped {
            tracing::info!(alerting, "Alerting state changed");
        }
        let flag_changed = self.alerting_tx.send_if_modified(|current| {
            if *current == alerting {
                false
            } else {
                *current = alerting;
                true
            }
        });
        if flag_changed {
            self.listeners
                .dispatch(&AlertEvent::AlertingChanged(alerting));
        }
    }

    fn publish_status(&self) {
        let status = MonitorStatus {
            state: self.state,
            checking: self.in_flight > 0,
            last_check: self.last_check,
            fault: self.fault.clone(),
        };
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

fn reply_with<T>(reply: oneshot::Sender<T>, value: T) {
    if reply.send(value).is_err() {
        tracing::debug!("Requester dropped before reply");
    }
}
