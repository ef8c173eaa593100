//! The alert book: which appointments are alerting, dismissed or snoozed.
//!
//! Every appointment key lives in at most one of the three collections. The
//! book never reads the clock itself; callers pass `now` so that the periodic
//! merge and the live change handlers apply the same window test.

use std::collections::{HashMap, HashSet};

use chime_core::types::AppointmentId;
use chime_db::model::appointment::AppointmentSnapshot;
use chrono::{DateTime, TimeDelta, Utc};

/// ## Summary
/// True when an appointment belongs in the alerting set at `now`: it has not
/// ended yet and starts no later than `lead_time` from now.
#[must_use]
pub fn in_alert_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    now: DateTime<Utc>,
    lead_time: TimeDelta,
) -> bool {
    now < end && now + lead_time >= start
}

#[derive(Debug, Clone)]
struct Dismissal {
    until: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct Snooze {
    wake_at: DateTime<Utc>,
    snapshot: AppointmentSnapshot,
}

#[derive(Debug, Clone)]
pub struct AlertBook {
    lead_time: TimeDelta,
    /// Sorted by (start, end).
    alerting: Vec<AppointmentSnapshot>,
    dismissed: HashMap<AppointmentId, Dismissal>,
    snoozed: HashMap<AppointmentId, Snooze>,
}

impl AlertBook {
    #[must_use]
    pub fn new(lead_time: TimeDelta) -> Self {
        Self {
            lead_time,
            alerting: Vec::new(),
            dismissed: HashMap::new(),
            snoozed: HashMap::new(),
        }
    }

    #[must_use]
    pub fn lead_time(&self) -> TimeDelta {
        self.lead_time
    }

    /// Currently alerting appointments, ordered by start then end.
    #[must_use]
    pub fn alerts(&self) -> &[AppointmentSnapshot] {
        &self.alerting
    }

    #[must_use]
    pub fn is_alerting(&self) -> bool {
        !self.alerting.is_empty()
    }

    #[must_use]
    pub fn is_listed(&self, id: AppointmentId) -> bool {
        self.position(id).is_some()
    }

    #[must_use]
    pub fn dismissed_until(&self, id: AppointmentId) -> Option<DateTime<Utc>> {
        self.dismissed.get(&id).map(|d| d.until)
    }

    #[must_use]
    pub fn snoozed_until(&self, id: AppointmentId) -> Option<DateTime<Utc>> {
        self.snoozed.get(&id).map(|s| s.wake_at)
    }

    fn position(&self, id: AppointmentId) -> Option<usize> {
        self.alerting.iter().position(|a| a.id == id)
    }

    fn sort(&mut self) {
        if self.alerting.len() > 1 {
            self.alerting.sort_by(AppointmentSnapshot::compare_by_dates);
        }
    }

    /// Places or removes a fetched appointment according to the window test,
    /// without re-sorting.
    fn place(&mut self, snapshot: AppointmentSnapshot, now: DateTime<Utc>) {
        let position = self.position(snapshot.id);
        if in_alert_window(snapshot.start, snapshot.end, now, self.lead_time) {
            match position {
                Some(index) => {
                    if self.alerting[index].dates_differ(&snapshot) {
                        tracing::debug!(appointment = %snapshot.id, "Alerting appointment rescheduled");
                    }
                    self.alerting[index] = snapshot;
                }
                None => self.alerting.push(snapshot),
            }
        } else if let Some(index) = position {
            self.alerting.remove(index);
        }
    }

    /// ## Summary
    /// Single-appointment check shared by the periodic merge and the change
    /// handlers: inserts or refreshes the appointment when it is inside its
    /// alert window, removes it otherwise.
    ///
    /// Returns whether the alerting flag flipped.
    pub fn insert_or_update(&mut self, snapshot: AppointmentSnapshot, now: DateTime<Utc>) -> bool {
        let was_alerting = self.is_alerting();
        self.place(snapshot, now);
        self.sort();
        was_alerting != self.is_alerting()
    }

    /// Moves snoozed entries whose wake time has passed back into the
    /// alerting set, provided they are still inside their window.
    fn wake_due(&mut self, now: DateTime<Utc>) {
        let due: Vec<AppointmentId> = self
            .snoozed
            .iter()
            .filter(|(_, snooze)| snooze.wake_at <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in due {
            if let Some(snooze) = self.snoozed.remove(&id) {
                tracing::debug!(appointment = %id, "Snooze elapsed");
                self.place(snooze.snapshot, now);
            }
        }
    }

    /// ## Summary
    /// Merges the result of a periodic poll.
    ///
    /// Snoozes that are due wake up first. Each fetched appointment that is
    /// neither dismissed nor snoozed then goes through `insert_or_update`;
    /// alerting entries the poll no longer returned are dropped. Expired
    /// dismissals are purged last.
    ///
    /// A dismissal is lifted early when the fetched appointment has moved to
    /// different times. Snoozed appointments missing from the poll are
    /// forgotten.
    ///
    /// Returns whether the alerting flag flipped.
    pub fn merge(&mut self, fetched: Vec<AppointmentSnapshot>, now: DateTime<Utc>) -> bool {
        let was_alerting = self.is_alerting();
        self.wake_due(now);

        let mut unconfirmed: HashSet<AppointmentId> =
            self.alerting.iter().map(|a| a.id).collect();
        let mut still_snoozed = HashSet::new();

        for snapshot in fetched {
            let id = snapshot.id;
            if let Some(dismissal) = self.dismissed.get(&id) {
                if dismissal.start == snapshot.start && dismissal.end == snapshot.end {
                    continue;
                }
                tracing::debug!(appointment = %id, "Dismissed appointment was rescheduled");
                self.dismissed.remove(&id);
            }
            if let Some(snooze) = self.snoozed.get_mut(&id) {
                snooze.snapshot = snapshot;
                still_snoozed.insert(id);
                continue;
            }
            unconfirmed.remove(&id);
            self.place(snapshot, now);
        }

        self.alerting.retain(|a| !unconfirmed.contains(&a.id));
        self.snoozed.retain(|id, _| still_snoozed.contains(id));
        self.dismissed.retain(|_, d| d.until > now);
        self.sort();

        was_alerting != self.is_alerting()
    }

    /// ## Summary
    /// Applies an "appointment inserted/updated" notification. Repeating the
    /// same notification has no further effect.
    ///
    /// Returns whether the alerting flag flipped.
    pub fn apply_change(&mut self, snapshot: AppointmentSnapshot, now: DateTime<Utc>) -> bool {
        let id = snapshot.id;
        if let Some(dismissal) = self.dismissed.get(&id) {
            if dismissal.start == snapshot.start && dismissal.end == snapshot.end {
                return false;
            }
            self.dismissed.remove(&id);
        }
        if self.snoozed.contains_key(&id) {
            if in_alert_window(snapshot.start, snapshot.end, now, self.lead_time) {
                if let Some(snooze) = self.snoozed.get_mut(&id) {
                    snooze.snapshot = snapshot;
                }
            } else {
                self.snoozed.remove(&id);
            }
            return false;
        }
        self.insert_or_update(snapshot, now)
    }

    /// ## Summary
    /// Forgets a deleted appointment wherever it is held.
    ///
    /// Returns whether the alerting flag flipped.
    pub fn apply_delete(&mut self, id: AppointmentId) -> bool {
        let was_alerting = self.is_alerting();
        self.dismissed.remove(&id);
        self.snoozed.remove(&id);
        if let Some(index) = self.position(id) {
            self.alerting.remove(index);
        }
        was_alerting != self.is_alerting()
    }

    fn dismissal_for(&self, snapshot: &AppointmentSnapshot, now: DateTime<Utc>) -> Dismissal {
        Dismissal {
            until: snapshot.end.max(now + self.lead_time),
            start: snapshot.start,
            end: snapshot.end,
        }
    }

    /// ## Summary
    /// Suppresses an alerting or snoozed appointment until it has ended.
    ///
    /// Returns false if the appointment was neither alerting nor snoozed.
    pub fn dismiss(&mut self, id: AppointmentId, now: DateTime<Utc>) -> bool {
        let snapshot = if let Some(index) = self.position(id) {
            self.alerting.remove(index)
        } else if let Some(snooze) = self.snoozed.remove(&id) {
            snooze.snapshot
        } else {
            return false;
        };
        let dismissal = self.dismissal_for(&snapshot, now);
        tracing::debug!(appointment = %id, until = %dismissal.until, "Appointment dismissed");
        self.dismissed.insert(id, dismissal);
        true
    }

    /// ## Summary
    /// Takes an alerting appointment out of the set until `wake_at`, or moves
    /// the wake time of one that is already snoozed.
    ///
    /// Returns false if the appointment was neither alerting nor snoozed.
    pub fn snooze(&mut self, id: AppointmentId, wake_at: DateTime<Utc>) -> bool {
        if let Some(snooze) = self.snoozed.get_mut(&id) {
            snooze.wake_at = wake_at;
            return true;
        }
        let Some(index) = self.position(id) else {
            return false;
        };
        let snapshot = self.alerting.remove(index);
        tracing::debug!(appointment = %id, wake_at = %wake_at, "Appointment snoozed");
        self.snoozed.insert(id, Snooze { wake_at, snapshot });
        true
    }

    /// Dismisses every alerting appointment. Returns how many were dismissed.
    pub fn dismiss_all(&mut self, now: DateTime<Utc>) -> usize {
        let alerting = std::mem::take(&mut self.alerting);
        let count = alerting.len();
        for snapshot in alerting {
            let dismissal = self.dismissal_for(&snapshot, now);
            self.dismissed.insert(snapshot.id, dismissal);
        }
        count
    }

    /// Snoozes every alerting appointment. Returns how many were snoozed.
    pub fn snooze_all(&mut self, wake_at: DateTime<Utc>) -> usize {
        let alerting = std::mem::take(&mut self.alerting);
        let count = alerting.len();
        for snapshot in alerting {
            self.snoozed
                .insert(snapshot.id, Snooze { wake_at, snapshot });
        }
        count
    }
}
