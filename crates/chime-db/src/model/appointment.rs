//! Models for the appointment table.

use std::cmp::Ordering;

use chime_core::error::{CoreError, CoreResult};
use chime_core::types::{AppointmentId, UserId};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::db::schema::appointment;

/// Appointment row.
#[derive(Debug, Clone, Queryable, Selectable, Identifiable)]
#[diesel(table_name = appointment)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Appointment {
    pub id: i32,
    pub customer_id: i32,
    /// Owner whose alerts include this appointment.
    pub user_id: i32,
    pub title: String,
    pub description: String,
    pub location: String,
    pub contact: String,
    pub appointment_type: String,
    pub url: String,
    /// Start time in UTC.
    pub start_at: DateTime<Utc>,
    /// End time in UTC.
    pub end_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read-only projection of an appointment, as seen by the alert monitor.
///
/// Identity is the primary key; two snapshots of the same row compare by key
/// in the alert book, never by reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentSnapshot {
    pub id: AppointmentId,
    pub user_id: UserId,
    pub customer_id: i32,
    pub title: String,
    pub location: String,
    pub contact: String,
    pub appointment_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl AppointmentSnapshot {
    /// Orders by start, then end.
    #[must_use]
    pub fn compare_by_dates(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.end.cmp(&other.end))
    }

    /// Whether `other` moves the appointment in time.
    #[must_use]
    pub fn dates_differ(&self, other: &Self) -> bool {
        self.start != other.start || self.end != other.end
    }

    /// ## Summary
    /// Checks that the appointment does not end before it starts.
    ///
    /// ## Errors
    /// Returns `CoreError::ValidationError` for an inverted time range.
    pub fn validate(&self) -> CoreResult<()> {
        if self.end < self.start {
            return Err(CoreError::ValidationError(format!(
                "appointment {} ends before it starts",
                self.id
            )));
        }
        Ok(())
    }
}

impl From<Appointment> for AppointmentSnapshot {
    fn from(row: Appointment) -> Self {
        Self {
            id: AppointmentId(row.id),
            user_id: UserId(row.user_id),
            customer_id: row.customer_id,
            title: row.title,
            location: row.location,
            contact: row.contact,
            appointment_type: row.appointment_type,
            start: row.start_at,
            end: row.end_at,
        }
    }
}
