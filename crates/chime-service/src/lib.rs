//! Appointment alerting: the alert book and the polling monitor that feeds it.

pub mod alert;
pub mod error;
