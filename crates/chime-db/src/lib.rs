//! Database layer for chime: the shared connection lease manager, the
//! appointment schema and the time-windowed appointment query.

pub mod db;
pub mod error;
pub mod model;
