//! HTTP surface of the chime alert service.

pub mod app;
pub mod config;
pub mod error;
pub mod monitor_handler;
