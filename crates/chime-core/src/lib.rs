//! Shared configuration, identifiers and the core error type for chime.

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
