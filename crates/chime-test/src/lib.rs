//! Chime appointment alert service - integration test support.
//!
//! Re-exports the workspace crates under one `component` path and provides
//! the doubles that stand in for the database and the wall clock.

#![allow(ambiguous_glob_reexports)]

pub mod fixtures;

pub mod component {
    pub use chime_core::*;
    pub use chime_service::*;

    pub mod db {
        pub use chime_db::db::*;
    }

    pub mod model {
        pub use chime_db::model::*;
    }

    pub mod config {
        pub use chime_app::config::ConfigHandler;
        pub use chime_core::config::*;
    }

    pub mod app {
        pub use chime_app::app::api::*;
        pub use chime_app::monitor_handler::MonitorHandler;
    }
}
