pub mod book;
pub mod clock;
pub mod events;
pub mod monitor;

pub use book::{AlertBook, in_alert_window};
pub use clock::{Clock, SystemClock};
pub use events::{AlertEvent, AlertListeners, ListenerId};
pub use monitor::{AlertMonitor, MonitorSettings, MonitorState, MonitorStatus};
