//! Listener registry for alert notifications.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertEvent {
    Started,
    Stopped,
    /// The alerting set went from empty to non-empty or back.
    AlertingChanged(bool),
    /// The contents of the alerting set changed.
    AlertsChanged { count: usize },
    /// A periodic poll failed and the monitor restarted itself.
    PollFailed { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&AlertEvent) + Send + Sync>;

/// ## Summary
/// A set of callbacks notified of every `AlertEvent`.
///
/// Dispatch iterates over a snapshot of the registered listeners, so a
/// listener may add or remove listeners (itself included) while being called.
#[derive(Clone, Default)]
pub struct AlertListeners {
    next_id: Arc<AtomicU64>,
    listeners: Arc<RwLock<Vec<(ListenerId, Listener)>>>,
}

impl std::fmt::Debug for AlertListeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AlertListeners")
            .field("count", &self.len())
            .finish()
    }
}

impl AlertListeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&AlertEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push((id, Arc::new(listener)));
        id
    }

    /// Returns false if no listener was registered under `id`.
    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dispatch(&self, event: &AlertEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in snapshot {
            listener(event);
        }
    }
}
