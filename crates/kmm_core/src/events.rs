//! Notifications from the manager to whoever displays its state.

use camino::Utf8PathBuf;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    /// A discovery scan finished and the new state is in place.
    ScanComplete { mods: usize, conflicts: usize },
    /// The conflict set changed (toggle, reorder, rescan).
    ConflictsChanged { conflicts: usize },
    /// One conflict identity was processed.
    MergeProgress {
        current: usize,
        total: usize,
        identity: String,
    },
    /// A merge run finished and its output is installed.
    MergeComplete {
        merged: usize,
        skipped: usize,
        archives: Vec<Utf8PathBuf>,
    },
}

pub type EventListener = Arc<dyn Fn(&ManagerEvent) + Send + Sync>;

/// Registered listeners. Events are delivered outside the internal lock so a
/// listener may register further listeners. Clones share the listener list.
#[derive(Default, Clone)]
pub struct EventBus {
    listeners: Arc<Mutex<Vec<EventListener>>>,
}

impl EventBus {
    pub fn subscribe(&self, listener: EventListener) {
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push(listener),
            Err(e) => tracing::error!("Failed to lock listeners: {}", e),
        }
    }

    pub fn emit(&self, event: ManagerEvent) {
        let listeners = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(e) => {
                tracing::error!("Failed to lock listeners: {}", e);
                return;
            }
        };

        tracing::trace!(?event, "emitting event");
        for listener in listeners {
            listener(&event);
        }
    }
}
