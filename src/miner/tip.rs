use std::sync::atomic::Ordering;
use std::sync::Arc;

use super::EngineShared;

/// Adapter between the node's tip notifications and the coordinator.
///
/// Cheap to clone; the node keeps one and calls [`tip_changed`] from its
/// block-connected path. The watcher only flips state and never takes engine
/// locks, so it is safe to call from inside the node's own locking.
///
/// Notifications coalesce: a full channel already means a wake-up is pending,
/// so dropping the send loses nothing.
///
/// [`tip_changed`]: TipWatcher::tip_changed
#[derive(Clone)]
pub struct TipWatcher {
    shared: Arc<EngineShared>,
}

impl TipWatcher {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        Self { shared }
    }

    pub fn tip_changed(&self) {
        if !self.shared.running.load(Ordering::Acquire) {
            return;
        }
        // A fresh tip is the strongest signal that conditions recovered.
        self.shared.backoff_level.store(0, Ordering::Relaxed);
        let _ = self.shared.tip_tx.try_send(());
    }
}
