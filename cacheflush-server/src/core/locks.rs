use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard proving exclusive flush access to one layer. Dropping it releases the layer.
pub struct LayerGuard {
    layer_id: String,
    held: Arc<Mutex<HashSet<String>>>,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for LayerGuard {
    fn drop(&mut self) {
        // Runs before `_guard` releases the mutex, so no new holder can be
        // registered for this layer until the entry is gone
        self.held.lock().remove(&self.layer_id);
    }
}

/// Per-layer mutual exclusion shared by every flush operation
#[derive(Clone, Default)]
pub struct LayerLocks {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    /// Layers with a live guard; observers read this and never touch the mutexes
    held: Arc<Mutex<HashSet<String>>>,
}

impl LayerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, layer_id: &str) -> Arc<AsyncMutex<()>> {
        self.locks
            .lock()
            .entry(layer_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn guard(&self, layer_id: &str, guard: OwnedMutexGuard<()>) -> LayerGuard {
        self.held.lock().insert(layer_id.to_string());
        LayerGuard {
            layer_id: layer_id.to_string(),
            held: self.held.clone(),
            _guard: guard,
        }
    }

    /// Take the layer lock if nobody holds it
    pub fn try_acquire(&self, layer_id: &str) -> Option<LayerGuard> {
        let guard = self.lock_for(layer_id).try_lock_owned().ok()?;
        Some(self.guard(layer_id, guard))
    }

    /// Wait for the layer lock, giving up after `max_wait`
    pub async fn acquire(&self, layer_id: &str, max_wait: Duration) -> Option<LayerGuard> {
        let lock = self.lock_for(layer_id);
        let guard = tokio::time::timeout(max_wait, lock.lock_owned())
            .await
            .ok()?;
        Some(self.guard(layer_id, guard))
    }

    /// Check whether some operation is currently flushing `layer_id`
    pub fn is_locked(&self, layer_id: &str) -> bool {
        self.held.lock().contains(layer_id)
    }
}
