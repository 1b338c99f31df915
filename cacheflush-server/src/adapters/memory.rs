use super::{AdapterError, FlushAdapter, FlushOutcome};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Default)]
struct Entries {
    data: HashMap<String, Vec<u8>>,
    total_bytes: u64,
}

/// In-process key/value cache backing a memory layer
#[derive(Clone, Default)]
pub struct MemoryCache {
    inner: Arc<RwLock<Entries>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put value into cache, replacing any previous value for `key`
    pub fn put(&self, key: impl Into<String>, value: Vec<u8>) {
        let mut inner = self.inner.write();
        inner.total_bytes += value.len() as u64;
        if let Some(old) = inner.data.insert(key.into(), value) {
            inner.total_bytes = inner.total_bytes.saturating_sub(old.len() as u64);
        }
    }

    /// Drop every entry, returning `(entries, bytes)` removed
    pub fn invalidate_all(&self) -> (u64, u64) {
        let mut inner = self.inner.write();
        let entries = inner.data.len() as u64;
        let bytes = std::mem::take(&mut inner.total_bytes);
        inner.data.clear();
        (entries, bytes)
    }

    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().data.is_empty()
    }

    /// Bytes currently held
    pub fn total_bytes(&self) -> u64 {
        self.inner.read().total_bytes
    }
}

/// Adapter clearing a [`MemoryCache`]
pub struct MemoryCacheAdapter {
    cache: MemoryCache,
}

impl MemoryCacheAdapter {
    pub fn new(cache: MemoryCache) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl FlushAdapter for MemoryCacheAdapter {
    async fn flush(
        &self,
        layer_id: &str,
        _timeout: Duration,
    ) -> std::result::Result<FlushOutcome, AdapterError> {
        let (entries, bytes) = self.cache.invalidate_all();
        debug!(
            "Memory layer {} flushed: {} entries, {} bytes",
            layer_id, entries, bytes
        );
        Ok(FlushOutcome::from_bytes(entries, bytes))
    }
}
