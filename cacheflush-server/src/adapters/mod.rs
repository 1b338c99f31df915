//! Layer Flush Adapters
//!
//! One adapter per concrete cache layer. Everything above this module is
//! layer-agnostic:
//! - Memory: in-process key/value caches (component, AI memory, API response, roles)
//! - Disk: file-backed caches (CDN assets)

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

mod disk;
mod memory;

pub use disk::DiskCacheAdapter;
pub use memory::{MemoryCache, MemoryCacheAdapter};

pub const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Failure of one layer flush
#[derive(Debug, Clone, Error, PartialEq)]
pub enum AdapterError {
    #[error("timeout")]
    Timeout,

    #[error("{0}")]
    Storage(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl From<std::io::Error> for AdapterError {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::PermissionDenied => AdapterError::PermissionDenied(e.to_string()),
            std::io::ErrorKind::TimedOut => AdapterError::Timeout,
            _ => AdapterError::Storage(e.to_string()),
        }
    }
}

/// What a successful flush removed
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FlushOutcome {
    pub items_cleared: u64,
    pub size_cleared_mb: f64,
}

impl FlushOutcome {
    pub fn from_bytes(items_cleared: u64, bytes: u64) -> Self {
        Self {
            items_cleared,
            size_cleared_mb: bytes as f64 / BYTES_PER_MB,
        }
    }
}

/// Capability to clear exactly one cache layer
///
/// Implementations must be idempotent (an empty layer flushes successfully with
/// zero counts) and must return [`AdapterError::Timeout`] rather than exceed
/// `timeout`.
#[async_trait]
pub trait FlushAdapter: Send + Sync {
    async fn flush(
        &self,
        layer_id: &str,
        timeout: Duration,
    ) -> std::result::Result<FlushOutcome, AdapterError>;
}

/// Which reference adapter backs a layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum AdapterSpec {
    /// In-process memory cache
    Memory,
    /// File-backed cache directory
    Disk { path: PathBuf },
}

/// Adapter lookup by layer id
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: Arc<RwLock<HashMap<String, Arc<dyn FlushAdapter>>>>,
}

impl AdapterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install (or replace) the adapter for a layer
    pub fn insert(&self, layer_id: impl Into<String>, adapter: Arc<dyn FlushAdapter>) {
        self.adapters.write().insert(layer_id.into(), adapter);
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(self, layer_id: impl Into<String>, adapter: Arc<dyn FlushAdapter>) -> Self {
        self.insert(layer_id, adapter);
        self
    }

    /// Build adapters from their configured specs
    pub fn from_specs(specs: &BTreeMap<String, AdapterSpec>) -> Self {
        let set = Self::new();

        for (layer_id, spec) in specs {
            match spec {
                AdapterSpec::Memory => {
                    set.insert(
                        layer_id.clone(),
                        Arc::new(MemoryCacheAdapter::new(MemoryCache::new())),
                    );
                }
                AdapterSpec::Disk { path } => {
                    set.insert(
                        layer_id.clone(),
                        Arc::new(DiskCacheAdapter::new(path.clone())),
                    );
                }
            }
            info!("Adapter for layer {}: {:?}", layer_id, spec);
        }

        set
    }

    pub fn get(&self, layer_id: &str) -> Option<Arc<dyn FlushAdapter>> {
        self.adapters.read().get(layer_id).cloned()
    }

    pub fn contains(&self, layer_id: &str) -> bool {
        self.adapters.read().contains_key(layer_id)
    }

    pub fn len(&self) -> usize {
        self.adapters.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            AdapterError::from(denied),
            AdapterError::PermissionDenied(_)
        ));

        let other = std::io::Error::other("disk full");
        assert_eq!(AdapterError::from(other).to_string(), "disk full");
        assert_eq!(AdapterError::Timeout.to_string(), "timeout");
    }

    #[test]
    fn test_outcome_from_bytes() {
        let outcome = FlushOutcome::from_bytes(2, 3 * 1024 * 1024);
        assert_eq!(outcome.items_cleared, 2);
        assert!((outcome.size_cleared_mb - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_from_specs() {
        let specs = BTreeMap::from([
            ("component_cache".to_string(), AdapterSpec::Memory),
            (
                "cdn_asset_cache".to_string(),
                AdapterSpec::Disk {
                    path: PathBuf::from("/tmp/cdn"),
                },
            ),
        ]);

        let set = AdapterSet::from_specs(&specs);
        assert_eq!(set.len(), 2);
        assert!(set.contains("component_cache"));
        assert!(set.contains("cdn_asset_cache"));
    }

    #[test]
    fn test_adapter_spec_yaml() {
        let spec: AdapterSpec = serde_yaml::from_str("kind: disk\npath: ./data/cdn").unwrap();
        assert_eq!(
            spec,
            AdapterSpec::Disk {
                path: PathBuf::from("./data/cdn")
            }
        );
        let spec: AdapterSpec = serde_yaml::from_str("kind: memory").unwrap();
        assert_eq!(spec, AdapterSpec::Memory);
    }

    #[test]
    fn test_adapter_set_lookup() {
        let set = AdapterSet::new().with(
            "component_cache",
            Arc::new(MemoryCacheAdapter::new(MemoryCache::new())),
        );
        assert!(set.contains("component_cache"));
        assert!(set.get("cdn_asset_cache").is_none());
        assert_eq!(set.len(), 1);
    }
}
