use super::error::{FlushError, Result};
use super::types::{CacheLayerConfig, LayerUpdate, validate_layer_id};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Registry of cache layer configurations
///
/// Read-mostly. Every read hands out clones, so a flush works on the snapshot
/// it took at its own start regardless of concurrent admin edits.
#[derive(Clone, Default)]
pub struct LayerRegistry {
    layers: Arc<RwLock<HashMap<String, CacheLayerConfig>>>,
}

impl LayerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry seeded with the given layers
    pub fn with_layers(layers: Vec<CacheLayerConfig>) -> Result<Self> {
        let registry = Self::new();
        for layer in layers {
            registry.register(layer)?;
        }
        Ok(registry)
    }

    /// Add a new layer
    pub fn register(&self, mut config: CacheLayerConfig) -> Result<CacheLayerConfig> {
        config.validate()?;
        if config.display_name.is_empty() {
            config.display_name = config.layer_id.clone();
        }

        let mut layers = self.layers.write();
        if layers.contains_key(&config.layer_id) {
            return Err(FlushError::Conflict(format!(
                "layer '{}' already registered",
                config.layer_id
            )));
        }

        info!(
            "Registered cache layer {} (priority={}, active={})",
            config.layer_id, config.flush_priority, config.is_active
        );
        layers.insert(config.layer_id.clone(), config.clone());
        Ok(config)
    }

    /// Get one layer
    pub fn get(&self, layer_id: &str) -> Result<CacheLayerConfig> {
        self.layers
            .read()
            .get(layer_id)
            .cloned()
            .ok_or_else(|| FlushError::LayerNotFound(layer_id.to_string()))
    }

    /// All layers, ordered by `(flush_priority, layer_id)`
    pub fn list(&self) -> Vec<CacheLayerConfig> {
        let mut layers: Vec<CacheLayerConfig> = self.layers.read().values().cloned().collect();
        sort_by_priority(&mut layers);
        layers
    }

    /// Active layers, ordered by `(flush_priority, layer_id)`
    pub fn get_active_layers(&self) -> Vec<CacheLayerConfig> {
        let mut layers: Vec<CacheLayerConfig> = self
            .layers
            .read()
            .values()
            .filter(|l| l.is_active)
            .cloned()
            .collect();
        sort_by_priority(&mut layers);
        layers
    }

    /// Snapshot of the requested layers that exist and are active, in flush order.
    /// Unknown and inactive ids are dropped without error.
    pub fn resolve<'a, I>(&self, requested: I) -> Vec<CacheLayerConfig>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let layers = self.layers.read();
        let mut resolved: Vec<CacheLayerConfig> = requested
            .into_iter()
            .filter_map(|id| match layers.get(id) {
                Some(layer) if layer.is_active => Some(layer.clone()),
                Some(_) => {
                    debug!("Dropping inactive layer {} from flush request", id);
                    None
                }
                None => {
                    debug!("Dropping unknown layer {} from flush request", id);
                    None
                }
            })
            .collect();
        drop(layers);

        sort_by_priority(&mut resolved);
        resolved.dedup_by(|a, b| a.layer_id == b.layer_id);
        resolved
    }

    /// Apply a partial update to one layer
    pub fn update(&self, layer_id: &str, update: &LayerUpdate) -> Result<CacheLayerConfig> {
        validate_layer_id(layer_id)?;

        let mut layers = self.layers.write();
        let current = layers
            .get(layer_id)
            .ok_or_else(|| FlushError::Validation(format!("unknown layer_id: {}", layer_id)))?;

        let next = update.apply(current)?;
        info!(
            "Updated cache layer {} (priority={}, active={}, auto_flush={})",
            layer_id, next.flush_priority, next.is_active, next.auto_flush_enabled
        );
        layers.insert(layer_id.to_string(), next.clone());
        Ok(next)
    }

    /// Number of registered layers
    pub fn len(&self) -> usize {
        self.layers.read().len()
    }

    /// Check if no layer is registered
    pub fn is_empty(&self) -> bool {
        self.layers.read().is_empty()
    }
}

fn sort_by_priority(layers: &mut [CacheLayerConfig]) {
    layers.sort_by(|a, b| a.order_key().cmp(&b.order_key()));
}
