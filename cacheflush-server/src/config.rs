use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::adapters::AdapterSpec;
use crate::core::{CacheLayerConfig, CoordinatorConfig};
use crate::ledger::LedgerConfig;
use crate::scheduler::SchedulerConfig;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub server: Server,
    pub flush: FlushConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    pub logging: LoggingConfig,
    /// Layers registered at startup
    #[serde(default)]
    pub layers: Vec<CacheLayerConfig>,
    /// Adapter backing each layer, keyed by layer id
    #[serde(default)]
    pub adapters: BTreeMap<String, AdapterSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlushConfig {
    /// Max wait for a contended layer lock on force flushes
    pub lock_max_wait_ms: u64,
    /// Per-adapter timeout
    pub adapter_timeout_ms: u64,
    /// Adapters running in parallel within one operation
    pub max_concurrent_layers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `json` or `text`
    pub format: String,
}

/// Seed record for one of the dashboard's layers
fn layer(
    layer_id: &str,
    display_name: &str,
    icon_ref: &str,
    flush_priority: i32,
    auto_flush_interval_hours: Option<u32>,
    max_size_mb: u64,
) -> CacheLayerConfig {
    let mut config = CacheLayerConfig::new(layer_id, flush_priority);
    config.display_name = display_name.to_string();
    config.icon_ref = icon_ref.to_string();
    config.max_size_mb = max_size_mb;
    if let Some(hours) = auto_flush_interval_hours {
        config.auto_flush_enabled = true;
        config.auto_flush_interval_hours = hours;
    }
    config
}

impl Default for ServerConfig {
    fn default() -> Self {
        let layers = vec![
            layer("component_cache", "UI Component Cache", "layers", 1, Some(24), 256),
            layer("ai_memory_cache", "AI Memory Cache", "brain", 2, Some(12), 1024),
            layer("api_response_cache", "API Response Cache", "server", 3, Some(6), 512),
            layer("cdn_asset_cache", "CDN Asset Cache", "globe", 4, None, 4096),
            layer("security_role_cache", "Security Role Cache", "shield", 5, Some(1), 64),
        ];

        let mut adapters: BTreeMap<String, AdapterSpec> = layers
            .iter()
            .map(|l| (l.layer_id.clone(), AdapterSpec::Memory))
            .collect();
        adapters.insert(
            "cdn_asset_cache".to_string(),
            AdapterSpec::Disk {
                path: PathBuf::from("./data/cache/cdn"),
            },
        );

        Self {
            server: Server {
                host: "0.0.0.0".to_string(),
                port: 15600,
            },
            flush: FlushConfig {
                lock_max_wait_ms: 10_000,
                adapter_timeout_ms: 30_000,
                max_concurrent_layers: 4,
            },
            scheduler: SchedulerConfig::default(),
            ledger: LedgerConfig {
                path: Some(PathBuf::from("./data/ledger/operations.ledger")),
                fsync: false,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "json".to_string(),
            },
            layers,
            adapters,
        }
    }
}

impl ServerConfig {
    /// Load configuration from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: ServerConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.flush.lock_max_wait_ms == 0 {
            anyhow::bail!("flush.lock_max_wait_ms must be positive");
        }
        if self.flush.adapter_timeout_ms == 0 {
            anyhow::bail!("flush.adapter_timeout_ms must be positive");
        }
        if self.flush.max_concurrent_layers == 0 {
            anyhow::bail!("flush.max_concurrent_layers must be positive");
        }
        if self.scheduler.enabled && self.scheduler.tick_interval_secs == 0 {
            anyhow::bail!("scheduler.tick_interval_secs must be positive");
        }
        for layer in &self.layers {
            layer
                .validate()
                .map_err(|e| anyhow::anyhow!("layer '{}': {}", layer.layer_id, e))?;
        }
        Ok(())
    }

    /// Convert to CoordinatorConfig
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            lock_max_wait: Duration::from_millis(self.flush.lock_max_wait_ms),
            adapter_timeout: Duration::from_millis(self.flush.adapter_timeout_ms),
            max_concurrent_layers: self.flush.max_concurrent_layers,
        }
    }

    /// Scheduler tick interval
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.scheduler.tick_interval_secs)
    }

    /// Get server address
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        let config = ServerConfig::default();
        config.validate().unwrap();
        assert_eq!(config.layers.len(), 5);
        assert_eq!(config.adapters.len(), 5);
        assert!(matches!(
            config.adapters["cdn_asset_cache"],
            AdapterSpec::Disk { .. }
        ));
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  host: 127.0.0.1
  port: 15601
flush:
  lock_max_wait_ms: 500
  adapter_timeout_ms: 2000
  max_concurrent_layers: 2
scheduler:
  enabled: false
  tick_interval_secs: 30
logging:
  level: debug
  format: text
layers:
  - layer_id: component_cache
    display_name: UI Component Cache
    is_active: true
    auto_flush_enabled: true
    auto_flush_interval_hours: 24
    max_size_mb: 256
    retention_hours: 24
    flush_priority: 1
adapters:
  component_cache:
    kind: memory
"#;
        let config: ServerConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.server_addr(), "127.0.0.1:15601");
        assert_eq!(
            config.to_coordinator_config().lock_max_wait,
            Duration::from_millis(500)
        );
        assert!(config.ledger.path.is_none());
        assert_eq!(config.layers[0].icon_ref, "");
    }

    #[test]
    fn test_rejects_zero_timeouts() {
        let mut config = ServerConfig::default();
        config.flush.adapter_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = ServerConfig::default();
        config.layers[0].retention_hours = 0;
        assert!(config.validate().is_err());
    }
}
