use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use super::error::{FlushError, Result};

/// Longest accepted layer identifier
pub const MAX_LAYER_ID_LEN: usize = 64;

/// Configuration record for one named cache layer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheLayerConfig {
    /// Stable identifier, e.g. `component_cache`
    pub layer_id: String,
    /// Human readable name shown on the dashboard
    #[serde(default)]
    pub display_name: String,
    /// Icon reference used by the dashboard
    #[serde(default)]
    pub icon_ref: String,
    /// Inactive layers are never flushed
    pub is_active: bool,
    /// Whether the scheduler flushes this layer
    pub auto_flush_enabled: bool,
    /// Scheduler cadence in hours
    pub auto_flush_interval_hours: u32,
    /// Advisory size limit in MB
    pub max_size_mb: u64,
    /// Advisory retention in hours
    pub retention_hours: u32,
    /// Lower values are flushed first
    pub flush_priority: i32,
    /// Last admin edit
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl CacheLayerConfig {
    /// Create a config with the dashboard defaults for everything but id and priority
    pub fn new(layer_id: impl Into<String>, flush_priority: i32) -> Self {
        let layer_id = layer_id.into();
        Self {
            display_name: layer_id.clone(),
            layer_id,
            icon_ref: String::new(),
            is_active: true,
            auto_flush_enabled: false,
            auto_flush_interval_hours: 24,
            max_size_mb: 512,
            retention_hours: 24,
            flush_priority,
            updated_at: Utc::now(),
        }
    }

    /// Validate every field of the record
    pub fn validate(&self) -> Result<()> {
        validate_layer_id(&self.layer_id)?;
        if self.auto_flush_interval_hours == 0 {
            return Err(FlushError::Validation(
                "auto_flush_interval_hours must be positive".to_string(),
            ));
        }
        if self.max_size_mb == 0 {
            return Err(FlushError::Validation(
                "max_size_mb must be positive".to_string(),
            ));
        }
        if self.retention_hours == 0 {
            return Err(FlushError::Validation(
                "retention_hours must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Ordering key used by every flush: priority first, then id
    pub fn order_key(&self) -> (i32, &str) {
        (self.flush_priority, self.layer_id.as_str())
    }
}

/// Check that a layer identifier is well formed
pub fn validate_layer_id(layer_id: &str) -> Result<()> {
    if layer_id.is_empty() {
        return Err(FlushError::Validation(
            "layer_id must not be empty".to_string(),
        ));
    }
    if layer_id.len() > MAX_LAYER_ID_LEN {
        return Err(FlushError::Validation(format!(
            "layer_id longer than {} characters",
            MAX_LAYER_ID_LEN
        )));
    }
    if !layer_id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(FlushError::Validation(format!(
            "layer_id '{}' may only contain [a-z0-9_-]",
            layer_id
        )));
    }
    Ok(())
}

/// Partial update of a layer config
///
/// Numeric fields are signed so that negative input reaches validation
/// instead of failing deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayerUpdate {
    pub display_name: Option<String>,
    pub icon_ref: Option<String>,
    pub is_active: Option<bool>,
    pub auto_flush_enabled: Option<bool>,
    pub auto_flush_interval_hours: Option<i64>,
    pub max_size_mb: Option<i64>,
    pub retention_hours: Option<i64>,
    pub flush_priority: Option<i32>,
}

impl LayerUpdate {
    /// Apply the update to a copy of `current`, validating every supplied field
    pub fn apply(&self, current: &CacheLayerConfig) -> Result<CacheLayerConfig> {
        let mut next = current.clone();

        if let Some(name) = &self.display_name {
            next.display_name = name.clone();
        }
        if let Some(icon) = &self.icon_ref {
            next.icon_ref = icon.clone();
        }
        if let Some(active) = self.is_active {
            next.is_active = active;
        }
        if let Some(enabled) = self.auto_flush_enabled {
            next.auto_flush_enabled = enabled;
        }
        if let Some(hours) = self.auto_flush_interval_hours {
            next.auto_flush_interval_hours = positive("auto_flush_interval_hours", hours)?;
        }
        if let Some(mb) = self.max_size_mb {
            next.max_size_mb = positive("max_size_mb", mb)?;
        }
        if let Some(hours) = self.retention_hours {
            next.retention_hours = positive("retention_hours", hours)?;
        }
        if let Some(priority) = self.flush_priority {
            next.flush_priority = priority;
        }

        next.validate()?;
        next.updated_at = Utc::now();
        Ok(next)
    }

    /// True if no field is set
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none()
            && self.icon_ref.is_none()
            && self.is_active.is_none()
            && self.auto_flush_enabled.is_none()
            && self.auto_flush_interval_hours.is_none()
            && self.max_size_mb.is_none()
            && self.retention_hours.is_none()
            && self.flush_priority.is_none()
    }
}

fn positive<T: TryFrom<i64>>(field: &str, value: i64) -> Result<T> {
    if value <= 0 {
        return Err(FlushError::Validation(format!(
            "{} must be positive, got {}",
            field, value
        )));
    }
    T::try_from(value)
        .map_err(|_| FlushError::Validation(format!("{} is too large: {}", field, value)))
}

/// Who triggered an operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Manual,
    Scheduled,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
        }
    }
}

/// Lifecycle status of a flush operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Running,
    Completed,
    Partial,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Outcome of one layer attempt
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LayerFlushStatus {
    Success,
    Error,
}

impl LayerFlushStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

/// Result of one attempted layer flush
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerFlushResult {
    pub layer_id: String,
    pub status: LayerFlushStatus,
    pub items_cleared: u64,
    pub size_cleared_mb: f64,
    pub duration_ms: u64,
    /// Present iff `status` is `error`
    pub error_message: Option<String>,
}

impl LayerFlushResult {
    pub fn success(
        layer_id: impl Into<String>,
        items_cleared: u64,
        size_cleared_mb: f64,
        duration_ms: u64,
    ) -> Self {
        Self {
            layer_id: layer_id.into(),
            status: LayerFlushStatus::Success,
            items_cleared,
            size_cleared_mb: size_cleared_mb.max(0.0),
            duration_ms,
            error_message: None,
        }
    }

    pub fn error(layer_id: impl Into<String>, message: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            layer_id: layer_id.into(),
            status: LayerFlushStatus::Error,
            items_cleared: 0,
            size_cleared_mb: 0.0,
            duration_ms,
            error_message: Some(message.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == LayerFlushStatus::Success
    }
}

/// One invocation of the coordinator covering one or more layers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FlushOperation {
    pub operation_id: Uuid,
    pub operation_type: OperationType,
    pub requested_layers: BTreeSet<String>,
    pub force: bool,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// One entry per attempted layer, in attempt order
    pub results: Vec<LayerFlushResult>,
    /// Active layers skipped because another operation held their lock
    #[serde(default)]
    pub skipped_layers: Vec<String>,
}

impl FlushOperation {
    /// Start a new running operation
    pub fn start(
        requested_layers: BTreeSet<String>,
        operation_type: OperationType,
        force: bool,
    ) -> Self {
        Self {
            operation_id: Uuid::new_v4(),
            operation_type,
            requested_layers,
            force,
            status: OperationStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            results: Vec::new(),
            skipped_layers: Vec::new(),
        }
    }

    /// Move to a terminal state. Calling this twice is a no-op.
    pub fn finish(&mut self, results: Vec<LayerFlushResult>, skipped_layers: Vec<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = aggregate_status(&results, skipped_layers.len());
        self.results = results;
        self.skipped_layers = skipped_layers;
        self.completed_at = Some(Utc::now());
    }

    /// True if this operation recorded a successful flush of `layer_id`
    pub fn flushed_successfully(&self, layer_id: &str) -> bool {
        self.results
            .iter()
            .any(|r| r.layer_id == layer_id && r.is_success())
    }
}

/// Compute the terminal status from the recorded results and the number of
/// lock-contended skips.
pub fn aggregate_status(results: &[LayerFlushResult], skipped: usize) -> OperationStatus {
    if results.is_empty() {
        return OperationStatus::Completed;
    }

    let successes = results.iter().filter(|r| r.is_success()).count();
    if successes == 0 {
        OperationStatus::Failed
    } else if successes == results.len() && skipped == 0 {
        OperationStatus::Completed
    } else {
        OperationStatus::Partial
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_status() {
        let ok = LayerFlushResult::success("a", 3, 1.5, 10);
        let err = LayerFlushResult::error("b", "disk full", 4);

        assert_eq!(aggregate_status(&[], 0), OperationStatus::Completed);
        assert_eq!(aggregate_status(&[], 2), OperationStatus::Completed);
        assert_eq!(
            aggregate_status(&[ok.clone()], 0),
            OperationStatus::Completed
        );
        assert_eq!(aggregate_status(&[ok.clone()], 1), OperationStatus::Partial);
        assert_eq!(
            aggregate_status(&[ok, err.clone()], 0),
            OperationStatus::Partial
        );
        assert_eq!(aggregate_status(&[err.clone()], 0), OperationStatus::Failed);
        assert_eq!(aggregate_status(&[err], 1), OperationStatus::Failed);
    }

    #[test]
    fn test_validate_layer_id() {
        assert!(validate_layer_id("cdn_asset_cache").is_ok());
        assert!(validate_layer_id("api-v2").is_ok());
        assert!(validate_layer_id("").is_err());
        assert!(validate_layer_id("Bad Name").is_err());
        assert!(validate_layer_id(&"x".repeat(MAX_LAYER_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_layer_update_rejects_non_positive() {
        let layer = CacheLayerConfig::new("component_cache", 1);

        let update = LayerUpdate {
            auto_flush_interval_hours: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            update.apply(&layer),
            Err(FlushError::Validation(_))
        ));

        let update = LayerUpdate {
            max_size_mb: Some(-5),
            ..Default::default()
        };
        assert!(update.apply(&layer).is_err());

        let update = LayerUpdate {
            retention_hours: Some(i64::from(u32::MAX) + 1),
            ..Default::default()
        };
        assert!(update.apply(&layer).is_err());
    }

    #[test]
    fn test_layer_update_accepts_large_size() {
        let layer = CacheLayerConfig::new("cdn_asset_cache", 4);
        let update = LayerUpdate {
            max_size_mb: Some(8_000_000_000),
            ..Default::default()
        };

        let next = update.apply(&layer).unwrap();
        assert_eq!(next.max_size_mb, 8_000_000_000);
    }

    #[test]
    fn test_layer_update_applies_fields() {
        let layer = CacheLayerConfig::new("component_cache", 1);
        let update = LayerUpdate {
            is_active: Some(false),
            flush_priority: Some(7),
            retention_hours: Some(48),
            ..Default::default()
        };

        let next = update.apply(&layer).unwrap();
        assert!(!next.is_active);
        assert_eq!(next.flush_priority, 7);
        assert_eq!(next.retention_hours, 48);
        assert_eq!(next.max_size_mb, layer.max_size_mb);
    }

    #[test]
    fn test_finish_is_write_once() {
        let mut op = FlushOperation::start(BTreeSet::new(), OperationType::Manual, false);
        op.finish(vec![LayerFlushResult::error("a", "boom", 1)], vec![]);
        assert_eq!(op.status, OperationStatus::Failed);

        op.finish(vec![], vec![]);
        assert_eq!(op.status, OperationStatus::Failed);
        assert_eq!(op.results.len(), 1);
        assert!(op.completed_at.is_some());
    }

    #[test]
    fn test_result_json_shape() {
        let result = LayerFlushResult::error("cdn_asset_cache", "timeout", 5000);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error_message"], "timeout");

        let result = LayerFlushResult::success("cdn_asset_cache", 0, 0.0, 1);
        let value = serde_json::to_value(&result).unwrap();
        assert!(value["error_message"].is_null());
    }
}
