//! Prometheus Metrics
//!
//! - Flush operations by type and terminal status
//! - Per-layer flush attempts, latency and items cleared
//! - Lock contention (skips and force-flush timeouts)

use lazy_static::lazy_static;
use prometheus::{
    Encoder, HistogramVec, IntCounterVec, IntGauge, TextEncoder, register_histogram_vec,
    register_int_counter_vec, register_int_gauge,
};

lazy_static! {
    /// Total flush operations by type (manual, scheduled) and status
    pub static ref FLUSH_OPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cacheflush_operations_total",
        "Total number of flush operations by type and terminal status",
        &["type", "status"]
    ).unwrap();

    /// Operations currently in flight
    pub static ref FLUSH_OPS_RUNNING: IntGauge = register_int_gauge!(
        "cacheflush_operations_running",
        "Number of flush operations currently running"
    ).unwrap();

    /// Layer flush attempts by layer and result
    pub static ref LAYER_FLUSH_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cacheflush_layer_flush_total",
        "Total number of layer flush attempts by layer and status",
        &["layer", "status"]
    ).unwrap();

    /// Layer flush latency in seconds
    pub static ref LAYER_FLUSH_DURATION: HistogramVec = register_histogram_vec!(
        "cacheflush_layer_flush_duration_seconds",
        "Layer flush latency in seconds",
        &["layer"],
        vec![0.001, 0.01, 0.1, 1.0, 10.0, 60.0]
    ).unwrap();

    /// Items removed per layer
    pub static ref ITEMS_CLEARED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cacheflush_items_cleared_total",
        "Total number of cache items cleared per layer",
        &["layer"]
    ).unwrap();

    /// Layers skipped because another operation held the lock
    pub static ref LOCK_SKIPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cacheflush_lock_skips_total",
        "Layer attempts skipped due to lock contention",
        &["layer"]
    ).unwrap();

    /// Force flushes that gave up waiting for a lock
    pub static ref LOCK_TIMEOUTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "cacheflush_lock_timeouts_total",
        "Force flushes that timed out waiting for a layer lock",
        &["layer"]
    ).unwrap();
}

/// Force registration of every metric so they show up before first use
pub fn init_metrics() {
    let _ = &*FLUSH_OPS_TOTAL;
    let _ = &*FLUSH_OPS_RUNNING;
    let _ = &*LAYER_FLUSH_TOTAL;
    let _ = &*LAYER_FLUSH_DURATION;
    let _ = &*ITEMS_CLEARED_TOTAL;
    let _ = &*LOCK_SKIPS_TOTAL;
    let _ = &*LOCK_TIMEOUTS_TOTAL;

    tracing::info!("Prometheus metrics initialized");
}

/// Encode all registered metrics in the Prometheus text format
pub fn encode_metrics() -> Result<String, Box<dyn std::error::Error>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}

/// Record one layer flush attempt
pub fn record_layer_flush(layer: &str, status: &str, duration_secs: f64, items_cleared: u64) {
    LAYER_FLUSH_TOTAL.with_label_values(&[layer, status]).inc();
    LAYER_FLUSH_DURATION
        .with_label_values(&[layer])
        .observe(duration_secs);
    if items_cleared > 0 {
        ITEMS_CLEARED_TOTAL
            .with_label_values(&[layer])
            .inc_by(items_cleared);
    }
}

/// Record a terminal operation
pub fn record_operation(operation_type: &str, status: &str) {
    FLUSH_OPS_TOTAL
        .with_label_values(&[operation_type, status])
        .inc();
}
