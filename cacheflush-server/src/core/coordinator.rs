use super::error::{FlushError, Result};
use super::locks::LayerLocks;
use super::registry::LayerRegistry;
use super::types::{
    CacheLayerConfig, FlushOperation, LayerFlushResult, OperationType, validate_layer_id,
};
use crate::adapters::{AdapterError, AdapterSet, FlushAdapter};
use crate::ledger::OperationLedger;
use crate::metrics;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Error message recorded when a force flush gives up waiting for a layer lock
pub const LOCK_TIMEOUT_MESSAGE: &str = "lock_timeout";

/// Coordinator tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// How long a force flush waits for a contended layer lock
    pub lock_max_wait: Duration,
    /// Upper bound for a single adapter call
    pub adapter_timeout: Duration,
    /// Adapters running in parallel within one operation
    pub max_concurrent_layers: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            lock_max_wait: Duration::from_secs(10),
            adapter_timeout: Duration::from_secs(30),
            max_concurrent_layers: 4,
        }
    }
}

/// Per-layer slot, kept in attempt order
enum Attempt {
    Finished(LayerFlushResult),
    Running(String, JoinHandle<LayerFlushResult>),
}

/// Drives flush operations across cache layers
///
/// Layers are attempted in `(flush_priority, layer_id)` order. A layer's
/// failure never aborts the remaining layers, and the caller always gets a
/// terminal [`FlushOperation`] back.
#[derive(Clone)]
pub struct FlushCoordinator {
    registry: LayerRegistry,
    adapters: AdapterSet,
    ledger: OperationLedger,
    locks: LayerLocks,
    running: Arc<RwLock<HashMap<Uuid, FlushOperation>>>,
    config: CoordinatorConfig,
}

impl FlushCoordinator {
    pub fn new(
        registry: LayerRegistry,
        adapters: AdapterSet,
        ledger: OperationLedger,
        config: CoordinatorConfig,
    ) -> Self {
        info!(
            "Initializing flush coordinator (lock_max_wait={:?}, adapter_timeout={:?}, max_concurrent_layers={})",
            config.lock_max_wait, config.adapter_timeout, config.max_concurrent_layers
        );

        Self {
            registry,
            adapters,
            ledger,
            locks: LayerLocks::new(),
            running: Arc::new(RwLock::new(HashMap::new())),
            config,
        }
    }

    /// Flush the requested layers.
    ///
    /// Only malformed layer names are rejected; unknown and inactive layers are
    /// dropped, and adapter failures end up as per-layer error results.
    pub async fn start_flush<I, S>(
        &self,
        requested_layers: I,
        operation_type: OperationType,
        force: bool,
    ) -> Result<FlushOperation>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested: BTreeSet<String> = requested_layers.into_iter().map(Into::into).collect();
        for layer_id in &requested {
            validate_layer_id(layer_id)?;
        }

        let mut op = FlushOperation::start(requested, operation_type, force);
        let layers = self.registry.resolve(&op.requested_layers);

        if layers.is_empty() {
            debug!(
                "Operation {} has no active layers, completing immediately",
                op.operation_id
            );
            op.finish(Vec::new(), Vec::new());
            self.persist(&op).await;
            return Ok(op);
        }

        info!(
            "Starting {} flush {} for {} layer(s) (force={})",
            operation_type.as_str(),
            op.operation_id,
            layers.len(),
            force
        );
        self.running.write().insert(op.operation_id, op.clone());
        metrics::FLUSH_OPS_RUNNING.inc();

        // Runs on its own task so the operation reaches the ledger even if the caller goes away
        let operation_id = op.operation_id;
        let coordinator = self.clone();
        let handle = tokio::spawn(async move { coordinator.execute(op, layers).await });
        handle.await.map_err(|e| {
            self.running.write().remove(&operation_id);
            metrics::FLUSH_OPS_RUNNING.dec();
            FlushError::Internal(format!("flush operation {} aborted: {}", operation_id, e))
        })
    }

    async fn execute(
        &self,
        mut op: FlushOperation,
        layers: Vec<CacheLayerConfig>,
    ) -> FlushOperation {
        let (results, skipped) = self.run_layers(&layers, op.force).await;
        op.finish(results, skipped);

        info!(
            "Flush {} finished with status {} ({} results, {} skipped)",
            op.operation_id,
            op.status.as_str(),
            op.results.len(),
            op.skipped_layers.len()
        );

        self.persist(&op).await;
        metrics::FLUSH_OPS_RUNNING.dec();
        op
    }

    /// Attempt every layer in order. Returns the results in attempt order and
    /// the layers skipped because of lock contention.
    async fn run_layers(
        &self,
        layers: &[CacheLayerConfig],
        force: bool,
    ) -> (Vec<LayerFlushResult>, Vec<String>) {
        let limiter = Arc::new(Semaphore::new(self.config.max_concurrent_layers.max(1)));
        let mut attempts = Vec::with_capacity(layers.len());
        let mut skipped = Vec::new();

        for layer in layers {
            let layer_id = layer.layer_id.clone();

            let permit = match limiter.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    attempts.push(Attempt::Finished(LayerFlushResult::error(
                        layer_id,
                        e.to_string(),
                        0,
                    )));
                    continue;
                }
            };

            let guard = if force {
                let wait_started = Instant::now();
                match self
                    .locks
                    .acquire(&layer_id, self.config.lock_max_wait)
                    .await
                {
                    Some(guard) => guard,
                    None => {
                        warn!(
                            "Force flush gave up waiting for layer {} after {:?}",
                            layer_id, self.config.lock_max_wait
                        );
                        metrics::LOCK_TIMEOUTS_TOTAL
                            .with_label_values(&[layer_id.as_str()])
                            .inc();
                        let waited = wait_started.elapsed().as_millis() as u64;
                        attempts.push(Attempt::Finished(LayerFlushResult::error(
                            layer_id,
                            LOCK_TIMEOUT_MESSAGE,
                            waited,
                        )));
                        continue;
                    }
                }
            } else {
                match self.locks.try_acquire(&layer_id) {
                    Some(guard) => guard,
                    None => {
                        debug!("Layer {} is being flushed elsewhere, skipping", layer_id);
                        metrics::LOCK_SKIPS_TOTAL
                            .with_label_values(&[layer_id.as_str()])
                            .inc();
                        skipped.push(layer_id);
                        continue;
                    }
                }
            };

            let adapter = self.adapters.get(&layer_id);
            let timeout = self.config.adapter_timeout;
            let task_layer = layer_id.clone();
            let handle = tokio::spawn(async move {
                let result = flush_layer(&task_layer, adapter, timeout).await;
                drop(guard);
                drop(permit);
                result
            });
            attempts.push(Attempt::Running(layer_id, handle));
        }

        let mut results = Vec::with_capacity(attempts.len());
        for attempt in attempts {
            let result = match attempt {
                Attempt::Finished(result) => result,
                Attempt::Running(layer_id, handle) => match handle.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!("Flush task for layer {} failed: {}", layer_id, e);
                        LayerFlushResult::error(layer_id, format!("flush task failed: {}", e), 0)
                    }
                },
            };
            results.push(result);
        }

        (results, skipped)
    }

    /// Write the terminal operation to the ledger and retire it from the running set
    async fn persist(&self, op: &FlushOperation) {
        if let Err(e) = self.ledger.record(op.clone()).await {
            error!(
                "Failed to record flush operation {} in ledger: {}",
                op.operation_id, e
            );
        }
        self.running.write().remove(&op.operation_id);
        metrics::record_operation(op.operation_type.as_str(), op.status.as_str());
    }

    /// Operations that have started but not yet reached the ledger
    pub fn running_operations(&self) -> Vec<FlushOperation> {
        let mut ops: Vec<FlushOperation> = self.running.read().values().cloned().collect();
        ops.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        ops
    }

    /// True while some operation holds the lock of `layer_id`
    pub fn is_layer_busy(&self, layer_id: &str) -> bool {
        self.locks.is_locked(layer_id)
    }

    pub fn registry(&self) -> &LayerRegistry {
        &self.registry
    }

    pub fn adapters(&self) -> &AdapterSet {
        &self.adapters
    }

    pub fn ledger(&self) -> &OperationLedger {
        &self.ledger
    }

    pub fn locks(&self) -> &LayerLocks {
        &self.locks
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }
}

/// Run one adapter under the coordinator's timeout and turn the outcome into a result
async fn flush_layer(
    layer_id: &str,
    adapter: Option<Arc<dyn FlushAdapter>>,
    timeout: Duration,
) -> LayerFlushResult {
    let started = Instant::now();
    let outcome = match adapter {
        Some(adapter) => tokio::time::timeout(timeout, adapter.flush(layer_id, timeout))
            .await
            .unwrap_or(Err(AdapterError::Timeout)),
        None => Err(AdapterError::Unavailable(
            "no adapter registered".to_string(),
        )),
    };
    let elapsed = started.elapsed();
    let duration_ms = elapsed.as_millis() as u64;

    let result = match outcome {
        Ok(outcome) => {
            debug!(
                "Layer {} flushed: {} items, {:.3} MB in {}ms",
                layer_id, outcome.items_cleared, outcome.size_cleared_mb, duration_ms
            );
            LayerFlushResult::success(
                layer_id,
                outcome.items_cleared,
                outcome.size_cleared_mb,
                duration_ms,
            )
        }
        Err(e) => {
            warn!("Layer {} flush failed: {}", layer_id, e);
            LayerFlushResult::error(layer_id, e.to_string(), duration_ms)
        }
    };

    metrics::record_layer_flush(
        layer_id,
        result.status.as_str(),
        elapsed.as_secs_f64(),
        result.items_cleared,
    );
    result
}
