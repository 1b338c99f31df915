//! Auto-Flush Scheduler
//!
//! One background loop multiplexing every layer with `auto_flush_enabled`.
//! The scheduler holds no locks: it only asks the coordinator for non-forced
//! scheduled flushes, so a collision with a manual flush is a silent skip.

use crate::core::{FlushCoordinator, FlushOperation, OperationType};
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Scheduler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    /// How often due layers are checked
    pub tick_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 60,
        }
    }
}

/// Background trigger for scheduled flushes
pub struct AutoFlushScheduler {
    coordinator: FlushCoordinator,
    tick_interval: Duration,
    /// Reference point for layers that were never flushed
    baseline: DateTime<Utc>,
    shutdown: Arc<Notify>,
}

impl AutoFlushScheduler {
    pub fn new(coordinator: FlushCoordinator, tick_interval: Duration) -> Self {
        Self {
            coordinator,
            tick_interval,
            baseline: Utc::now(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Override the reference time used for never-flushed layers
    pub fn with_baseline(mut self, baseline: DateTime<Utc>) -> Self {
        self.baseline = baseline;
        self
    }

    /// Layers whose interval has elapsed at `now` and that are not being flushed
    pub fn due_layers(&self, now: DateTime<Utc>) -> Vec<String> {
        let ledger = self.coordinator.ledger();

        self.coordinator
            .registry()
            .get_active_layers()
            .into_iter()
            .filter(|layer| layer.auto_flush_enabled)
            .filter(|layer| {
                let last = ledger
                    .last_successful_flush(&layer.layer_id)
                    .unwrap_or(self.baseline);
                let interval = chrono::Duration::hours(layer.auto_flush_interval_hours as i64);
                now.signed_duration_since(last) >= interval
            })
            .filter(|layer| {
                let busy = self.coordinator.is_layer_busy(&layer.layer_id);
                if busy {
                    debug!(
                        "Layer {} is due but busy, deferring scheduled flush",
                        layer.layer_id
                    );
                }
                !busy
            })
            .map(|layer| layer.layer_id)
            .collect()
    }

    /// Run one scheduling pass as of `now`, returning the operations it produced
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Vec<FlushOperation> {
        let due = self.due_layers(now);
        if due.is_empty() {
            return Vec::new();
        }

        info!("Scheduler triggering auto-flush for {:?}", due);
        let flushes = due.iter().map(|layer_id| {
            self.coordinator
                .start_flush([layer_id.as_str()], OperationType::Scheduled, false)
        });

        join_all(flushes)
            .await
            .into_iter()
            .zip(due.iter())
            .filter_map(|(result, layer_id)| match result {
                Ok(op) => Some(op),
                Err(e) => {
                    warn!("Scheduled flush of {} was rejected: {}", layer_id, e);
                    None
                }
            })
            .collect()
    }

    /// Start the background loop
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        info!(
            "Starting auto-flush scheduler (tick={:?})",
            self.tick_interval
        );

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.tick_at(Utc::now()).await;
                    }
                    _ = self.shutdown.notified() => {
                        info!("Auto-flush scheduler stopped");
                        break;
                    }
                }
            }
        })
    }

    /// Stop the background loop after the current tick
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
