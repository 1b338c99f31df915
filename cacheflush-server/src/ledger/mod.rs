//! Operation Ledger
//!
//! Append-only history of terminal flush operations. Each operation is written
//! exactly once, when it completes, so readers never observe a half-written
//! entry. With a configured path every entry is also appended to a checksummed
//! log file that is replayed on startup.

use crate::core::FlushOperation;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

mod log;

pub use log::LedgerLog;

/// Ledger error types
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Operation already recorded: {0}")]
    Duplicate(Uuid),

    #[error("Operation is still running: {0}")]
    NotTerminal(Uuid),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Ledger configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Log file; memory-only when absent
    pub path: Option<PathBuf>,
    /// fsync after every append
    #[serde(default)]
    pub fsync: bool,
}

#[derive(Default)]
struct Entries {
    /// Completion order, oldest first
    ops: Vec<FlushOperation>,
    ids: HashSet<Uuid>,
}

/// Durable store of completed flush operations
#[derive(Clone)]
pub struct OperationLedger {
    entries: Arc<RwLock<Entries>>,
    log: Option<Arc<Mutex<LedgerLog>>>,
}

impl Default for OperationLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl OperationLedger {
    /// Memory-only ledger
    pub fn in_memory() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
            log: None,
        }
    }

    /// Open a ledger according to `config`, replaying the log file if any
    pub async fn open(config: &LedgerConfig) -> Result<Self> {
        let Some(path) = &config.path else {
            info!("Operation ledger running in memory only");
            return Ok(Self::in_memory());
        };

        let (log, replayed) = LedgerLog::open(path, config.fsync).await?;
        let mut entries = Entries::default();
        for op in replayed {
            if entries.ids.insert(op.operation_id) {
                entries.ops.push(op);
            }
        }

        Ok(Self {
            entries: Arc::new(RwLock::new(entries)),
            log: Some(Arc::new(Mutex::new(log))),
        })
    }

    /// Record a terminal operation. Each operation id may be recorded once.
    pub async fn record(&self, op: FlushOperation) -> Result<()> {
        if !op.status.is_terminal() {
            return Err(LedgerError::NotTerminal(op.operation_id));
        }

        match &self.log {
            Some(log) => {
                // The log mutex serializes writers, so check-then-append is atomic
                let mut log = log.lock().await;
                if self.contains(&op.operation_id) {
                    return Err(LedgerError::Duplicate(op.operation_id));
                }
                log.append(&op).await?;
                self.push(op);
            }
            None => {
                let mut entries = self.entries.write();
                if !entries.ids.insert(op.operation_id) {
                    return Err(LedgerError::Duplicate(op.operation_id));
                }
                entries.ops.push(op);
            }
        }
        Ok(())
    }

    fn push(&self, op: FlushOperation) {
        let mut entries = self.entries.write();
        entries.ids.insert(op.operation_id);
        entries.ops.push(op);
    }

    pub fn contains(&self, operation_id: &Uuid) -> bool {
        self.entries.read().ids.contains(operation_id)
    }

    /// Most recent operations, newest first
    pub fn list_recent(&self, limit: usize) -> Vec<FlushOperation> {
        self.entries
            .read()
            .ops
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Look up one operation
    pub fn get(&self, operation_id: &Uuid) -> Option<FlushOperation> {
        self.entries
            .read()
            .ops
            .iter()
            .rev()
            .find(|op| &op.operation_id == operation_id)
            .cloned()
    }

    /// Completion time of the latest operation that flushed `layer_id` successfully
    pub fn last_successful_flush(&self, layer_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .read()
            .ops
            .iter()
            .rev()
            .find(|op| op.flushed_successfully(layer_id))
            .and_then(|op| op.completed_at)
    }

    /// Remove operations that completed before `cutoff`. Returns how many were removed.
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let is_expired =
            |op: &FlushOperation| op.completed_at.unwrap_or(op.started_at) < cutoff;

        let mut log = match &self.log {
            Some(log) => Some(log.lock().await),
            None => None,
        };

        let remaining: Vec<FlushOperation> = {
            let entries = self.entries.read();
            entries.ops.iter().filter(|op| !is_expired(op)).cloned().collect()
        };

        if let Some(log) = log.as_mut() {
            log.rewrite(&remaining).await?;
        }

        let mut entries = self.entries.write();
        let before = entries.ops.len();
        entries.ops.retain(|op| !is_expired(op));
        let ids: HashSet<Uuid> = entries.ops.iter().map(|op| op.operation_id).collect();
        entries.ids = ids;
        let purged = before - entries.ops.len();

        if purged > 0 {
            info!("Purged {} ledger entries older than {}", purged, cutoff);
        }
        Ok(purged)
    }

    pub fn len(&self) -> usize {
        self.entries.read().ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().ops.is_empty()
    }

    pub fn is_durable(&self) -> bool {
        self.log.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{LayerFlushResult, OperationType};
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn op(layer: &str, ok: bool) -> FlushOperation {
        let mut op = FlushOperation::start(
            BTreeSet::from([layer.to_string()]),
            OperationType::Manual,
            false,
        );
        let result = if ok {
            LayerFlushResult::success(layer, 1, 0.1, 3)
        } else {
            LayerFlushResult::error(layer, "disk full", 3)
        };
        op.finish(vec![result], vec![]);
        op
    }

    #[tokio::test]
    async fn test_list_recent_newest_first() {
        let ledger = OperationLedger::in_memory();
        let first = op("a", true);
        let second = op("b", true);
        ledger.record(first.clone()).await.unwrap();
        ledger.record(second.clone()).await.unwrap();

        let recent = ledger.list_recent(10);
        assert_eq!(recent[0].operation_id, second.operation_id);
        assert_eq!(recent[1].operation_id, first.operation_id);
        assert_eq!(ledger.list_recent(1).len(), 1);
    }

    #[tokio::test]
    async fn test_write_once() {
        let ledger = OperationLedger::in_memory();
        let entry = op("a", true);
        ledger.record(entry.clone()).await.unwrap();
        assert!(matches!(
            ledger.record(entry).await,
            Err(LedgerError::Duplicate(_))
        ));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_running_operation() {
        let ledger = OperationLedger::in_memory();
        let running = FlushOperation::start(BTreeSet::new(), OperationType::Manual, false);
        assert!(matches!(
            ledger.record(running).await,
            Err(LedgerError::NotTerminal(_))
        ));
    }

    #[tokio::test]
    async fn test_last_successful_flush_ignores_errors() {
        let ledger = OperationLedger::in_memory();
        let ok = op("a", true);
        ledger.record(ok.clone()).await.unwrap();
        ledger.record(op("a", false)).await.unwrap();

        assert_eq!(ledger.last_successful_flush("a"), ok.completed_at);
        assert_eq!(ledger.last_successful_flush("b"), None);
    }

    #[tokio::test]
    async fn test_purge() {
        let ledger = OperationLedger::in_memory();
        let mut old = op("a", true);
        old.completed_at = Some(Utc::now() - Duration::days(10));
        ledger.record(old.clone()).await.unwrap();
        ledger.record(op("b", true)).await.unwrap();

        let purged = ledger
            .purge_older_than(Utc::now() - Duration::days(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
        assert_eq!(ledger.len(), 1);
        assert!(ledger.get(&old.operation_id).is_none());
    }

    #[tokio::test]
    async fn test_durable_replay_and_purge() {
        let dir = tempfile::tempdir().unwrap();
        let config = LedgerConfig {
            path: Some(dir.path().join("flush.ledger")),
            fsync: false,
        };

        let mut old = op("a", true);
        old.completed_at = Some(Utc::now() - Duration::days(30));
        let recent = op("b", false);
        {
            let ledger = OperationLedger::open(&config).await.unwrap();
            assert!(ledger.is_durable());
            ledger.record(old.clone()).await.unwrap();
            ledger.record(recent.clone()).await.unwrap();
        }

        let ledger = OperationLedger::open(&config).await.unwrap();
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.get(&recent.operation_id), Some(recent.clone()));

        ledger
            .purge_older_than(Utc::now() - Duration::days(7))
            .await
            .unwrap();
        drop(ledger);

        let ledger = OperationLedger::open(&config).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.list_recent(5)[0].operation_id, recent.operation_id);
    }
}
