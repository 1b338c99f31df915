pub mod adapters;
pub mod config;
pub mod core;
pub mod ledger;
pub mod metrics;
pub mod scheduler;
pub mod server;

// Re-export commonly used types
pub use adapters::{
    AdapterError, AdapterSet, AdapterSpec, DiskCacheAdapter, FlushAdapter, FlushOutcome,
    MemoryCache, MemoryCacheAdapter,
};
pub use config::ServerConfig;
pub use core::{
    CacheLayerConfig, CoordinatorConfig, FlushCoordinator, FlushError, FlushOperation,
    LayerFlushResult, LayerFlushStatus, LayerRegistry, LayerUpdate, OperationStatus,
    OperationType,
};
pub use ledger::{LedgerConfig, LedgerError, OperationLedger};
pub use metrics::init_metrics;
pub use scheduler::{AutoFlushScheduler, SchedulerConfig};
pub use server::{AppState, create_router};
