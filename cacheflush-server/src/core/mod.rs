pub mod coordinator;
pub mod error;
pub mod locks;
pub mod registry;
pub mod types;

pub use coordinator::{CoordinatorConfig, FlushCoordinator, LOCK_TIMEOUT_MESSAGE};
pub use error::FlushError;
pub use locks::{LayerGuard, LayerLocks};
pub use registry::LayerRegistry;
pub use types::{
    CacheLayerConfig, FlushOperation, LayerFlushResult, LayerFlushStatus, LayerUpdate,
    OperationStatus, OperationType, aggregate_status, validate_layer_id,
};
