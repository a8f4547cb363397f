//! Compute core for an interactive single-cell analytics viewer.
//!
//! This facade re-exports the workspace surface: the operation catalog,
//! the pure handlers and numeric primitives they build on, the stateful
//! marker engine, and the execution stack (accelerator, worker pool,
//! dispatcher) with its cancellation and caching companions.
//!
//! Typical embedding:
//!
//! ```no_run
//! use cyto::{CoreDispatcher, DispatchOptions, Method};
//!
//! # async fn demo() -> Result<(), cyto::CoreError> {
//! let dispatcher = CoreDispatcher::new(DispatchOptions::default());
//! let stats = dispatcher.compute_stats(vec![1.0, 2.0, 3.0]).await?;
//! let diff = dispatcher
//!     .compute_differential(vec![1.0, 2.0], vec![5.0, 6.0], Method::TTest)
//!     .await?;
//! # let _ = (stats, diff);
//! # Ok(())
//! # }
//! ```

pub use cyto_accel as accel;
pub use cyto_cache as cache;
pub use cyto_cancel as cancel;
pub use cyto_catalog as catalog;
pub use cyto_config as config;
pub use cyto_dispatch as dispatch;
pub use cyto_handlers as handlers;
pub use cyto_markers as markers;
pub use cyto_numeric as numeric;
pub use cyto_pool as pool;

pub use cyto_cache::{CacheStats, LruCache};
pub use cyto_cancel::{CancelToken, NamedSlots, OperationContext, OperationSlot};
pub use cyto_catalog::{
    Backend, BackendState, BinSpec, ComputeTrailer, Condition, CoreError, Envelope, FieldData,
    FieldMap, FilterLogic, GroupValues, Method, OpOutput, OperationId, Payload,
};
pub use cyto_config::{CoreConfig, from_toml_str};
pub use cyto_dispatch::{
    CleanupReason, CoreDispatcher, DispatchOptions, DispatcherStatus, ExecuteOptions,
    LocalMemoryBroker, MemoryPressureBroker,
};
pub use cyto_markers::MarkerContext;
pub use cyto_pool::{PoolOptions, PoolStatus, PruneReport, RequestOptions, WorkerPool};
