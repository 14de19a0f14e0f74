//! Embedded time-series store for mining-device telemetry
//!
//! Persists numeric metric points and JSON status snapshots per device in a
//! local SQLite database, and serves the dashboard's read paths over them.
//!
//! # Features
//!
//! - Validated, atomic ingestion of single points, batches and snapshots
//! - Single-writer transactions with concurrent WAL readers
//! - Lazy keyset-paginated range cursors and epoch-aligned aggregation
//! - Chunked, cancellable retention passes on a background scheduler
//! - Per-call deadlines that roll back unfinished writes
//!
//! # Example
//!
//! ```no_run
//! use rig_telemetry_store::{Deadline, DeviceId, NewMetricPoint, StorageConfig, StorageEngine};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let storage = StorageEngine::open(StorageConfig::with_path("telemetry.db")).await?;
//!
//!     storage.register_device(DeviceId(1), Some("rig-01"), Deadline::none()).await?;
//!
//!     let point = NewMetricPoint::new(DeviceId(1), "2024-06-01T12:00:00Z", "hashrate", 98.4)
//!         .with_unit("TH/s");
//!     storage.write_point(point, Deadline::none()).await?;
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod types;

// Include sqlite module from parent directory
#[path = "../sqlite/mod.rs"]
pub mod sqlite_impl;
pub mod sqlite {
    pub use super::sqlite_impl::*;
}

// Include ingest module from parent directory
#[path = "../ingest/mod.rs"]
pub mod ingest_impl;
pub mod ingest {
    pub use super::ingest_impl::*;
}

// Include query module from parent directory
#[path = "../query/mod.rs"]
pub mod query_impl;
pub mod query {
    pub use super::query_impl::*;
}

// Include retention module from parent directory
#[path = "../retention/mod.rs"]
pub mod retention_impl;
pub mod retention {
    pub use super::retention_impl::*;
}

// Re-export main types
pub use config::{
    DatabaseConfig, IngestionConfig, QueryConfig, RetentionConfig, StorageConfig,
};
pub use deadline::Deadline;
pub use engine::StorageEngine;
pub use error::{Result, StorageError};
pub use ingest::{DeviceRegistry, IngestWriter, PointBuffer};
pub use query::{Cursor, PointCursor, QueryEngine, SnapshotCursor};
pub use sqlite::{ConnectionPool, PoolStatus, SchemaManager, SCHEMA_VERSION};
pub use types::{
    AggregateBucket, BucketGranularity, DeviceId, DeviceRemoval, MetricPoint, MetricType,
    NewMetricPoint, NewStatusSnapshot, PointId, RetentionReport, SnapshotId, StatusPayload,
    StatusSnapshot, Timestamp,
};

// Re-export retention types
pub use retention::{RetentionManager, RetentionScheduler, StorageStats};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize tracing subscriber (for demos and tests)
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rig_telemetry_store=info"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();
}
