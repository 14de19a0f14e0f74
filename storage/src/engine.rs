use crate::config::StorageConfig;
use crate::deadline::Deadline;
use crate::error::Result;
use crate::ingest::{DeviceRegistry, IngestWriter, PointBuffer};
use crate::query::{PointCursor, QueryEngine, SnapshotCursor};
use crate::retention::{RetentionManager, RetentionScheduler, StorageStats};
use crate::sqlite::{ConnectionPool, PoolStatus, SchemaManager};
use crate::types::{
    AggregateBucket, BucketGranularity, DeviceId, DeviceRemoval, MetricPoint, MetricType,
    NewMetricPoint, NewStatusSnapshot, PointId, RetentionReport, SnapshotId, StatusSnapshot,
    Timestamp,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Storage engine for device telemetry.
///
/// Cheap to share behind an `Arc`: every operation takes `&self`, and
/// concurrent pollers and dashboard queries may call it at the same time.
pub struct StorageEngine {
    pool: Arc<ConnectionPool>,
    config: StorageConfig,
    schema: SchemaManager,
    writer: IngestWriter,
    queries: QueryEngine,
    registry: DeviceRegistry,
    retention: Arc<RetentionManager>,
    buffer: PointBuffer,
}

impl StorageEngine {
    /// Open (or create) the database and bring its schema up to date
    pub async fn open(config: StorageConfig) -> Result<Self> {
        info!("Initializing StorageEngine");

        config.validate()?;

        let pool = Arc::new(ConnectionPool::new(&config.database).await?);

        let schema = SchemaManager::new(pool.clone());
        schema.ensure_schema().await?;

        let writer = IngestWriter::new(pool.clone(), config.ingestion.clone());
        let queries = QueryEngine::new(pool.clone(), config.query.clone());
        let registry = DeviceRegistry::new(pool.clone());
        let retention = Arc::new(RetentionManager::new(pool.clone(), config.retention.clone()));
        let buffer = PointBuffer::new(config.ingestion.max_buffer_size);

        info!("StorageEngine ready: {}", pool.status());

        Ok(Self {
            pool,
            config,
            schema,
            writer,
            queries,
            registry,
            retention,
            buffer,
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn schema(&self) -> &SchemaManager {
        &self.schema
    }

    /// Re-run schema verification and idempotent creation
    pub async fn ensure_schema(&self) -> Result<()> {
        self.schema.ensure_schema().await
    }

    pub async fn register_device(
        &self,
        device_id: DeviceId,
        name: Option<&str>,
        deadline: Deadline,
    ) -> Result<()> {
        self.registry.register_device(device_id, name, deadline).await
    }

    pub async fn remove_device(&self, device_id: DeviceId, deadline: Deadline) -> Result<DeviceRemoval> {
        self.registry.remove_device(device_id, deadline).await
    }

    pub async fn device_exists(&self, device_id: DeviceId, deadline: Deadline) -> Result<bool> {
        self.registry.device_exists(device_id, deadline).await
    }

    pub async fn write_point(&self, point: NewMetricPoint, deadline: Deadline) -> Result<PointId> {
        self.writer.write_point(point, deadline).await
    }

    pub async fn write_points_batch(
        &self,
        points: Vec<NewMetricPoint>,
        deadline: Deadline,
    ) -> Result<Vec<PointId>> {
        self.writer.write_points_batch(points, deadline).await
    }

    pub async fn write_snapshot(
        &self,
        snapshot: NewStatusSnapshot,
        deadline: Deadline,
    ) -> Result<SnapshotId> {
        self.writer.write_snapshot(snapshot, deadline).await
    }

    /// Add a point to the ingest buffer; committed by the next flush
    pub async fn buffer_point(&self, point: NewMetricPoint) -> Result<()> {
        self.buffer
            .push(point)
            .await
            .inspect_err(|e| warn!("Point not buffered: {}", e))
    }

    /// Commit buffered points in batches of `ingestion.max_batch_size`.
    ///
    /// On a retryable failure the failed batch and everything after it go
    /// back to the front of the buffer. Any other failure drops the failed
    /// batch, requeues the rest and returns the error.
    pub async fn flush_buffer(&self, deadline: Deadline) -> Result<usize> {
        let mut pending = self.buffer.drain().await;
        if pending.is_empty() {
            return Ok(0);
        }

        let mut committed = 0;

        while !pending.is_empty() {
            let take = pending.len().min(self.config.ingestion.max_batch_size);
            let rest = pending.split_off(take);
            let batch = pending;
            let size = batch.len();

            match self.writer.write_points_batch(batch.clone(), deadline).await {
                Ok(_) => {
                    committed += size;
                    pending = rest;
                }
                Err(e) => {
                    let mut unflushed = if e.is_retryable() { batch } else { Vec::new() };
                    warn!(
                        "Buffer flush failed after {} points, requeueing {}: {}",
                        committed,
                        unflushed.len() + rest.len(),
                        e
                    );
                    unflushed.extend(rest);
                    self.buffer.requeue(unflushed).await;
                    return Err(e);
                }
            }
        }

        debug!("Flushed {} buffered points", committed);
        Ok(committed)
    }

    pub async fn buffered_len(&self) -> usize {
        self.buffer.len().await
    }

    pub async fn latest_points(
        &self,
        device_id: DeviceId,
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<MetricPoint>> {
        self.queries.latest_points(device_id, limit, deadline).await
    }

    pub fn range_points(
        &self,
        device_id: DeviceId,
        metric_type: Option<&MetricType>,
        from: Timestamp,
        to: Timestamp,
        deadline: Deadline,
    ) -> Result<PointCursor> {
        self.queries.range_points(device_id, metric_type, from, to, deadline)
    }

    pub async fn aggregate(
        &self,
        device_id: DeviceId,
        metric_type: &MetricType,
        from: Timestamp,
        to: Timestamp,
        granularity: BucketGranularity,
        deadline: Deadline,
    ) -> Result<Vec<AggregateBucket>> {
        self.queries
            .aggregate(device_id, metric_type, from, to, granularity, deadline)
            .await
    }

    pub async fn latest_snapshot(&self, device_id: DeviceId, deadline: Deadline) -> Result<StatusSnapshot> {
        self.queries.latest_snapshot(device_id, deadline).await
    }

    pub fn snapshot_history(
        &self,
        device_id: DeviceId,
        from: Timestamp,
        to: Timestamp,
        deadline: Deadline,
    ) -> Result<SnapshotCursor> {
        self.queries.snapshot_history(device_id, from, to, deadline)
    }

    pub async fn latest_values(&self, device_id: DeviceId, deadline: Deadline) -> Result<Vec<MetricPoint>> {
        self.queries.latest_values(device_id, deadline).await
    }

    pub async fn metric_types(&self, device_id: DeviceId, deadline: Deadline) -> Result<Vec<MetricType>> {
        self.queries.metric_types(device_id, deadline).await
    }

    pub async fn run_retention_pass(&self, now: Timestamp) -> Result<RetentionReport> {
        self.retention.run_retention_pass(now).await
    }

    pub async fn storage_stats(&self) -> Result<StorageStats> {
        self.retention.storage_stats().await
    }

    pub fn retention_manager(&self) -> Arc<RetentionManager> {
        self.retention.clone()
    }

    /// Scheduler over this engine's retention manager and configured interval
    pub fn retention_scheduler(&self) -> RetentionScheduler {
        RetentionScheduler::new(self.retention.clone(), self.config.retention.interval())
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Get pool status
    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Close both pools; in-flight operations finish first
    pub async fn close(&self) {
        info!("Closing StorageEngine");
        self.pool.close().await;
    }
}
