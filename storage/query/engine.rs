use crate::config::QueryConfig;
use crate::deadline::Deadline;
use crate::error::{Result, StorageError};
use crate::query::cursor::{Cursor, PointCursor, PointRange, SnapshotCursor, SnapshotHistory};
use crate::query::rows::{point_from_row, snapshot_from_row, POINT_COLUMNS, SNAPSHOT_COLUMNS};
use crate::sqlite::query::Order;
use crate::sqlite::{bind_params, ConnectionPool, QueryBuilder};
use crate::types::{
    AggregateBucket, BucketGranularity, DeviceId, MetricPoint, MetricType, StatusSnapshot,
    Timestamp,
};
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Epoch milliseconds of a canonical `YYYY-MM-DDTHH:MM:SS.mmmZ` column
const EPOCH_MS: &str =
    "(CAST(strftime('%s', timestamp) AS INTEGER) * 1000 + CAST(substr(timestamp, 21, 3) AS INTEGER))";

/// Read-only access paths over stored points and snapshots.
///
/// Every query runs on the reader pool and never waits on ingestion.
pub struct QueryEngine {
    pool: Arc<ConnectionPool>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(pool: Arc<ConnectionPool>, config: QueryConfig) -> Self {
        Self { pool, config }
    }

    /// Most recent points of a device across all metric types,
    /// newest first with ties broken by descending id
    #[instrument(skip(self, deadline))]
    pub async fn latest_points(
        &self,
        device_id: DeviceId,
        limit: usize,
        deadline: Deadline,
    ) -> Result<Vec<MetricPoint>> {
        if limit == 0 {
            return Err(StorageError::ValidationError("limit must be positive".to_string()));
        }
        if limit > self.config.max_limit {
            return Err(StorageError::ValidationError(format!(
                "limit {} exceeds maximum {}",
                limit, self.config.max_limit
            )));
        }

        let (sql, params) = QueryBuilder::new("metric_points")
            .eq_int("device_id", device_id.0)
            .order_by_time(Order::Descending)
            .limit(limit)
            .build_select(POINT_COLUMNS);

        let rows = deadline
            .run("latest_points", async {
                Ok(bind_params(sqlx::query(&sql), &params)
                    .fetch_all(self.pool.reader())
                    .await?)
            })
            .await?;

        let points = rows.iter().map(point_from_row).collect::<Result<Vec<_>>>()?;
        debug!("Found {} latest points", points.len());
        Ok(points)
    }

    /// Lazy sequence of points in `[from, to]`, oldest first.
    ///
    /// No rows are read until the cursor is advanced.
    pub fn range_points(
        &self,
        device_id: DeviceId,
        metric_type: Option<&MetricType>,
        from: Timestamp,
        to: Timestamp,
        deadline: Deadline,
    ) -> Result<PointCursor> {
        check_range(from, to)?;

        let source = PointRange {
            device_id,
            metric_type: metric_type.cloned(),
            from,
            to,
        };

        Ok(Cursor::new(
            self.pool.reader().clone(),
            source,
            self.config.page_size,
            deadline,
        ))
    }

    /// Fixed-width buckets over `[from, to]`; empty buckets are omitted
    #[instrument(skip(self, deadline))]
    pub async fn aggregate(
        &self,
        device_id: DeviceId,
        metric_type: &MetricType,
        from: Timestamp,
        to: Timestamp,
        granularity: BucketGranularity,
        deadline: Deadline,
    ) -> Result<Vec<AggregateBucket>> {
        check_range(from, to)?;

        let width = granularity.width_millis()?;

        // Floor division keeps buckets epoch-aligned before 1970 as well.
        let sql = format!(
            r#"
            SELECT epoch_ms - (((epoch_ms % ?5) + ?5) % ?5) AS bucket_ms,
                   AVG(value) AS avg_value,
                   MIN(value) AS min_value,
                   MAX(value) AS max_value,
                   COUNT(*) AS point_count
            FROM (
                SELECT value, {epoch_ms} AS epoch_ms
                FROM metric_points
                WHERE device_id = ?1 AND metric_type = ?2 AND timestamp >= ?3 AND timestamp <= ?4
            )
            GROUP BY bucket_ms
            ORDER BY bucket_ms ASC
            "#,
            epoch_ms = EPOCH_MS
        );

        let rows = deadline
            .run("aggregate", async {
                Ok(sqlx::query(&sql)
                    .bind(device_id.0)
                    .bind(metric_type.as_str())
                    .bind(from.to_canonical())
                    .bind(to.to_canonical())
                    .bind(width)
                    .fetch_all(self.pool.reader())
                    .await?)
            })
            .await?;

        let buckets = rows
            .iter()
            .map(|row| {
                Ok(AggregateBucket {
                    // The first bucket may start before year 0.
                    bucket_start: Timestamp::from_millis(
                        row.try_get::<i64, _>("bucket_ms")?.max(Timestamp::EARLIEST_MILLIS),
                    )?,
                    avg: row.try_get("avg_value")?,
                    min: row.try_get("min_value")?,
                    max: row.try_get("max_value")?,
                    count: row.try_get("point_count")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("Found {} aggregated buckets", buckets.len());
        Ok(buckets)
    }

    /// The single most recent snapshot of a device
    #[instrument(skip(self, deadline))]
    pub async fn latest_snapshot(&self, device_id: DeviceId, deadline: Deadline) -> Result<StatusSnapshot> {
        let (sql, params) = QueryBuilder::new("status_snapshots")
            .eq_int("device_id", device_id.0)
            .order_by_time(Order::Descending)
            .limit(1)
            .build_select(SNAPSHOT_COLUMNS);

        let row = deadline
            .run("latest_snapshot", async {
                Ok(bind_params(sqlx::query(&sql), &params)
                    .fetch_optional(self.pool.reader())
                    .await?)
            })
            .await?;

        match row {
            Some(row) => snapshot_from_row(&row),
            None => Err(StorageError::NotFound(format!(
                "no snapshots for device {}",
                device_id
            ))),
        }
    }

    /// Lazy sequence of snapshots in `[from, to]`, newest first
    pub fn snapshot_history(
        &self,
        device_id: DeviceId,
        from: Timestamp,
        to: Timestamp,
        deadline: Deadline,
    ) -> Result<SnapshotCursor> {
        check_range(from, to)?;

        Ok(Cursor::new(
            self.pool.reader().clone(),
            SnapshotHistory { device_id, from, to },
            self.config.page_size,
            deadline,
        ))
    }

    /// Most recent point for each metric type of a device, by metric type
    #[instrument(skip(self, deadline))]
    pub async fn latest_values(&self, device_id: DeviceId, deadline: Deadline) -> Result<Vec<MetricPoint>> {
        let rows = deadline
            .run("latest_values", async {
                Ok(sqlx::query(
                    r#"
                    SELECT p.id, p.device_id, p.timestamp, p.metric_type, p.value, p.unit, p.created_at
                    FROM (SELECT DISTINCT metric_type FROM metric_points WHERE device_id = ?1) AS t
                    JOIN metric_points AS p ON p.id = (
                        SELECT q.id FROM metric_points AS q
                        WHERE q.device_id = ?1 AND q.metric_type = t.metric_type
                        ORDER BY q.timestamp DESC, q.id DESC
                        LIMIT 1
                    )
                    ORDER BY t.metric_type
                    "#,
                )
                .bind(device_id.0)
                .fetch_all(self.pool.reader())
                .await?)
            })
            .await?;

        rows.iter().map(point_from_row).collect()
    }

    /// Distinct metric types recorded for a device
    #[instrument(skip(self, deadline))]
    pub async fn metric_types(&self, device_id: DeviceId, deadline: Deadline) -> Result<Vec<MetricType>> {
        let tags: Vec<String> = deadline
            .run("metric_types", async {
                Ok(sqlx::query_scalar(
                    "SELECT DISTINCT metric_type FROM metric_points WHERE device_id = ?1 ORDER BY metric_type",
                )
                .bind(device_id.0)
                .fetch_all(self.pool.reader())
                .await?)
            })
            .await?;

        tags.into_iter().map(MetricType::new).collect()
    }
}

fn check_range(from: Timestamp, to: Timestamp) -> Result<()> {
    if from > to {
        return Err(StorageError::ValidationError(format!(
            "range start {} is after end {}",
            from, to
        )));
    }
    Ok(())
}
