use crate::config::IngestionConfig;
use crate::deadline::Deadline;
use crate::error::{Result, StorageError};
use crate::sqlite::ConnectionPool;
use crate::types::{
    DeviceId, MetricType, NewMetricPoint, NewStatusSnapshot, PointId, SnapshotId, Timestamp,
};
use sqlx::{Sqlite, Transaction};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Metric point that passed ingest validation
#[derive(Debug, Clone)]
pub(crate) struct ValidPoint {
    pub device_id: DeviceId,
    pub timestamp: Timestamp,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: Option<String>,
}

/// Check a poller sample and convert it to typed fields
pub(crate) fn validate_point(point: &NewMetricPoint) -> Result<ValidPoint> {
    let timestamp = Timestamp::parse(&point.timestamp)?;
    let metric_type = MetricType::new(point.metric_type.as_str())?;

    if !point.value.is_finite() {
        return Err(StorageError::ValidationError(format!(
            "value {} for {} is not finite",
            point.value, metric_type
        )));
    }

    Ok(ValidPoint {
        device_id: point.device_id,
        timestamp,
        metric_type,
        value: point.value,
        unit: point.unit.clone(),
    })
}

/// Validated, transactional writes of points and snapshots.
///
/// Each call runs in its own short transaction on the single writer
/// connection; nothing is held between calls.
pub struct IngestWriter {
    pool: Arc<ConnectionPool>,
    config: IngestionConfig,
}

impl IngestWriter {
    pub fn new(pool: Arc<ConnectionPool>, config: IngestionConfig) -> Self {
        Self { pool, config }
    }

    /// Insert one metric point
    #[instrument(skip(self, point, deadline), fields(device_id = %point.device_id))]
    pub async fn write_point(&self, point: NewMetricPoint, deadline: Deadline) -> Result<PointId> {
        let valid = validate_point(&point).inspect_err(|e| warn!("Rejected point: {}", e))?;

        let ids = self.commit_points(std::slice::from_ref(&valid), deadline).await?;
        ids.into_iter()
            .next()
            .ok_or_else(|| StorageError::DatabaseError("insert returned no row id".to_string()))
    }

    /// Insert a batch atomically: every point is stored or none is
    #[instrument(skip(self, points, deadline), fields(batch_size = points.len()))]
    pub async fn write_points_batch(
        &self,
        points: Vec<NewMetricPoint>,
        deadline: Deadline,
    ) -> Result<Vec<PointId>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        if points.len() > self.config.max_batch_size {
            return Err(StorageError::ValidationError(format!(
                "batch of {} points exceeds limit of {}",
                points.len(),
                self.config.max_batch_size
            )));
        }

        let valid = points
            .iter()
            .enumerate()
            .map(|(index, point)| {
                validate_point(point).map_err(|e| match e {
                    StorageError::ValidationError(msg) => {
                        StorageError::ValidationError(format!("batch index {}: {}", index, msg))
                    }
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| warn!("Rejected batch: {}", e))?;

        let ids = self.commit_points(&valid, deadline).await?;
        info!("Committed batch of {} points", ids.len());
        Ok(ids)
    }

    /// Insert one status snapshot
    #[instrument(skip(self, snapshot, deadline), fields(device_id = %snapshot.device_id))]
    pub async fn write_snapshot(
        &self,
        snapshot: NewStatusSnapshot,
        deadline: Deadline,
    ) -> Result<SnapshotId> {
        let timestamp = Timestamp::parse(&snapshot.timestamp)?;
        let encoded = snapshot
            .payload
            .encode()
            .inspect_err(|e| warn!("Rejected snapshot payload: {}", e))?;

        let enforce = self.pool.enforces_foreign_keys();
        let device_id = snapshot.device_id;

        let mut tx = deadline
            .run("write_snapshot", async { Ok(self.pool.writer().begin().await?) })
            .await?;

        let id = deadline
            .run(
                "write_snapshot",
                insert_snapshot(&mut tx, device_id, timestamp, &encoded, enforce),
            )
            .await?;

        tx.commit().await?;

        debug!("Stored snapshot {} for device {}", id.0, device_id);
        Ok(id)
    }

    async fn commit_points(&self, rows: &[ValidPoint], deadline: Deadline) -> Result<Vec<PointId>> {
        let enforce = self.pool.enforces_foreign_keys();

        let mut tx = deadline
            .run("write_points", async { Ok(self.pool.writer().begin().await?) })
            .await?;

        // Dropping `tx` on timeout or error rolls the whole batch back.
        let ids = deadline
            .run("write_points", insert_points(&mut tx, rows, enforce))
            .await?;

        tx.commit().await?;

        debug!("Committed {} points", ids.len());
        Ok(ids)
    }
}

async fn ensure_devices_known(
    tx: &mut Transaction<'_, Sqlite>,
    devices: impl IntoIterator<Item = DeviceId>,
) -> Result<()> {
    for device_id in devices {
        let known: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE id = ?1")
            .bind(device_id.0)
            .fetch_one(&mut **tx)
            .await?;

        if known == 0 {
            return Err(StorageError::ReferentialError(format!(
                "unknown device {}",
                device_id
            )));
        }
    }
    Ok(())
}

async fn insert_points(
    tx: &mut Transaction<'_, Sqlite>,
    rows: &[ValidPoint],
    enforce_devices: bool,
) -> Result<Vec<PointId>> {
    if enforce_devices {
        let devices: BTreeSet<DeviceId> = rows.iter().map(|row| row.device_id).collect();
        ensure_devices_known(tx, devices).await?;
    }

    let created_at = Timestamp::now().to_canonical();
    let mut ids = Vec::with_capacity(rows.len());

    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO metric_points (device_id, timestamp, metric_type, value, unit, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(row.device_id.0)
        .bind(row.timestamp.to_canonical())
        .bind(row.metric_type.as_str())
        .bind(row.value)
        .bind(row.unit.as_deref())
        .bind(created_at.as_str())
        .execute(&mut **tx)
        .await?;

        ids.push(PointId(result.last_insert_rowid()));
    }

    Ok(ids)
}

async fn insert_snapshot(
    tx: &mut Transaction<'_, Sqlite>,
    device_id: DeviceId,
    timestamp: Timestamp,
    encoded_payload: &str,
    enforce_devices: bool,
) -> Result<SnapshotId> {
    if enforce_devices {
        ensure_devices_known(tx, [device_id]).await?;
    }

    let result = sqlx::query(
        r#"
        INSERT INTO status_snapshots (device_id, timestamp, status_payload, created_at)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(device_id.0)
    .bind(timestamp.to_canonical())
    .bind(encoded_payload)
    .bind(Timestamp::now().to_canonical())
    .execute(&mut **tx)
    .await?;

    Ok(SnapshotId(result.last_insert_rowid()))
}
