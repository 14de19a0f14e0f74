use crate::error::{Result, StorageError};
use crate::types::{
    DeviceId, MetricPoint, MetricType, PointId, SnapshotId, StatusPayload, StatusSnapshot,
    Timestamp,
};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

pub const POINT_COLUMNS: &[&str] = &[
    "id",
    "device_id",
    "timestamp",
    "metric_type",
    "value",
    "unit",
    "created_at",
];

pub const SNAPSHOT_COLUMNS: &[&str] = &["id", "device_id", "timestamp", "status_payload", "created_at"];

/// Parse a timestamp read back from storage
fn stored_timestamp(row: &SqliteRow, column: &str) -> Result<Timestamp> {
    let raw: String = row.try_get(column)?;
    Timestamp::parse(&raw).map_err(|e| {
        StorageError::DatabaseError(format!("corrupt {} value '{}': {}", column, raw, e))
    })
}

pub fn point_from_row(row: &SqliteRow) -> Result<MetricPoint> {
    let metric_type: String = row.try_get("metric_type")?;

    Ok(MetricPoint {
        id: PointId(row.try_get("id")?),
        device_id: DeviceId(row.try_get("device_id")?),
        timestamp: stored_timestamp(row, "timestamp")?,
        metric_type: MetricType::new(metric_type)
            .map_err(|e| StorageError::DatabaseError(format!("corrupt metric_type: {}", e)))?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
        created_at: stored_timestamp(row, "created_at")?,
    })
}

pub fn snapshot_from_row(row: &SqliteRow) -> Result<StatusSnapshot> {
    let encoded: String = row.try_get("status_payload")?;

    Ok(StatusSnapshot {
        id: SnapshotId(row.try_get("id")?),
        device_id: DeviceId(row.try_get("device_id")?),
        timestamp: stored_timestamp(row, "timestamp")?,
        payload: StatusPayload::decode(&encoded)?,
        created_at: stored_timestamp(row, "created_at")?,
    })
}
