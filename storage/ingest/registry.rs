use crate::deadline::Deadline;
use crate::error::{Result, StorageError};
use crate::sqlite::ConnectionPool;
use crate::types::{DeviceId, DeviceRemoval, Timestamp};
use std::sync::Arc;
use tracing::{info, instrument};

/// Local mirror of the external device registry.
///
/// The registry stays the source of truth; it notifies the store of new
/// and removed devices so referential checks and cascades can run here.
pub struct DeviceRegistry {
    pool: Arc<ConnectionPool>,
}

impl DeviceRegistry {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Record a device; repeated calls only refresh its name
    #[instrument(skip(self, deadline))]
    pub async fn register_device(
        &self,
        device_id: DeviceId,
        name: Option<&str>,
        deadline: Deadline,
    ) -> Result<()> {
        deadline
            .run("register_device", async {
                sqlx::query(
                    r#"
                    INSERT INTO devices (id, name, registered_at) VALUES (?1, ?2, ?3)
                    ON CONFLICT(id) DO UPDATE SET name = COALESCE(excluded.name, devices.name)
                    "#,
                )
                .bind(device_id.0)
                .bind(name)
                .bind(Timestamp::now().to_canonical())
                .execute(self.pool.writer())
                .await?;
                Ok(())
            })
            .await
    }

    /// Remove a device together with all of its points and snapshots
    #[instrument(skip(self, deadline))]
    pub async fn remove_device(&self, device_id: DeviceId, deadline: Deadline) -> Result<DeviceRemoval> {
        let mut tx = deadline
            .run("remove_device", async { Ok(self.pool.writer().begin().await?) })
            .await?;

        let removal = deadline
            .run("remove_device", async {
                // Explicit deletes keep the cascade when foreign keys are off.
                let points = sqlx::query("DELETE FROM metric_points WHERE device_id = ?1")
                    .bind(device_id.0)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

                let snapshots = sqlx::query("DELETE FROM status_snapshots WHERE device_id = ?1")
                    .bind(device_id.0)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

                let devices = sqlx::query("DELETE FROM devices WHERE id = ?1")
                    .bind(device_id.0)
                    .execute(&mut *tx)
                    .await?
                    .rows_affected();

                if devices == 0 {
                    return Err(StorageError::NotFound(format!("device {}", device_id)));
                }

                Ok(DeviceRemoval {
                    device_id,
                    points_deleted: points,
                    snapshots_deleted: snapshots,
                })
            })
            .await?;

        tx.commit().await?;

        info!(
            "Removed device {} ({} points, {} snapshots)",
            device_id, removal.points_deleted, removal.snapshots_deleted
        );
        Ok(removal)
    }

    /// Whether the device is registered
    pub async fn device_exists(&self, device_id: DeviceId, deadline: Deadline) -> Result<bool> {
        deadline
            .run("device_exists", async {
                let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices WHERE id = ?1")
                    .bind(device_id.0)
                    .fetch_one(self.pool.reader())
                    .await?;
                Ok(count > 0)
            })
            .await
    }
}
