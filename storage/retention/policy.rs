use crate::config::RetentionConfig;
use crate::error::Result;
use crate::sqlite::{bind_params, ConnectionPool, QueryBuilder};
use crate::types::{RetentionReport, Timestamp};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Data retention manager
pub struct RetentionManager {
    pool: Arc<ConnectionPool>,
    config: RetentionConfig,
}

impl RetentionManager {
    /// Create new retention manager
    pub fn new(pool: Arc<ConnectionPool>, config: RetentionConfig) -> Self {
        Self { pool, config }
    }

    pub fn config(&self) -> &RetentionConfig {
        &self.config
    }

    /// Prune points and snapshots older than their horizons relative to `now`
    pub async fn run_retention_pass(&self, now: Timestamp) -> Result<RetentionReport> {
        self.run_retention_pass_until(now, &CancellationToken::new()).await
    }

    /// Like [`run_retention_pass`](Self::run_retention_pass), but stops
    /// between chunks once `cancel` fires.
    ///
    /// Every chunk commits on its own, so an interrupted pass leaves only
    /// unpruned rows behind for the next one.
    #[instrument(skip(self, cancel))]
    pub async fn run_retention_pass_until(
        &self,
        now: Timestamp,
        cancel: &CancellationToken,
    ) -> Result<RetentionReport> {
        info!("Running data retention pass");

        let started = Instant::now();
        // A horizon reaching past year 0 keeps everything.
        let points_cutoff = now.saturating_sub(self.config.points_horizon()?)?;
        let snapshots_cutoff = now.saturating_sub(self.config.snapshots_horizon()?)?;

        let mut chunks = 0;

        let (points_deleted, points_done) = self
            .prune_table("metric_points", points_cutoff, cancel, &mut chunks)
            .await?;
        info!("Deleted {} expired metric points", points_deleted);

        let (snapshots_deleted, snapshots_done) = if points_done {
            self.prune_table("status_snapshots", snapshots_cutoff, cancel, &mut chunks)
                .await?
        } else {
            (0, false)
        };
        info!("Deleted {} expired status snapshots", snapshots_deleted);

        let report = RetentionReport {
            points_deleted,
            snapshots_deleted,
            chunks,
            points_cutoff,
            snapshots_cutoff,
            executed_at: Timestamp::now(),
            duration: started.elapsed(),
            completed: points_done && snapshots_done,
        };

        if report.completed {
            info!(
                "Retention pass complete: {} total rows deleted in {:?}",
                report.total_deleted(),
                report.duration
            );
        } else {
            info!(
                "Retention pass cancelled after {} rows in {:?}",
                report.total_deleted(),
                report.duration
            );
        }

        Ok(report)
    }

    /// Delete expired rows chunk by chunk; returns rows deleted and whether
    /// the table was fully pruned
    async fn prune_table(
        &self,
        table: &str,
        cutoff: Timestamp,
        cancel: &CancellationToken,
        chunks: &mut u64,
    ) -> Result<(u64, bool)> {
        let chunk_size = self.config.delete_chunk_size;
        let (sql, params) = QueryBuilder::new(table)
            .older_than(cutoff)
            .build_delete_chunk(chunk_size);

        let mut deleted = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok((deleted, false));
            }

            let mut tx = self.pool.writer().begin().await?;
            let affected = bind_params(sqlx::query(&sql), &params)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            tx.commit().await?;

            if affected == 0 {
                break;
            }

            *chunks += 1;
            deleted += affected;
            debug!("Deleted chunk of {} rows from {}", affected, table);

            if (affected as usize) < chunk_size {
                break;
            }
        }

        Ok((deleted, true))
    }

    /// Get storage statistics
    pub async fn storage_stats(&self) -> Result<StorageStats> {
        let reader = self.pool.reader();

        let (points_sql, _) = QueryBuilder::new("metric_points").build_count();
        let points_count: i64 = sqlx::query_scalar(&points_sql).fetch_one(reader).await?;

        let (snapshots_sql, _) = QueryBuilder::new("status_snapshots").build_count();
        let snapshots_count: i64 = sqlx::query_scalar(&snapshots_sql).fetch_one(reader).await?;

        let (devices_sql, _) = QueryBuilder::new("devices").build_count();
        let devices_count: i64 = sqlx::query_scalar(&devices_sql).fetch_one(reader).await?;

        let page_count: i64 = sqlx::query_scalar("PRAGMA page_count").fetch_one(reader).await?;
        let page_size: i64 = sqlx::query_scalar("PRAGMA page_size").fetch_one(reader).await?;

        Ok(StorageStats {
            points_count,
            snapshots_count,
            devices_count,
            total_size_bytes: page_count * page_size,
        })
    }
}

/// Storage statistics
#[derive(Debug, Clone)]
pub struct StorageStats {
    pub points_count: i64,
    pub snapshots_count: i64,
    pub devices_count: i64,
    /// Main database file size; the WAL is not included
    pub total_size_bytes: i64,
}

impl StorageStats {
    /// Get total size in MB
    pub fn total_size_mb(&self) -> f64 {
        self.total_size_bytes as f64 / (1024.0 * 1024.0)
    }
}
