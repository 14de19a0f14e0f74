//! Table and index definitions with additive, versioned migrations.

use crate::error::{Result, StorageError};
use crate::sqlite::ConnectionPool;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Highest schema version this binary knows how to create
pub const SCHEMA_VERSION: i64 = 1;

/// Expected `(column, declared type)` pairs per table
const TABLE_SHAPES: &[(&str, &[(&str, &str)])] = &[
    (
        "devices",
        &[("id", "INTEGER"), ("name", "TEXT"), ("registered_at", "TEXT")],
    ),
    (
        "metric_points",
        &[
            ("id", "INTEGER"),
            ("device_id", "INTEGER"),
            ("timestamp", "TEXT"),
            ("metric_type", "TEXT"),
            ("value", "REAL"),
            ("unit", "TEXT"),
            ("created_at", "TEXT"),
        ],
    ),
    (
        "status_snapshots",
        &[
            ("id", "INTEGER"),
            ("device_id", "INTEGER"),
            ("timestamp", "TEXT"),
            ("status_payload", "TEXT"),
            ("created_at", "TEXT"),
        ],
    ),
];

/// Indices the query paths depend on: `(table, index, key columns)`
const REQUIRED_INDICES: &[(&str, &str, &[&str])] = &[
    ("metric_points", "idx_metric_points_device_time", &["device_id", "timestamp"]),
    ("metric_points", "idx_metric_points_type_time", &["metric_type", "timestamp"]),
    (
        "metric_points",
        "idx_metric_points_device_type_time",
        &["device_id", "metric_type", "timestamp"],
    ),
    ("metric_points", "idx_metric_points_time", &["timestamp"]),
    ("status_snapshots", "idx_status_snapshots_device_time", &["device_id", "timestamp"]),
    ("status_snapshots", "idx_status_snapshots_time", &["timestamp"]),
];

const MIGRATION_V1: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS devices (
        id INTEGER PRIMARY KEY,
        name TEXT,
        registered_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metric_points (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        metric_type TEXT NOT NULL,
        value REAL NOT NULL,
        unit TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS status_snapshots (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id INTEGER NOT NULL REFERENCES devices(id) ON DELETE CASCADE,
        timestamp TEXT NOT NULL,
        status_payload TEXT NOT NULL,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_metric_points_device_time ON metric_points(device_id, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_metric_points_type_time ON metric_points(metric_type, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_metric_points_device_type_time ON metric_points(device_id, metric_type, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_metric_points_time ON metric_points(timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_status_snapshots_device_time ON status_snapshots(device_id, timestamp DESC)",
    "CREATE INDEX IF NOT EXISTS idx_status_snapshots_time ON status_snapshots(timestamp DESC)",
];

/// Applies and verifies the store's schema
pub struct SchemaManager {
    pool: Arc<ConnectionPool>,
}

impl SchemaManager {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Create missing tables and indices; safe on every start.
    ///
    /// Fails with `SchemaError` when an existing table has the wrong shape
    /// or the file was written by a newer schema version.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> Result<()> {
        info!("Ensuring database schema");

        // Existing tables are checked before anything is created around them.
        self.verify_table_shapes(false).await?;

        let mut tx = self.pool.writer().begin().await.map_err(schema_err)?;

        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER PRIMARY KEY)")
            .execute(&mut *tx)
            .await
            .map_err(schema_err)?;

        let current: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&mut *tx)
            .await
            .map_err(schema_err)?;

        if current > SCHEMA_VERSION {
            return Err(StorageError::SchemaError(format!(
                "database schema version {} is newer than supported version {}",
                current, SCHEMA_VERSION
            )));
        }

        if current < SCHEMA_VERSION {
            info!("Migrating database from version {} to {}", current, SCHEMA_VERSION);
        } else {
            debug!("Schema version {} is current, re-applying idempotent DDL", current);
        }

        // v1 is re-applied every time so a dropped index is recreated.
        for statement in MIGRATION_V1 {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(schema_err)?;
        }

        sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?1)")
            .bind(SCHEMA_VERSION)
            .execute(&mut *tx)
            .await
            .map_err(schema_err)?;

        tx.commit().await.map_err(schema_err)?;

        self.verify_table_shapes(true).await?;
        self.verify_indices().await?;

        info!("Database schema ready (version {})", SCHEMA_VERSION);
        Ok(())
    }

    /// Recorded schema version, 0 for a fresh file
    pub async fn schema_version(&self) -> Result<i64> {
        let exists: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        )
        .fetch_one(self.pool.reader())
        .await?;

        if exists == 0 {
            return Ok(0);
        }

        let version: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(self.pool.reader())
            .await?;
        Ok(version)
    }

    /// Names of the indices present on `table`
    pub async fn index_names(&self, table: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM pragma_index_list(?1)")
            .bind(table)
            .fetch_all(self.pool.reader())
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StorageError::from))
            .collect()
    }

    /// Key columns of `index` in index order
    pub async fn index_columns(&self, index: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT name FROM pragma_index_info(?1) ORDER BY seqno")
            .bind(index)
            .fetch_all(self.pool.reader())
            .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("name").map_err(StorageError::from))
            .collect()
    }

    async fn verify_table_shapes(&self, require_present: bool) -> Result<()> {
        for (table, expected) in TABLE_SHAPES {
            let rows = sqlx::query("SELECT name, type FROM pragma_table_info(?1)")
                .bind(*table)
                .fetch_all(self.pool.reader())
                .await?;

            if rows.is_empty() {
                if require_present {
                    return Err(StorageError::SchemaError(format!("table {} is missing", table)));
                }
                continue;
            }

            for (column, declared) in expected.iter() {
                let found = rows.iter().find_map(|row| {
                    let name: String = row.try_get("name").ok()?;
                    (name == *column).then(|| row.try_get::<String, _>("type").unwrap_or_default())
                });

                match found {
                    None => {
                        return Err(StorageError::SchemaError(format!(
                            "table {} has no column {}",
                            table, column
                        )))
                    }
                    Some(actual) if !actual.eq_ignore_ascii_case(declared) => {
                        return Err(StorageError::SchemaError(format!(
                            "column {}.{} is {}, expected {}",
                            table, column, actual, declared
                        )))
                    }
                    Some(_) => {}
                }
            }
        }

        Ok(())
    }

    async fn verify_indices(&self) -> Result<()> {
        for (table, index, columns) in REQUIRED_INDICES {
            let names = self.index_names(table).await?;
            if !names.iter().any(|name| name == index) {
                return Err(StorageError::SchemaError(format!(
                    "index {} missing on {}",
                    index, table
                )));
            }

            // CREATE INDEX IF NOT EXISTS keeps a same-named index as it is.
            let actual = self.index_columns(index).await?;
            if actual != *columns {
                return Err(StorageError::SchemaError(format!(
                    "index {} covers ({}), expected ({})",
                    index,
                    actual.join(", "),
                    columns.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn schema_err(err: sqlx::Error) -> StorageError {
    StorageError::SchemaError(err.to_string())
}
