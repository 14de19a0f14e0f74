use crate::config::DatabaseConfig;
use crate::error::{Result, StorageError};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::{debug, info};

/// Reader and writer pools over one SQLite file.
///
/// The writer pool holds exactly one connection, so physical commits are
/// serialized while each caller owns it only for a single transaction.
/// Readers run on their own `query_only` connections and, under WAL,
/// never wait on the writer.
pub struct ConnectionPool {
    writer: SqlitePool,
    reader: SqlitePool,
    foreign_keys: bool,
}

impl ConnectionPool {
    /// Open (and create if configured) the database file
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        info!(
            "Opening SQLite database at {} (readers: {}, foreign_keys: {})",
            config.path.display(),
            config.max_connections,
            config.enforce_foreign_keys
        );

        if config.create_if_missing {
            if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    StorageError::ConfigError(format!(
                        "Failed to create directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let base = SqliteConnectOptions::new()
            .filename(&config.path)
            .busy_timeout(config.busy_timeout())
            .foreign_keys(config.enforce_foreign_keys);

        // The writer opens first so the file exists and is in WAL mode
        // before any reader connects.
        let writer_options = base
            .clone()
            .create_if_missing(config.create_if_missing)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .acquire_timeout(config.busy_timeout())
            .connect_with(writer_options)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("writer connection: {}", e)))?;

        let reader_options = base.pragma("query_only", "true");

        let reader = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.busy_timeout())
            .connect_with(reader_options)
            .await
            .map_err(|e| StorageError::DatabaseError(format!("reader connection: {}", e)))?;

        let version: String = sqlx::query_scalar("SELECT sqlite_version()")
            .fetch_one(&reader)
            .await?;
        info!("Connected to SQLite {}", version);

        debug!("Connection pools created successfully");

        Ok(Self {
            writer,
            reader,
            foreign_keys: config.enforce_foreign_keys,
        })
    }

    /// Single-connection pool for transactions that modify data
    pub fn writer(&self) -> &SqlitePool {
        &self.writer
    }

    /// Pool for read-only queries
    pub fn reader(&self) -> &SqlitePool {
        &self.reader
    }

    /// Whether writes are checked against the device registry
    pub fn enforces_foreign_keys(&self) -> bool {
        self.foreign_keys
    }

    /// Get pool status
    pub fn status(&self) -> PoolStatus {
        PoolStatus {
            writer_size: self.writer.size(),
            writer_idle: self.writer.num_idle(),
            reader_size: self.reader.size(),
            reader_idle: self.reader.num_idle(),
            reader_max: self.reader.options().get_max_connections(),
        }
    }

    /// Test database connectivity on both pools
    pub async fn test_connection(&self) -> Result<bool> {
        let from_writer: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.writer).await?;
        let from_reader: i64 = sqlx::query_scalar("SELECT 1").fetch_one(&self.reader).await?;
        Ok(from_writer == 1 && from_reader == 1)
    }

    /// Close both pools, waiting for checked-out connections to return
    pub async fn close(&self) {
        self.reader.close().await;
        self.writer.close().await;
        info!("Connection pools closed");
    }
}

/// Pool status information
#[derive(Debug, Clone)]
pub struct PoolStatus {
    /// Open writer connections (0 or 1)
    pub writer_size: u32,
    /// Idle writer connections
    pub writer_idle: usize,
    /// Open reader connections
    pub reader_size: u32,
    /// Idle reader connections
    pub reader_idle: usize,
    /// Maximum reader connections
    pub reader_max: u32,
}

impl std::fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Pool[writer={}/{} idle, readers={} (idle {}), max_readers={}]",
            self.writer_size, self.writer_idle, self.reader_size, self.reader_idle, self.reader_max
        )
    }
}
