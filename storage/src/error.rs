use thiserror::Error;

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Malformed caller input (never retried)
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Write referenced a device the registry does not know
    #[error("Referential error: {0}")]
    ReferentialError(String),

    /// Existing database is incompatible with this binary
    #[error("Schema error: {0}")]
    SchemaError(String),

    /// Query matched no data
    #[error("Data not found: {0}")]
    NotFound(String),

    /// Caller-supplied deadline expired before the operation finished
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Underlying storage engine failure (I/O, corruption, disk full)
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Ingest buffer at capacity
    #[error("Ingest buffer full ({0} points)")]
    BufferFull(usize),
}

impl StorageError {
    /// Whether a caller may retry the operation with backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Timeout(_) | StorageError::DatabaseError(_))
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err)
                if db_err.kind() == sqlx::error::ErrorKind::ForeignKeyViolation =>
            {
                StorageError::ReferentialError(db_err.message().to_string())
            }
            _ => StorageError::DatabaseError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for StorageError {
    fn from(err: serde_yaml::Error) -> Self {
        StorageError::ConfigError(err.to_string())
    }
}

/// Result type for storage operations
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(StorageError::Timeout("write_point".into()).is_retryable());
        assert!(StorageError::DatabaseError("disk full".into()).is_retryable());
        assert!(!StorageError::ValidationError("bad".into()).is_retryable());
        assert!(!StorageError::ReferentialError("device 9".into()).is_retryable());
        assert!(!StorageError::NotFound("snapshot".into()).is_retryable());
    }

    #[test]
    fn test_sqlx_error_maps_to_database_error() {
        let err: StorageError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, StorageError::DatabaseError(_)));
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{oops").unwrap_err();
        let err: StorageError = json_err.into();
        assert!(matches!(err, StorageError::SerializationError(_)));
    }
}
