//! Error types for the herald-db crate.

use thiserror::Error;

/// Database operation errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// The database could not be reached or the connection broke mid-flight.
    ///
    /// Pool exhaustion, I/O and TLS failures land here. Retrying later may
    /// succeed.
    #[error("Database connection failed: {0}")]
    ConnectionFailed(#[source] sqlx::Error),

    /// A database migration failed to apply.
    #[error("Migration failed: {0}")]
    MigrationFailed(#[source] sqlx::migrate::MigrateError),

    /// An insert collided with a unique index.
    #[error("Unique constraint violated: {constraint}")]
    UniqueViolation { constraint: String },

    /// Any other query failure.
    #[error("Query failed: {0}")]
    QueryFailed(#[source] sqlx::Error),
}

impl DbError {
    /// Sort a raw `sqlx` error into the variants above.
    #[must_use]
    pub fn from_sqlx(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => DbError::UniqueViolation {
                constraint: db.constraint().unwrap_or("unknown").to_string(),
            },
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_) => DbError::ConnectionFailed(err),
            other => DbError::QueryFailed(other),
        }
    }

    /// Check if this error indicates a connection problem.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(self, DbError::ConnectionFailed(_))
    }

    /// Check if this error is a unique-index collision.
    #[must_use]
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, DbError::UniqueViolation { .. })
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        DbError::from_sqlx(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_timeout_is_connection_error() {
        let err = DbError::from_sqlx(sqlx::Error::PoolTimedOut);
        assert!(err.is_connection_error());
        assert!(!err.is_unique_violation());
    }

    #[test]
    fn test_io_error_is_connection_error() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        let err: DbError = sqlx::Error::Io(io).into();
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_row_not_found_is_query_error() {
        let err = DbError::from_sqlx(sqlx::Error::RowNotFound);
        assert!(matches!(err, DbError::QueryFailed(_)));
    }

    #[test]
    fn test_unique_violation_display() {
        let err = DbError::UniqueViolation {
            constraint: "processed_events_message_id_key".to_string(),
        };
        assert!(err.is_unique_violation());
        assert_eq!(
            err.to_string(),
            "Unique constraint violated: processed_events_message_id_key"
        );
    }
}
