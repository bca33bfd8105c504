//! Error types for the data access layer.

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for data layer operations.
pub type Result<T> = std::result::Result<T, DataError>;

/// Errors raised while opening a job database.
#[derive(Debug, Error)]
pub enum DataError {
    /// The connection string could not be parsed.
    #[error("invalid database url")]
    InvalidUrl {
        /// Offending connection string.
        url: String,
        /// Underlying parse failure.
        #[source]
        source: sqlx::Error,
    },
    /// The database could not be opened.
    #[error("database connection failed")]
    ConnectFailed {
        /// Connection string used.
        url: String,
        /// Underlying SQL error.
        #[source]
        source: sqlx::Error,
    },
    /// The database directory could not be created.
    #[error("database directory could not be created")]
    Io {
        /// Directory path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// Migration execution failed.
    #[error("migration failed")]
    MigrationFailed {
        /// Underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn messages_are_constant_and_sources_kept() {
        let migration = DataError::MigrationFailed {
            source: sqlx::migrate::MigrateError::VersionMissing(1),
        };
        assert_eq!(migration.to_string(), "migration failed");
        assert!(migration.source().is_some());

        let connect = DataError::ConnectFailed {
            url: "sqlite://nowhere".into(),
            source: sqlx::Error::PoolTimedOut,
        };
        assert_eq!(connect.to_string(), "database connection failed");
        assert!(connect.source().is_some());
    }
}
