//! Error types for geotrack.
//!
//! One error type covers storage, configuration, session and network code.
//! Position failures use the closed taxonomy in
//! [`crate::position::PositionError`] instead.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for geotrack operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// A sample was appended to a tracker record that does not exist.
    #[error("tracker record not found: {session_id}")]
    TrackerNotFound {
        /// The session identifier that has no record.
        session_id: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Network Errors ===
    /// HTTP transport failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A remote service answered with a non-success status.
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body or description.
        message: String,
    },

    // === Session Errors ===
    /// Session-scoped storage is not available.
    #[error("session storage unavailable: {0}")]
    SessionStorage(String),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for geotrack operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new API status error.
    #[must_use]
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a new session storage error.
    #[must_use]
    pub fn session_storage(message: impl Into<String>) -> Self {
        Self::SessionStorage(message.into())
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// HTTP status if this is an API error.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error() {
        let err = Error::api(503, "service unavailable");
        assert_eq!(err.to_string(), "API error (503): service unavailable");
        assert_eq!(err.status_code(), Some(503));
        assert_eq!(Error::internal("x").status_code(), None);
    }

    #[test]
    fn test_tracker_not_found_names_session() {
        let err = Error::TrackerNotFound {
            session_id: "lq2k9x0c3f1e".to_string(),
        };
        assert_eq!(err.to_string(), "tracker record not found: lq2k9x0c3f1e");
    }

    #[test]
    fn test_session_storage_error() {
        let err = Error::session_storage("no runtime directory");
        assert_eq!(
            err.to_string(),
            "session storage unavailable: no runtime directory"
        );
    }

    #[test]
    fn test_figment_error_is_boxed() {
        let err: Error = figment::Error::from("bad value".to_string()).into();
        assert!(matches!(err, Error::ConfigLoad(_)));
        assert!(err.to_string().contains("bad value"));
    }

    #[test]
    fn test_migration_error_display() {
        let err = Error::DatabaseMigration {
            message: "schema version 9 is newer".to_string(),
        };
        assert!(err.to_string().starts_with("database migration failed"));
    }

    #[test]
    fn test_database_open_keeps_path() {
        let source = rusqlite::Connection::open_with_flags(
            "/nonexistent/geotrack/trackers.db",
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY,
        )
        .unwrap_err();
        let err = Error::DatabaseOpen {
            path: PathBuf::from("/nonexistent/geotrack/trackers.db"),
            source,
        };
        assert!(err.to_string().contains("/nonexistent/geotrack/trackers.db"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
