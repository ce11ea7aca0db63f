//! Database Error Types
//!
//! Two layers of failure live here. [`DatabaseError`] covers opening and
//! initializing the store; [`StorageError`] classifies failures of individual
//! statements so callers can react to constraint violations, lost connections
//! and missing columns without string matching.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while opening or initializing the database
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to establish database connection
    #[error("Failed to connect to database at {path}: {source}")]
    ConnectionFailed {
        path: PathBuf,
        source: libsql::Error,
    },

    /// Failed to initialize database schema
    #[error("Failed to initialize database schema: {0}")]
    InitializationFailed(String),

    /// Permission denied when accessing database
    #[error("Permission denied for database path: {path}")]
    PermissionDenied { path: PathBuf },

    /// Failed to create parent directory
    #[error("Failed to create parent directory for database: {0}")]
    DirectoryCreationFailed(#[from] std::io::Error),

    /// libsql operation error
    #[error("Database operation failed: {0}")]
    LibsqlError(#[from] libsql::Error),
}

impl DatabaseError {
    /// Create a connection failed error
    pub fn connection_failed(path: PathBuf, source: libsql::Error) -> Self {
        Self::ConnectionFailed { path, source }
    }

    /// Create an initialization failed error
    pub fn initialization_failed(msg: impl Into<String>) -> Self {
        Self::InitializationFailed(msg.into())
    }

    /// Create a permission denied error
    pub fn permission_denied(path: PathBuf) -> Self {
        Self::PermissionDenied { path }
    }
}

/// Classification of a failed statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageErrorKind {
    /// A UNIQUE / PRIMARY KEY constraint rejected the write.
    /// `columns` lists the columns named by the engine, without table prefix.
    ConstraintViolation { columns: Vec<String> },

    /// The connection dropped or could not be re-established
    ConnectionLost,

    /// A referenced column does not exist
    UnknownColumn { column: String },

    /// A referenced table does not exist
    MissingTable { table: String },

    /// Anything else
    Other,
}

/// A failed statement with its SQL and classified cause
#[derive(Error, Debug, Clone)]
#[error("Storage error ({kind:?}) executing `{sql}`: {message}")]
pub struct StorageError {
    pub kind: StorageErrorKind,
    pub sql: String,
    pub message: String,
}

impl StorageError {
    pub fn new(kind: StorageErrorKind, sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            sql: sql.into(),
            message: message.into(),
        }
    }

    /// Classify a libsql error raised by `sql`
    pub fn from_libsql(sql: &str, err: &libsql::Error) -> Self {
        let message = err.to_string();
        let kind = match err {
            libsql::Error::ConnectionFailed(_) => StorageErrorKind::ConnectionLost,
            _ => classify_message(&message),
        };
        Self::new(kind, sql, message)
    }

    /// Whether the violated constraint involves the `name` column
    pub fn is_name_collision(&self) -> bool {
        matches!(&self.kind, StorageErrorKind::ConstraintViolation { columns } if columns.iter().any(|c| c == "name"))
    }

    pub fn is_connection_lost(&self) -> bool {
        self.kind == StorageErrorKind::ConnectionLost
    }

    /// Whether a schema repair might fix this failure
    pub fn is_schema_error(&self) -> bool {
        matches!(
            self.kind,
            StorageErrorKind::UnknownColumn { .. } | StorageErrorKind::MissingTable { .. }
        )
    }
}

/// Map SQLite's message text onto a [`StorageErrorKind`]
pub(crate) fn classify_message(message: &str) -> StorageErrorKind {
    if let Some(rest) = message.split("UNIQUE constraint failed:").nth(1) {
        let columns = rest
            .split(',')
            .map(|col| {
                let col = col.trim();
                let col = col.rsplit('.').next().unwrap_or(col);
                col.trim_matches(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .to_string()
            })
            .filter(|c| !c.is_empty())
            .collect();
        return StorageErrorKind::ConstraintViolation { columns };
    }
    if let Some(rest) = message.split("no such column:").nth(1) {
        let column = rest.split_whitespace().next().unwrap_or_default();
        let column = column.rsplit('.').next().unwrap_or(column);
        return StorageErrorKind::UnknownColumn {
            column: column.to_string(),
        };
    }
    if let Some(rest) = message.split("no such table:").nth(1) {
        let table = rest.split_whitespace().next().unwrap_or_default();
        return StorageErrorKind::MissingTable {
            table: table.to_string(),
        };
    }
    let lowered = message.to_lowercase();
    if lowered.contains("connection")
        && (lowered.contains("closed") || lowered.contains("lost") || lowered.contains("reset"))
    {
        return StorageErrorKind::ConnectionLost;
    }
    StorageErrorKind::Other
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unique_violation_columns() {
        let kind = classify_message("UNIQUE constraint failed: pages.name, pages.parent_id");
        assert_eq!(
            kind,
            StorageErrorKind::ConstraintViolation {
                columns: vec!["name".to_string(), "parent_id".to_string()]
            }
        );
    }

    #[test]
    fn test_name_collision_detection() {
        let err = StorageError::new(
            classify_message("SQLite failure: `UNIQUE constraint failed: pages.name, pages.parent_id`"),
            "INSERT INTO pages",
            "dup",
        );
        assert!(err.is_name_collision());

        let other = StorageError::new(
            classify_message("UNIQUE constraint failed: field_title.pages_id, field_title.sort"),
            "INSERT INTO field_title",
            "dup",
        );
        assert!(!other.is_name_collision());
    }

    #[test]
    fn test_unknown_column_and_table() {
        assert_eq!(
            classify_message("no such column: _body.data"),
            StorageErrorKind::UnknownColumn {
                column: "data".to_string()
            }
        );
        assert_eq!(
            classify_message("no such table: field_body"),
            StorageErrorKind::MissingTable {
                table: "field_body".to_string()
            }
        );
    }

    #[test]
    fn test_unclassified_message() {
        assert_eq!(classify_message("syntax error near FROM"), StorageErrorKind::Other);
    }
}
