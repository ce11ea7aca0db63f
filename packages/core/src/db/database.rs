//! Database Connection Management
//!
//! This module owns the libsql database handle, the core page tables and the
//! statement executor used by every service.
//!
//! # Architecture
//!
//! - **One shared connection**: every statement and every transaction runs on
//!   the same connection handle, so `BEGIN`/`COMMIT` bracket the writes that
//!   follow them. The handle is replaced after a lost connection.
//! - **WAL mode**: Write-Ahead Logging for better concurrency
//! - **Core tables**: `pages`, `pages_parents`, `pages_access`, `pages_sortfields`.
//!   Per-field tables (`field_<name>`) are created by their fieldtypes.
//!
//! # Retry semantics
//!
//! A statement that fails with a lost connection is retried after reconnecting,
//! up to `connection_retries` times. Retries are not attempted inside an open
//! transaction since the transaction died with the connection.

use crate::db::error::{DatabaseError, StorageError, StorageErrorKind};
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Value};
use parking_lot::RwLock;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// A fully materialized result row
///
/// Rows are copied out of libsql eagerly so they can cross `.await` points
/// and be handed to fieldtypes without borrowing the statement.
#[derive(Debug, Clone, PartialEq)]
pub struct SqlRow(pub Vec<Value>);

impl SqlRow {
    pub fn value(&self, idx: usize) -> &Value {
        self.0.get(idx).unwrap_or(&Value::Null)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Integer column; NULL and unparseable text read as 0
    pub fn get_i64(&self, idx: usize) -> i64 {
        self.get_opt_i64(idx).unwrap_or(0)
    }

    pub fn get_opt_i64(&self, idx: usize) -> Option<i64> {
        value_as_i64(self.value(idx))
    }

    pub fn get_string(&self, idx: usize) -> String {
        self.get_opt_string(idx).unwrap_or_default()
    }

    pub fn get_opt_string(&self, idx: usize) -> Option<String> {
        value_as_string(self.value(idx))
    }
}

pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(i) => Some(*i),
        Value::Real(f) => Some(*f as i64),
        Value::Text(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s.clone()),
        Value::Blob(b) => Some(String::from_utf8_lossy(b).into_owned()),
    }
}

/// Database service for managing the libsql connection and core schema
///
/// # Examples
///
/// ```no_run
/// use pagestore_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_service = DatabaseService::new(PathBuf::from("./data/pages.db")).await?;
///     let rows = db_service.query("SELECT id FROM pages", vec![]).await?;
///     println!("{} pages", rows.len());
///     Ok(())
/// }
/// ```
pub struct DatabaseService {
    /// libsql database handle
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,

    conn: RwLock<Connection>,
    connection_retries: usize,
    transaction_depth: AtomicUsize,
}

impl std::fmt::Debug for DatabaseService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseService")
            .field("db_path", &self.db_path)
            .field("connection_retries", &self.connection_retries)
            .field("transaction_depth", &self.transaction_depth)
            .finish()
    }
}

impl DatabaseService {
    /// Open (or create) the database at `db_path` and initialize the core schema
    ///
    /// Creates the parent directory when missing. Schema creation is idempotent.
    pub async fn new(db_path: PathBuf) -> Result<Self, DatabaseError> {
        Self::with_retries(db_path, 3).await
    }

    /// Like [`DatabaseService::new`] with an explicit reconnect budget
    pub async fn with_retries(
        db_path: PathBuf,
        connection_retries: usize,
    ) -> Result<Self, DatabaseError> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        DatabaseError::permission_denied(db_path.clone())
                    } else {
                        DatabaseError::DirectoryCreationFailed(e)
                    }
                })?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
            conn: RwLock::new(conn),
            connection_retries,
            transaction_depth: AtomicUsize::new(0),
        };

        service.initialize_schema(is_new_database).await?;

        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements may return rows, so they go through `query()`.
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), DatabaseError> {
        conn.query(pragma, ()).await.map_err(|e| {
            DatabaseError::initialization_failed(format!("Failed to execute '{}': {}", pragma, e))
        })?;
        Ok(())
    }

    /// Create core tables and indexes (CREATE ... IF NOT EXISTS)
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), DatabaseError> {
        let conn = self.connection();

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;

        let statements = [
            "CREATE TABLE IF NOT EXISTS pages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                parent_id INTEGER NOT NULL DEFAULT 0,
                templates_id INTEGER NOT NULL DEFAULT 0,
                name TEXT NOT NULL,
                status INTEGER NOT NULL DEFAULT 1,
                sort INTEGER NOT NULL DEFAULT 0,
                num_children INTEGER NOT NULL DEFAULT 0,
                created INTEGER NOT NULL DEFAULT 0,
                modified INTEGER NOT NULL DEFAULT 0,
                published INTEGER,
                created_users_id INTEGER NOT NULL DEFAULT 0,
                modified_users_id INTEGER NOT NULL DEFAULT 0,
                UNIQUE (name, parent_id)
            )",
            "CREATE TABLE IF NOT EXISTS pages_parents (
                pages_id INTEGER NOT NULL,
                parents_id INTEGER NOT NULL,
                PRIMARY KEY (pages_id, parents_id)
            )",
            "CREATE TABLE IF NOT EXISTS pages_access (
                pages_id INTEGER PRIMARY KEY,
                templates_id INTEGER NOT NULL,
                ts INTEGER NOT NULL DEFAULT 0
            )",
            "CREATE TABLE IF NOT EXISTS pages_sortfields (
                pages_id INTEGER PRIMARY KEY,
                sortfield TEXT NOT NULL
            )",
            "CREATE INDEX IF NOT EXISTS idx_pages_parent ON pages(parent_id)",
            "CREATE INDEX IF NOT EXISTS idx_pages_template ON pages(templates_id)",
            "CREATE INDEX IF NOT EXISTS idx_pages_status ON pages(status)",
            "CREATE INDEX IF NOT EXISTS idx_pages_sort ON pages(parent_id, sort)",
            "CREATE INDEX IF NOT EXISTS idx_pages_modified ON pages(modified)",
            "CREATE INDEX IF NOT EXISTS idx_pages_created ON pages(created)",
            "CREATE INDEX IF NOT EXISTS idx_pages_parents_parent ON pages_parents(parents_id)",
            "CREATE INDEX IF NOT EXISTS idx_pages_access_template ON pages_access(templates_id)",
        ];

        for sql in statements {
            conn.execute(sql, ()).await.map_err(|e| {
                DatabaseError::initialization_failed(format!("Failed to execute '{}': {}", sql, e))
            })?;
        }

        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)")
                .await?;
        }

        Ok(())
    }

    /// Current connection handle
    pub fn connection(&self) -> Connection {
        self.conn.read().clone()
    }

    /// Replace the shared connection with a fresh one
    async fn reconnect(&self) -> Result<(), StorageError> {
        let conn = self.db.connect().map_err(|e| {
            StorageError::new(StorageErrorKind::ConnectionLost, "", e.to_string())
        })?;
        conn.query("PRAGMA busy_timeout = 5000", ())
            .await
            .map_err(|e| StorageError::new(StorageErrorKind::ConnectionLost, "", e.to_string()))?;
        *self.conn.write() = conn;
        Ok(())
    }

    fn should_retry(&self, err: &StorageError, attempt: usize) -> bool {
        err.is_connection_lost()
            && attempt < self.connection_retries
            && self.transaction_depth.load(Ordering::SeqCst) == 0
    }

    /// Execute a statement, returning the number of affected rows
    pub async fn execute(&self, sql: &str, params: Vec<Value>) -> Result<u64, StorageError> {
        let mut attempt = 0;
        loop {
            let conn = self.connection();
            match conn.execute(sql, Params::Positional(params.clone())).await {
                Ok(affected) => return Ok(affected),
                Err(e) => {
                    let err = StorageError::from_libsql(sql, &e);
                    if self.should_retry(&err, attempt) {
                        attempt += 1;
                        warn!(attempt, sql, "Connection lost, reconnecting");
                        self.reconnect().await?;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Run a query and materialize every row
    pub async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<SqlRow>, StorageError> {
        let mut attempt = 0;
        loop {
            let conn = self.connection();
            let mut rows = match conn.query(sql, Params::Positional(params.clone())).await {
                Ok(rows) => rows,
                Err(e) => {
                    let err = StorageError::from_libsql(sql, &e);
                    if self.should_retry(&err, attempt) {
                        attempt += 1;
                        warn!(attempt, sql, "Connection lost, reconnecting");
                        self.reconnect().await?;
                        continue;
                    }
                    return Err(err);
                }
            };

            let mut out = Vec::new();
            while let Some(row) = rows
                .next()
                .await
                .map_err(|e| StorageError::from_libsql(sql, &e))?
            {
                let count = row.column_count();
                let mut values = Vec::with_capacity(count.max(0) as usize);
                for idx in 0..count {
                    values.push(
                        row.get_value(idx)
                            .map_err(|e| StorageError::from_libsql(sql, &e))?,
                    );
                }
                out.push(SqlRow(values));
            }
            return Ok(out);
        }
    }

    /// First row of a query, if any
    pub async fn query_one(
        &self,
        sql: &str,
        params: Vec<Value>,
    ) -> Result<Option<SqlRow>, StorageError> {
        Ok(self.query(sql, params).await?.into_iter().next())
    }

    /// First column of the first row as an integer (0 when absent)
    pub async fn query_i64(&self, sql: &str, params: Vec<Value>) -> Result<i64, StorageError> {
        Ok(self
            .query_one(sql, params)
            .await?
            .map(|row| row.get_i64(0))
            .unwrap_or(0))
    }

    /// Rowid of the most recent INSERT on the shared connection
    pub fn last_insert_rowid(&self) -> i64 {
        self.connection().last_insert_rowid()
    }

    /// Open a transaction; nested calls only bump the depth counter
    pub async fn begin(&self) -> Result<(), StorageError> {
        if self.transaction_depth.fetch_add(1, Ordering::SeqCst) == 0 {
            if let Err(e) = self.execute("BEGIN TRANSACTION", vec![]).await {
                self.transaction_depth.store(0, Ordering::SeqCst);
                return Err(e);
            }
            debug!("Transaction started");
        }
        Ok(())
    }

    /// Commit when the outermost transaction closes
    pub async fn commit(&self) -> Result<(), StorageError> {
        let depth = self.transaction_depth.load(Ordering::SeqCst);
        if depth == 0 {
            return Ok(());
        }
        if depth == 1 {
            self.transaction_depth.store(0, Ordering::SeqCst);
            if let Err(e) = self.execute("COMMIT", vec![]).await {
                let _rollback = self.execute("ROLLBACK", vec![]).await;
                return Err(e);
            }
            debug!("Transaction committed");
        } else {
            self.transaction_depth.store(depth - 1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Abort the whole transaction regardless of nesting depth
    pub async fn rollback(&self) -> Result<(), StorageError> {
        if self.transaction_depth.swap(0, Ordering::SeqCst) > 0 {
            self.execute("ROLLBACK", vec![]).await?;
            debug!("Transaction rolled back");
        }
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_depth.load(Ordering::SeqCst) > 0
    }

    pub async fn table_exists(&self, table: &str) -> Result<bool, StorageError> {
        let count = self
            .query_i64(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
                vec![Value::Text(table.to_string())],
            )
            .await?;
        Ok(count > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn table_names(db: &DatabaseService) -> Vec<String> {
        db.query(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
            vec![],
        )
        .await
        .unwrap()
        .iter()
        .map(|row| row.get_string(0))
        .collect()
    }

    #[tokio::test]
    async fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let db_service = DatabaseService::new(db_path.clone()).await.unwrap();

        assert_eq!(db_service.db_path, db_path);
        assert!(db_path.exists());
    }

    #[tokio::test]
    async fn test_schema_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_service = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let tables = table_names(&db_service).await;
        for expected in ["pages", "pages_access", "pages_parents", "pages_sortfields"] {
            assert!(tables.contains(&expected.to_string()), "missing {}", expected);
        }
    }

    #[tokio::test]
    async fn test_parent_directory_creation() {
        let temp_dir = TempDir::new().unwrap();
        let nested_path = temp_dir.path().join("nested").join("dirs").join("test.db");

        let _db_service = DatabaseService::new(nested_path.clone()).await.unwrap();

        assert!(nested_path.exists());
    }

    #[tokio::test]
    async fn test_idempotent_initialization() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let first = DatabaseService::new(db_path.clone()).await.unwrap();
        let before = table_names(&first).await;
        drop(first);
        let second = DatabaseService::new(db_path).await.unwrap();

        assert_eq!(before, table_names(&second).await);
    }

    #[tokio::test]
    async fn test_unique_name_violation_is_classified() {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let insert = "INSERT INTO pages (parent_id, templates_id, name) VALUES (?, ?, ?)";
        let params = vec![
            Value::Integer(1),
            Value::Integer(1),
            Value::Text("about".into()),
        ];
        db.execute(insert, params.clone()).await.unwrap();
        let err = db.execute(insert, params).await.unwrap_err();

        assert!(err.is_name_collision(), "unexpected error: {:?}", err);
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        db.begin().await.unwrap();
        db.begin().await.unwrap();
        db.execute(
            "INSERT INTO pages (parent_id, templates_id, name) VALUES (1, 1, 'x')",
            vec![],
        )
        .await
        .unwrap();
        db.commit().await.unwrap();
        assert!(db.in_transaction());
        db.rollback().await.unwrap();

        let count = db.query_i64("SELECT COUNT(*) FROM pages", vec![]).await.unwrap();
        assert_eq!(count, 0);
        assert!(!db.in_transaction());
    }

    #[tokio::test]
    async fn test_unknown_column_is_schema_error() {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();

        let err = db
            .query("SELECT nope FROM pages", vec![])
            .await
            .unwrap_err();
        assert!(err.is_schema_error());
    }

    #[tokio::test]
    async fn test_lost_connection_is_retried_outside_transactions() {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::with_retries(temp_dir.path().join("test.db"), 2)
            .await
            .unwrap();

        let lost = StorageError::from_libsql(
            "SELECT 1",
            &libsql::Error::ConnectionFailed("connection reset by peer".into()),
        );
        assert!(lost.is_connection_lost());
        assert!(db.should_retry(&lost, 0));
        assert!(db.should_retry(&lost, 1));
        assert!(!db.should_retry(&lost, 2));

        let other = StorageError::new(StorageErrorKind::Other, "SELECT 1", "syntax error");
        assert!(!db.should_retry(&other, 0));

        // a fresh connection would not see the open transaction
        db.begin().await.unwrap();
        assert!(!db.should_retry(&lost, 0));
        db.rollback().await.unwrap();
        assert!(db.should_retry(&lost, 0));
    }

    #[tokio::test]
    async fn test_reconnect_keeps_database_usable() {
        let temp_dir = TempDir::new().unwrap();
        let db = DatabaseService::new(temp_dir.path().join("test.db"))
            .await
            .unwrap();
        db.execute(
            "INSERT INTO pages (parent_id, templates_id, name) VALUES (1, 1, 'kept')",
            vec![],
        )
        .await
        .unwrap();

        db.reconnect().await.unwrap();
        let count = db.query_i64("SELECT COUNT(*) FROM pages", vec![]).await.unwrap();
        assert_eq!(count, 1);
    }
}

