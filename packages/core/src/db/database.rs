//! Database Connection Management
//!
//! This module owns the libsql database handle and the relational schema that
//! the content tree is flattened into.
//!
//! # Architecture
//!
//! - **Flat rows**: every node is one row keyed by (path, workspace_name)
//! - **Blob properties**: the property set lives in the `props` markup column
//! - **Side tables**: binary chunks and strong/weak reference edges
//! - **WAL mode**: Write-Ahead Logging for better concurrency
//! - **Idempotent DDL**: `CREATE ... IF NOT EXISTS`, safe on every startup
//!
//! # Database Connection Patterns
//!
//! Use `connect_with_timeout()` in async code. The 5-second busy timeout lets
//! concurrent writers wait and retry instead of failing with `SQLITE_BUSY`.
//!
//! ```no_run
//! # use arbor_core::db::DatabaseService;
//! # use std::path::PathBuf;
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db_service = DatabaseService::new(PathBuf::from("./data/arbor.db")).await?;
//! let conn = db_service.connect_with_timeout().await?;
//! # Ok(())
//! # }
//! ```

use crate::codec;
use crate::db::error::StoreError;
use crate::models::{path, Property};
use crate::services::NT_UNSTRUCTURED;
use libsql::{Builder, Connection, Database};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Workspace created with every new database
pub const DEFAULT_WORKSPACE: &str = "default";

const SCHEMA: [(&str, &str); 9] = [
    (
        "workspaces",
        "CREATE TABLE IF NOT EXISTS workspaces (
            name TEXT PRIMARY KEY
        )",
    ),
    (
        "namespaces",
        "CREATE TABLE IF NOT EXISTS namespaces (
            prefix TEXT PRIMARY KEY,
            uri TEXT NOT NULL UNIQUE
        )",
    ),
    (
        "nodes",
        "CREATE TABLE IF NOT EXISTS nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            path TEXT NOT NULL,
            parent TEXT NOT NULL,
            local_name TEXT NOT NULL,
            namespace TEXT NOT NULL,
            workspace_name TEXT NOT NULL,
            identifier TEXT NOT NULL,
            type TEXT NOT NULL,
            props TEXT NOT NULL,
            depth INTEGER NOT NULL,
            sort_order INTEGER NOT NULL DEFAULT 0,
            UNIQUE (path, workspace_name),
            UNIQUE (identifier, workspace_name)
        )",
    ),
    (
        "binary_data",
        "CREATE TABLE IF NOT EXISTS binary_data (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            node_id INTEGER NOT NULL,
            property_name TEXT NOT NULL,
            workspace_name TEXT NOT NULL,
            idx INTEGER NOT NULL,
            data BLOB NOT NULL,
            UNIQUE (node_id, property_name, workspace_name, idx),
            -- Node deletion drops its chunks
            FOREIGN KEY (node_id) REFERENCES nodes(id) ON DELETE CASCADE
        )",
    ),
    // Edge tables carry no foreign keys: edges to deleted targets must stay
    // visible until the end-of-batch integrity check.
    (
        "nodes_references",
        "CREATE TABLE IF NOT EXISTS nodes_references (
            source_id INTEGER NOT NULL,
            source_property_name TEXT NOT NULL,
            target_id INTEGER NOT NULL,
            PRIMARY KEY (source_id, source_property_name, target_id)
        )",
    ),
    (
        "nodes_weakreferences",
        "CREATE TABLE IF NOT EXISTS nodes_weakreferences (
            source_id INTEGER NOT NULL,
            source_property_name TEXT NOT NULL,
            target_id INTEGER NOT NULL,
            PRIMARY KEY (source_id, source_property_name, target_id)
        )",
    ),
    (
        "type_nodes",
        "CREATE TABLE IF NOT EXISTS type_nodes (
            node_type_id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            supertypes TEXT NOT NULL DEFAULT '',
            is_abstract INTEGER NOT NULL DEFAULT 0,
            is_mixin INTEGER NOT NULL DEFAULT 0,
            queryable INTEGER NOT NULL DEFAULT 1,
            orderable_child_nodes INTEGER NOT NULL DEFAULT 0,
            primary_item TEXT
        )",
    ),
    (
        "type_props",
        "CREATE TABLE IF NOT EXISTS type_props (
            node_type_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            protected INTEGER NOT NULL DEFAULT 0,
            auto_created INTEGER NOT NULL DEFAULT 0,
            mandatory INTEGER NOT NULL DEFAULT 0,
            on_parent_version TEXT NOT NULL DEFAULT 'COPY',
            multiple INTEGER NOT NULL DEFAULT 0,
            fulltext_searchable INTEGER NOT NULL DEFAULT 1,
            query_orderable INTEGER NOT NULL DEFAULT 1,
            required_type TEXT NOT NULL,
            default_value TEXT,
            FOREIGN KEY (node_type_id) REFERENCES type_nodes(node_type_id) ON DELETE CASCADE
        )",
    ),
    (
        "type_childs",
        "CREATE TABLE IF NOT EXISTS type_childs (
            node_type_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            protected INTEGER NOT NULL DEFAULT 0,
            auto_created INTEGER NOT NULL DEFAULT 0,
            mandatory INTEGER NOT NULL DEFAULT 0,
            on_parent_version TEXT NOT NULL DEFAULT 'COPY',
            primary_types TEXT NOT NULL DEFAULT '',
            default_type TEXT,
            FOREIGN KEY (node_type_id) REFERENCES type_nodes(node_type_id) ON DELETE CASCADE
        )",
    ),
];

const INDEXES: [(&str, &str); 6] = [
    (
        "idx_nodes_parent",
        "CREATE INDEX IF NOT EXISTS idx_nodes_parent ON nodes(parent, workspace_name)",
    ),
    (
        "idx_nodes_type",
        "CREATE INDEX IF NOT EXISTS idx_nodes_type ON nodes(type)",
    ),
    (
        "idx_nodes_name",
        "CREATE INDEX IF NOT EXISTS idx_nodes_name ON nodes(local_name, namespace)",
    ),
    (
        "idx_references_target",
        "CREATE INDEX IF NOT EXISTS idx_references_target ON nodes_references(target_id)",
    ),
    (
        "idx_weakreferences_target",
        "CREATE INDEX IF NOT EXISTS idx_weakreferences_target ON nodes_weakreferences(target_id)",
    ),
    (
        "idx_binary_node",
        "CREATE INDEX IF NOT EXISTS idx_binary_node ON binary_data(node_id, property_name)",
    ),
];

/// Database service for managing the libsql handle and schema
///
/// # Examples
///
/// ```no_run
/// use arbor_core::db::DatabaseService;
/// use std::path::PathBuf;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let db_service = DatabaseService::new(PathBuf::from("/path/to/arbor.db")).await?;
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct DatabaseService {
    /// libsql database handle (wrapped in Arc for sharing)
    pub db: Arc<Database>,

    /// Path to the database file
    pub db_path: PathBuf,
}

impl DatabaseService {
    /// Create a new DatabaseService with the specified database path
    ///
    /// This will:
    /// 1. Ensure the parent directory exists (create if needed)
    /// 2. Open/create the database file
    /// 3. Initialize the schema (CREATE TABLE IF NOT EXISTS)
    /// 4. Seed the default workspace and its root node
    ///
    /// # Errors
    ///
    /// Returns `StoreError` if:
    /// - Parent directory cannot be created
    /// - Database connection fails
    /// - Schema initialization fails
    pub async fn new(db_path: PathBuf) -> Result<Self, StoreError> {
        let is_new_database = !db_path.exists();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Builder::new_local(&db_path)
            .build()
            .await
            .map_err(|e| StoreError::connection_failed(db_path.clone(), e))?;

        let service = Self {
            db: Arc::new(db),
            db_path,
        };

        service.initialize_schema(is_new_database).await?;

        tracing::info!(path = %service.db_path.display(), "Database ready");
        Ok(service)
    }

    /// Execute a PRAGMA statement
    ///
    /// PRAGMA statements return rows, so we must use query() instead of execute().
    async fn execute_pragma(&self, conn: &Connection, pragma: &str) -> Result<(), StoreError> {
        let mut stmt = conn
            .prepare(pragma)
            .await
            .map_err(|e| StoreError::sql(format!("Failed to prepare '{}'", pragma), e))?;
        let _ = stmt
            .query(())
            .await
            .map_err(|e| StoreError::sql(format!("Failed to execute '{}'", pragma), e))?;
        Ok(())
    }

    /// Initialize database schema and configuration
    ///
    /// Creates tables and indexes using CREATE TABLE IF NOT EXISTS,
    /// ensuring idempotent initialization (safe to call multiple times).
    async fn initialize_schema(&self, is_new_database: bool) -> Result<(), StoreError> {
        let conn = self.connect_with_timeout().await?;

        self.execute_pragma(&conn, "PRAGMA journal_mode = WAL").await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;

        for (table, ddl) in SCHEMA {
            conn.execute(ddl, ())
                .await
                .map_err(|e| StoreError::sql(format!("Failed to create table '{}'", table), e))?;
        }

        for (index, ddl) in INDEXES {
            conn.execute(ddl, ())
                .await
                .map_err(|e| StoreError::sql(format!("Failed to create index '{}'", index), e))?;
        }

        Self::create_workspace(&conn, DEFAULT_WORKSPACE).await?;

        // Flush schema to disk for fresh files so a second handle sees it
        if is_new_database {
            self.execute_pragma(&conn, "PRAGMA wal_checkpoint(TRUNCATE)").await?;
        }

        Ok(())
    }

    /// Insert a workspace row and its root node if missing
    ///
    /// Returns `true` when the workspace was created by this call.
    pub async fn create_workspace(conn: &Connection, name: &str) -> Result<bool, StoreError> {
        let inserted = conn
            .execute("INSERT OR IGNORE INTO workspaces (name) VALUES (?)", [name])
            .await
            .map_err(|e| StoreError::sql(format!("Failed to create workspace '{}'", name), e))?;

        let root_properties = vec![Property::primary_type(NT_UNSTRUCTURED)];
        let encoded = codec::encode(&root_properties)
            .map_err(|e| StoreError::encode("root properties", e))?;

        conn.execute(
            "INSERT OR IGNORE INTO nodes
                (path, parent, local_name, namespace, workspace_name, identifier, type, props, depth, sort_order)
             VALUES (?, '', '', '', ?, ?, ?, ?, 0, 0)",
            (
                path::ROOT_PATH,
                name,
                Uuid::new_v4().to_string(),
                NT_UNSTRUCTURED,
                encoded.blob,
            ),
        )
        .await
        .map_err(|e| StoreError::sql(format!("Failed to create root of workspace '{}'", name), e))?;

        Ok(inserted > 0)
    }

    /// Get a connection handle
    pub fn connect(&self) -> Result<Connection, StoreError> {
        self.db
            .connect()
            .map_err(|e| StoreError::connection_failed(self.db_path.clone(), e))
    }

    /// Get a connection with busy timeout, foreign keys and case-sensitive LIKE configured
    pub async fn connect_with_timeout(&self) -> Result<Connection, StoreError> {
        let conn = self.connect()?;
        self.execute_pragma(&conn, "PRAGMA busy_timeout = 5000").await?;
        self.execute_pragma(&conn, "PRAGMA foreign_keys = ON").await?;
        // Paths and property values compare case-sensitively
        self.execute_pragma(&conn, "PRAGMA case_sensitive_like = ON").await?;
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_schema_is_idempotent_and_seeds_root() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("nested").join("arbor.db");

        let first = DatabaseService::new(db_path.clone()).await?;
        drop(first);
        let service = DatabaseService::new(db_path).await?;

        let conn = service.connect_with_timeout().await?;
        let mut rows = conn
            .query(
                "SELECT depth, parent, local_name FROM nodes WHERE path = '/' AND workspace_name = ?",
                [DEFAULT_WORKSPACE],
            )
            .await?;
        let row = rows.next().await?.expect("root row");
        assert_eq!(row.get::<i64>(0)?, 0);
        assert_eq!(row.get::<String>(1)?, "");
        assert_eq!(row.get::<String>(2)?, "");
        assert!(rows.next().await?.is_none());

        let created = DatabaseService::create_workspace(&conn, DEFAULT_WORKSPACE).await?;
        assert!(!created);
        Ok(())
    }
}
