//! Relational Node Store
//!
//! `RelationalStore` implements [`NodeStore`] on top of the flat libsql schema
//! created by [`DatabaseService`]. Each store owns one dedicated connection and
//! one session.
//!
//! # Save protocol
//!
//! Writes run between `prepare_save` and `finish_save`. A save is a backend
//! transaction, or a savepoint when an explicit transaction is open. While a
//! save runs, reference values are only buffered; `finish_save` resolves them
//! against the identifier index and checks strong references into deleted
//! nodes before anything commits.
//!
//! Batch writes called outside an open save wrap themselves in one.
//!
//! # Session state
//!
//! Credentials, workspace, transaction flags, buffered edges, pending
//! deletions and the namespace/node type caches all live in one
//! [`SessionState`] behind a `tokio::sync::Mutex`. Internal helpers take the
//! locked state by reference so that immediate variants can compose them
//! without re-locking.

mod metadata;
mod reads;
mod references;
mod writes;

use crate::codec::ReferenceEdge;
use crate::config::StoreConfig;
use crate::db::database::DatabaseService;
use crate::db::error::StoreError;
use crate::db::node_store::NodeStore;
use crate::models::{Credentials, MoveOperation, NodeData, NodeTypeDefinition, StoreOperation};
use crate::query::{QueryObjectModel, QueryRow};
use crate::services::{NamespaceRegistry, NodeTypeRegistry};
use async_trait::async_trait;
use libsql::params::IntoParams;
use libsql::{Connection, Row, Rows, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

const SAVEPOINT: &str = "arbor_save";

/// Credentials and workspace bound by `login`
#[derive(Debug, Clone)]
struct Login {
    credentials: Credentials,
    workspace: String,
}

/// Work buffered by the open save, applied at `finish_save`
#[derive(Debug, Default)]
struct PendingSave {
    /// Sources whose stored edges are replaced by the buffered ones
    touched: BTreeSet<i64>,
    edges: Vec<(i64, ReferenceEdge)>,
    /// Node ids removed in this save
    deleted: BTreeSet<i64>,
}

#[derive(Debug, Default)]
struct SessionState {
    login: Option<Login>,
    in_transaction: bool,
    save_open: bool,
    pending: PendingSave,
    namespaces: Option<Arc<NamespaceRegistry>>,
    node_types: Option<Arc<NodeTypeRegistry>>,
}

impl SessionState {
    fn login(&self) -> Result<&Login, StoreError> {
        self.login
            .as_ref()
            .ok_or_else(|| StoreError::invalid_state("not logged in"))
    }

    fn workspace(&self) -> Result<String, StoreError> {
        Ok(self.login()?.workspace.clone())
    }

    fn clear_caches(&mut self) {
        self.namespaces = None;
        self.node_types = None;
    }
}

/// Node store backed by libsql tables
pub struct RelationalStore {
    db: Arc<DatabaseService>,
    conn: Connection,
    state: Mutex<SessionState>,
}

impl RelationalStore {
    /// Create a store on its own connection to `db`
    pub async fn new(db: Arc<DatabaseService>) -> Result<Self, StoreError> {
        let conn = db.connect_with_timeout().await?;
        Ok(Self {
            db,
            conn,
            state: Mutex::new(SessionState::default()),
        })
    }

    /// Open (or create) the database at `db_path` and return a store on it
    pub async fn open(db_path: PathBuf) -> Result<Self, StoreError> {
        let db = DatabaseService::new(db_path).await?;
        Self::new(Arc::new(db)).await
    }

    /// Open the configured database and log in to the configured workspace
    ///
    /// The workspace is created when missing.
    pub async fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::invalid_state)?;

        let store = Self::open(config.database_path.clone()).await?;
        DatabaseService::create_workspace(&store.conn, &config.default_workspace).await?;
        store
            .login(Credentials::new(config.user_id.clone()), &config.default_workspace)
            .await?;
        Ok(store)
    }

    pub fn database(&self) -> &Arc<DatabaseService> {
        &self.db
    }

    //
    // SQL HELPERS
    //

    async fn execute(
        &self,
        context: impl Into<String>,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<u64, StoreError> {
        self.conn
            .execute(sql, params)
            .await
            .map_err(|e| StoreError::sql(context, e))
    }

    async fn query_rows(
        &self,
        context: impl Into<String>,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<Rows, StoreError> {
        self.conn
            .query(sql, params)
            .await
            .map_err(|e| StoreError::sql(context, e))
    }

    /// Run `sql` and collect the first column of every row as i64
    async fn query_ids(
        &self,
        context: &str,
        sql: &str,
        params: impl IntoParams,
    ) -> Result<Vec<i64>, StoreError> {
        let mut rows = self.query_rows(context, sql, params).await?;
        let mut ids = Vec::new();
        while let Some(row) = next_row(&mut rows, context).await? {
            ids.push(integer(&row, 0, context)?);
        }
        Ok(ids)
    }

    //
    // SESSION CACHES
    //

    /// Session namespace and node type registries, loaded on first use
    async fn registries(
        &self,
        state: &mut SessionState,
    ) -> Result<(Arc<NamespaceRegistry>, Arc<NodeTypeRegistry>), StoreError> {
        let namespaces = match state.namespaces.clone() {
            Some(registry) => registry,
            None => {
                let registry = Arc::new(self.load_namespaces().await?);
                state.namespaces = Some(registry.clone());
                registry
            }
        };
        let node_types = match state.node_types.clone() {
            Some(registry) => registry,
            None => {
                let registry = Arc::new(self.load_node_types().await?);
                state.node_types = Some(registry.clone());
                registry
            }
        };
        Ok((namespaces, node_types))
    }

    //
    // SAVE BOUNDARIES
    //

    async fn begin_save(&self, state: &mut SessionState) -> Result<(), StoreError> {
        state.login()?;
        if state.save_open {
            return Err(StoreError::invalid_state("a save is already open"));
        }

        if state.in_transaction {
            self.execute("open savepoint", &format!("SAVEPOINT {}", SAVEPOINT), ())
                .await?;
        } else {
            self.execute("begin save", "BEGIN", ()).await?;
        }

        state.save_open = true;
        state.pending = PendingSave::default();
        Ok(())
    }

    async fn commit_save(&self, state: &mut SessionState) -> Result<(), StoreError> {
        if !state.save_open {
            return Err(StoreError::invalid_state("no save is open"));
        }

        let result = match self.synchronize_references(state).await {
            Ok(()) if state.in_transaction => self
                .execute("release savepoint", &format!("RELEASE SAVEPOINT {}", SAVEPOINT), ())
                .await
                .map(|_| ()),
            Ok(()) => self.execute("commit save", "COMMIT", ()).await.map(|_| ()),
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                state.save_open = false;
                state.pending = PendingSave::default();
                tracing::debug!("Save committed");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Save rejected, rolling back");
                self.abort_save_logged(state).await;
                Err(e)
            }
        }
    }

    async fn abort_save(&self, state: &mut SessionState) -> Result<(), StoreError> {
        if !state.save_open {
            return Ok(());
        }
        state.save_open = false;
        state.pending = PendingSave::default();

        if state.in_transaction {
            self.execute(
                "roll back savepoint",
                &format!("ROLLBACK TO SAVEPOINT {}", SAVEPOINT),
                (),
            )
            .await?;
            self.execute("release savepoint", &format!("RELEASE SAVEPOINT {}", SAVEPOINT), ())
                .await?;
        } else {
            self.execute("roll back save", "ROLLBACK", ()).await?;
        }
        Ok(())
    }

    async fn abort_save_logged(&self, state: &mut SessionState) {
        if let Err(e) = self.abort_save(state).await {
            tracing::warn!(error = %e, "Failed to roll back save");
        }
    }

    /// Open a save for a batch write unless the caller already did
    ///
    /// Returns `true` when the save belongs to the write and must be closed
    /// by [`Self::close_write`].
    async fn open_write(&self, state: &mut SessionState) -> Result<bool, StoreError> {
        state.login()?;
        if state.save_open {
            Ok(false)
        } else {
            self.begin_save(state).await?;
            Ok(true)
        }
    }

    async fn close_write(
        &self,
        state: &mut SessionState,
        owns_save: bool,
        result: Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        if !owns_save {
            return result;
        }
        match result {
            Ok(()) => self.commit_save(state).await,
            Err(e) => {
                self.abort_save_logged(state).await;
                Err(e)
            }
        }
    }
}

async fn next_row(rows: &mut Rows, context: &str) -> Result<Option<Row>, StoreError> {
    rows.next()
        .await
        .map_err(|e| StoreError::sql(format!("Row fetch failed: {}", context), e))
}

fn integer(row: &Row, index: i32, context: &str) -> Result<i64, StoreError> {
    row.get::<i64>(index)
        .map_err(|e| StoreError::sql(format!("Column read failed: {}", context), e))
}

fn text(row: &Row, index: i32, context: &str) -> Result<String, StoreError> {
    row.get::<String>(index)
        .map_err(|e| StoreError::sql(format!("Column read failed: {}", context), e))
}

fn optional_text(row: &Row, index: i32, context: &str) -> Result<Option<String>, StoreError> {
    match row.get_value(index) {
        Ok(Value::Null) => Ok(None),
        Ok(Value::Text(value)) => Ok(Some(value)),
        Ok(other) => Err(StoreError::backend(format!(
            "{}: expected text in column {}, got {:?}",
            context, index, other
        ))),
        Err(e) => Err(StoreError::sql(format!("Column read failed: {}", context), e)),
    }
}

fn blob(row: &Row, index: i32, context: &str) -> Result<Vec<u8>, StoreError> {
    row.get::<Vec<u8>>(index)
        .map_err(|e| StoreError::sql(format!("Column read failed: {}", context), e))
}

#[async_trait]
impl NodeStore for RelationalStore {
    async fn login(&self, credentials: Credentials, workspace: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if !self.workspace_exists_unlocked(workspace).await? {
            return Err(StoreError::not_found(format!("workspace '{}'", workspace)));
        }

        let namespaces = self.load_namespaces().await?;
        *state = SessionState {
            login: Some(Login {
                credentials,
                workspace: workspace.to_string(),
            }),
            namespaces: Some(Arc::new(namespaces)),
            ..SessionState::default()
        };
        tracing::info!(workspace, "Session opened");
        Ok(())
    }

    async fn logout(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.save_open || state.in_transaction {
            if let Err(e) = self.execute("roll back on logout", "ROLLBACK", ()).await {
                tracing::warn!(error = %e, "Rollback on logout failed");
            }
        }
        *state = SessionState::default();
        tracing::info!("Session closed");
        Ok(())
    }

    async fn get_accessible_workspace_names(&self) -> Result<Vec<String>, StoreError> {
        self.state.lock().await.login()?;
        self.workspace_names().await
    }

    async fn workspace_exists(&self, name: &str) -> Result<bool, StoreError> {
        self.state.lock().await.login()?;
        self.workspace_exists_unlocked(name).await
    }

    async fn create_workspace(
        &self,
        name: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError> {
        let state = self.state.lock().await;
        state.login()?;
        self.create_workspace_unlocked(name, src_workspace).await
    }

    async fn delete_workspace(&self, name: &str) -> Result<(), StoreError> {
        let state = self.state.lock().await;
        let current = state.workspace()?;
        self.delete_workspace_unlocked(name, &current).await
    }

    async fn get_node(&self, path: &str) -> Result<NodeData, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.read_node(&workspace, path).await
    }

    async fn get_nodes(&self, paths: &[String]) -> Result<Vec<NodeData>, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.read_nodes(&workspace, paths).await
    }

    async fn get_node_by_identifier(&self, identifier: &str) -> Result<NodeData, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.read_node_by_identifier(&workspace, identifier).await
    }

    async fn get_nodes_by_identifier(
        &self,
        identifiers: &[String],
    ) -> Result<Vec<NodeData>, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.read_nodes_by_identifier(&workspace, identifiers).await
    }

    async fn get_node_path_for_identifier(&self, identifier: &str) -> Result<String, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.path_for_identifier(&workspace, identifier).await
    }

    async fn get_binary_stream(&self, property_path: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.read_binary(&workspace, property_path).await
    }

    async fn get_references(
        &self,
        path: &str,
        name: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.referrers(&workspace, path, name, crate::codec::ReferenceKind::Strong)
            .await
    }

    async fn get_weak_references(
        &self,
        path: &str,
        name: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        let workspace = self.state.lock().await.workspace()?;
        self.referrers(&workspace, path, name, crate::codec::ReferenceKind::Weak)
            .await
    }

    async fn store_nodes(&self, operations: Vec<StoreOperation>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let owns_save = self.open_write(&mut state).await?;
        let result = self.store_nodes_locked(&mut state, operations).await;
        self.close_write(&mut state, owns_save, result).await
    }

    async fn delete_nodes(&self, paths: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let owns_save = self.open_write(&mut state).await?;
        let result = self.delete_nodes_locked(&mut state, paths).await;
        self.close_write(&mut state, owns_save, result).await
    }

    async fn delete_node_immediately(&self, path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.begin_save(&mut state).await?;
        let result = self
            .delete_nodes_locked(&mut state, &[path.to_string()])
            .await;
        self.close_write(&mut state, true, result).await
    }

    async fn delete_properties(&self, property_paths: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let owns_save = self.open_write(&mut state).await?;
        let result = self
            .delete_properties_locked(&mut state, property_paths)
            .await;
        self.close_write(&mut state, owns_save, result).await
    }

    async fn delete_property_immediately(&self, property_path: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.begin_save(&mut state).await?;
        let result = self
            .delete_properties_locked(&mut state, &[property_path.to_string()])
            .await;
        self.close_write(&mut state, true, result).await
    }

    async fn move_nodes(&self, operations: &[MoveOperation]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let owns_save = self.open_write(&mut state).await?;
        let result = self.move_nodes_locked(&mut state, operations).await;
        self.close_write(&mut state, owns_save, result).await
    }

    async fn move_node_immediately(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.begin_save(&mut state).await?;
        let result = self
            .move_nodes_locked(&mut state, &[MoveOperation::new(src, dst)])
            .await;
        self.close_write(&mut state, true, result).await
    }

    async fn copy_node(
        &self,
        src: &str,
        dst: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.begin_save(&mut state).await?;
        let result = self.copy_node_locked(&mut state, src, dst, src_workspace).await;
        self.close_write(&mut state, true, result).await
    }

    async fn reorder_children(&self, parent: &str, names: &[String]) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let owns_save = self.open_write(&mut state).await?;
        let result = self.reorder_children_locked(&mut state, parent, names).await;
        self.close_write(&mut state, owns_save, result).await
    }

    async fn register_node_types(
        &self,
        definitions: Vec<NodeTypeDefinition>,
        allow_update: bool,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let owns_save = self.open_write(&mut state).await?;
        let result = self
            .register_node_types_locked(&mut state, definitions, allow_update)
            .await;
        self.close_write(&mut state, owns_save, result).await
    }

    async fn register_node_types_cnd(
        &self,
        _cnd: &str,
        _allow_update: bool,
    ) -> Result<(), StoreError> {
        Err(StoreError::unsupported("compact node type definitions"))
    }

    async fn get_node_types(&self, names: &[String]) -> Result<Vec<NodeTypeDefinition>, StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        let (_, node_types) = self.registries(&mut state).await?;
        node_types.definitions(names)
    }

    async fn register_namespace(&self, prefix: &str, uri: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        self.register_namespace_locked(&mut state, prefix, uri).await
    }

    async fn unregister_namespace(&self, prefix: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        self.unregister_namespace_locked(&mut state, prefix).await
    }

    async fn get_namespaces(&self) -> Result<HashMap<String, String>, StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        let (namespaces, _) = self.registries(&mut state).await?;
        Ok(namespaces.as_map().clone())
    }

    async fn query(&self, qom: &QueryObjectModel) -> Result<Vec<QueryRow>, StoreError> {
        let mut state = self.state.lock().await;
        let workspace = state.workspace()?;
        let (namespaces, node_types) = self.registries(&mut state).await?;
        drop(state);
        self.run_query(&workspace, &namespaces, &node_types, qom).await
    }

    async fn begin_transaction(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        if state.in_transaction {
            return Err(StoreError::invalid_state("a transaction is already open"));
        }
        if state.save_open {
            return Err(StoreError::invalid_state("cannot begin a transaction inside a save"));
        }
        self.execute("begin transaction", "BEGIN", ()).await?;
        state.in_transaction = true;
        tracing::debug!("Transaction started");
        Ok(())
    }

    async fn commit_transaction(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        if !state.in_transaction {
            return Err(StoreError::invalid_state("no transaction is open"));
        }
        if state.save_open {
            return Err(StoreError::invalid_state("a save is still open"));
        }
        self.execute("commit transaction", "COMMIT", ()).await?;
        state.in_transaction = false;
        tracing::debug!("Transaction committed");
        Ok(())
    }

    async fn rollback_transaction(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        if !state.in_transaction {
            return Err(StoreError::invalid_state("no transaction is open"));
        }
        self.execute("roll back transaction", "ROLLBACK", ()).await?;
        state.in_transaction = false;
        state.save_open = false;
        state.pending = PendingSave::default();
        state.clear_caches();
        tracing::debug!("Transaction rolled back");
        Ok(())
    }

    async fn set_transaction_timeout(&self, _seconds: u64) -> Result<(), StoreError> {
        Err(StoreError::unsupported("transaction timeout"))
    }

    async fn prepare_save(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        self.begin_save(&mut state).await
    }

    async fn finish_save(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.login()?;
        self.commit_save(&mut state).await
    }

    async fn rollback_save(&self) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.save_open {
            state.clear_caches();
        }
        self.abort_save(&mut state).await
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::create_test_store;
    use super::*;
    use crate::db::{BackendFailureKind, ErrorKind};
    use crate::models::Property;
    use anyhow::Result;

    #[tokio::test]
    async fn test_calls_before_login_fail() -> Result<()> {
        let temp_dir = tempfile::TempDir::new()?;
        let store = RelationalStore::open(temp_dir.path().join("test.db")).await?;

        let err = store.get_node("/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = store.prepare_save().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let err = store
            .login(Credentials::new("tester"), "missing")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_state_errors() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        let err = store.commit_transaction().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = store.rollback_transaction().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        store.begin_transaction().await?;
        let err = store.begin_transaction().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        store.rollback_transaction().await?;

        let err = store.set_transaction_timeout(30).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        let err = store.register_node_types_cnd("[app:x]", false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        Ok(())
    }

    #[tokio::test]
    async fn test_transaction_spans_saves() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store.begin_transaction().await?;
        store.prepare_save().await?;
        store
            .store_nodes(vec![StoreOperation::add("/a", vec![Property::string("t", "a")])])
            .await?;
        store.finish_save().await?;
        store
            .store_nodes(vec![StoreOperation::add("/b", vec![])])
            .await?;
        assert!(store.get_node("/a").await.is_ok());
        store.rollback_transaction().await?;

        assert_eq!(store.get_node("/a").await.unwrap_err().kind(), ErrorKind::NotFound);
        assert_eq!(store.get_node("/b").await.unwrap_err().kind(), ErrorKind::NotFound);

        store.begin_transaction().await?;
        store
            .store_nodes(vec![StoreOperation::add("/c", vec![])])
            .await?;
        store.commit_transaction().await?;
        assert!(store.get_node("/c").await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_rollback_keeps_transaction_open() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store.begin_transaction().await?;
        store.conn.execute("ROLLBACK", ()).await?;

        let err = store.rollback_transaction().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Backend(BackendFailureKind::Generic));
        assert!(store.state.lock().await.in_transaction);

        store.conn.execute("BEGIN", ()).await?;
        store.rollback_transaction().await?;
        assert!(!store.state.lock().await.in_transaction);
        Ok(())
    }

    #[tokio::test]
    async fn test_rollback_save_discards_batch() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        // no-op without an open save
        store.rollback_save().await?;

        store.prepare_save().await?;
        store
            .store_nodes(vec![StoreOperation::add("/draft", vec![])])
            .await?;
        store.rollback_save().await?;

        assert_eq!(
            store.get_node("/draft").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        Ok(())
    }
}
