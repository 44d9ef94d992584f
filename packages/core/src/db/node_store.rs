//! NodeStore Trait - Persistence Abstraction Layer
//!
//! This module defines the `NodeStore` trait that the tree layer talks to. The
//! trait is implemented by [`RelationalStore`](crate::db::RelationalStore),
//! which flattens the tree into libsql tables, and by
//! [`CachedStore`](crate::db::CachedStore), which decorates any other store
//! with read caching.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: every method is async so the backend can be swapped
//!    without changing callers
//! 2. **Batched Saves**: writes are grouped between `prepare_save` and
//!    `finish_save`; reference integrity is checked once, at finish
//! 3. **Typed Errors**: every method returns [`StoreError`], whose `kind()` is
//!    stable across backends
//! 4. **Session State**: `login` binds credentials and a workspace; every
//!    other call before it fails with `InvalidState`
//!
//! # Examples
//!
//! ```rust,no_run
//! use arbor_core::db::{NodeStore, RelationalStore};
//! use arbor_core::models::{Credentials, Property, StoreOperation};
//! use std::path::PathBuf;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = RelationalStore::open(PathBuf::from("./data/arbor.db")).await?;
//!     store.login(Credentials::new("alice"), "default").await?;
//!
//!     store.prepare_save().await?;
//!     store
//!         .store_nodes(vec![StoreOperation::add(
//!             "/notes",
//!             vec![Property::string("title", "Notes")],
//!         )])
//!         .await?;
//!     store.finish_save().await?;
//!
//!     let node = store.get_node("/notes").await?;
//!     println!("{} has {} children", node.path, node.children.len());
//!     Ok(())
//! }
//! ```

use crate::db::error::StoreError;
use crate::models::{Credentials, MoveOperation, NodeData, NodeTypeDefinition, StoreOperation};
use crate::query::{QueryObjectModel, QueryRow};
use async_trait::async_trait;
use std::collections::HashMap;

/// Abstraction layer for content tree persistence
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync`. A store serves one logical session;
/// calls are expected to be awaited one at a time.
///
/// # Method Categories
///
/// - **Session**: login, logout
/// - **Workspaces**: list, check, create, delete
/// - **Reads**: by path, by identifier, binaries, references
/// - **Writes**: store, delete, move, copy, reorder
/// - **Metadata**: node types and namespaces
/// - **Query**: compiled QOM execution
/// - **Transactions**: explicit transactions and save boundaries
#[async_trait]
pub trait NodeStore: Send + Sync {
    //
    // SESSION
    //

    /// Bind credentials and a workspace to this store
    ///
    /// Loads the session's namespace table.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the workspace does not exist
    async fn login(&self, credentials: Credentials, workspace: &str) -> Result<(), StoreError>;

    /// Drop the session, its caches and any pending save state
    async fn logout(&self) -> Result<(), StoreError>;

    //
    // WORKSPACES
    //

    async fn get_accessible_workspace_names(&self) -> Result<Vec<String>, StoreError>;

    async fn workspace_exists(&self, name: &str) -> Result<bool, StoreError>;

    /// Create an empty workspace with its root node
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if the name is taken
    /// - `Unsupported` if `src_workspace` is given; workspaces are not cloned
    async fn create_workspace(
        &self,
        name: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Remove a workspace and every row it holds
    async fn delete_workspace(&self, name: &str) -> Result<(), StoreError>;

    //
    // READS
    //

    /// Get the node at `path`, with child names in sort order
    ///
    /// # Errors
    ///
    /// - `NotFound` if no node lives at the path
    async fn get_node(&self, path: &str) -> Result<NodeData, StoreError>;

    /// Get the nodes found at `paths`, in request order; missing paths are skipped
    async fn get_nodes(&self, paths: &[String]) -> Result<Vec<NodeData>, StoreError>;

    async fn get_node_by_identifier(&self, identifier: &str) -> Result<NodeData, StoreError>;

    async fn get_nodes_by_identifier(
        &self,
        identifiers: &[String],
    ) -> Result<Vec<NodeData>, StoreError>;

    async fn get_node_path_for_identifier(&self, identifier: &str) -> Result<String, StoreError>;

    /// Payloads of a binary property, in value-index order
    ///
    /// `property_path` is the node path followed by the property name.
    async fn get_binary_stream(&self, property_path: &str) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Paths of the reference properties pointing at the node at `path`
    ///
    /// Filtered to properties called `name` when given.
    async fn get_references(
        &self,
        path: &str,
        name: Option<&str>,
    ) -> Result<Vec<String>, StoreError>;

    /// Same as [`get_references`](Self::get_references) for weak references
    async fn get_weak_references(
        &self,
        path: &str,
        name: Option<&str>,
    ) -> Result<Vec<String>, StoreError>;

    //
    // WRITES
    //

    /// Apply a batch of adds, updates and tombstone syncs
    ///
    /// Adds are validated against node type definitions; auto-created child
    /// nodes are appended to the batch.
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if an added path or identifier is taken
    /// - `NotFound` if an added node's parent is missing
    /// - `ConstraintViolation` if node type validation fails
    /// - `ValueFormat` / `Namespace` if a value or name is malformed
    async fn store_nodes(&self, operations: Vec<StoreOperation>) -> Result<(), StoreError>;

    /// Delete nodes and their subtrees
    ///
    /// Strong references into the deleted set are checked at `finish_save`.
    async fn delete_nodes(&self, paths: &[String]) -> Result<(), StoreError>;

    /// Delete one subtree inside its own save
    async fn delete_node_immediately(&self, path: &str) -> Result<(), StoreError>;

    /// Remove properties given as `node_path/property_name`
    ///
    /// # Errors
    ///
    /// - `NotFound` if the node or the property is missing
    async fn delete_properties(&self, property_paths: &[String]) -> Result<(), StoreError>;

    async fn delete_property_immediately(&self, property_path: &str) -> Result<(), StoreError>;

    /// Move subtrees by path prefix rewrite
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` if a destination is taken
    /// - `NotFound` if a source or a destination parent is missing
    /// - `ConstraintViolation` when moving the root or into the own subtree
    async fn move_nodes(&self, operations: &[MoveOperation]) -> Result<(), StoreError>;

    async fn move_node_immediately(&self, src: &str, dst: &str) -> Result<(), StoreError>;

    /// Deep-copy the subtree at `src` to `dst`, inside its own save
    ///
    /// Copied nodes get fresh identifiers. Reference values are copied as-is
    /// and keep pointing at the original targets.
    async fn copy_node(
        &self,
        src: &str,
        dst: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Put the named children of `parent` first, in the given order
    ///
    /// # Errors
    ///
    /// - `NotFound` if a name is not a child of `parent`
    async fn reorder_children(&self, parent: &str, names: &[String]) -> Result<(), StoreError>;

    //
    // NODE TYPES AND NAMESPACES
    //

    /// Persist node type definitions
    ///
    /// # Errors
    ///
    /// - `AlreadyExists` for built-in names, or stored names without `allow_update`
    /// - `ConstraintViolation` for unknown supertypes
    async fn register_node_types(
        &self,
        definitions: Vec<NodeTypeDefinition>,
        allow_update: bool,
    ) -> Result<(), StoreError>;

    /// Compact definition syntax is not parsed; always `Unsupported`
    async fn register_node_types_cnd(&self, cnd: &str, allow_update: bool)
        -> Result<(), StoreError>;

    /// Built-in plus stored definitions; an empty slice returns all
    async fn get_node_types(&self, names: &[String]) -> Result<Vec<NodeTypeDefinition>, StoreError>;

    async fn register_namespace(&self, prefix: &str, uri: &str) -> Result<(), StoreError>;

    async fn unregister_namespace(&self, prefix: &str) -> Result<(), StoreError>;

    async fn get_namespaces(&self) -> Result<HashMap<String, String>, StoreError>;

    //
    // QUERY
    //

    /// Execute a query against the current workspace
    ///
    /// Each row carries `jcr:path` and `jcr:score`, plus `jcr:primaryType` or
    /// the requested columns.
    async fn query(&self, qom: &QueryObjectModel) -> Result<Vec<QueryRow>, StoreError>;

    //
    // TRANSACTIONS
    //

    /// Start an explicit transaction spanning several saves
    ///
    /// # Errors
    ///
    /// - `InvalidState` if a transaction is already open
    async fn begin_transaction(&self) -> Result<(), StoreError>;

    async fn commit_transaction(&self) -> Result<(), StoreError>;

    /// Roll back the open transaction and clear the session caches
    async fn rollback_transaction(&self) -> Result<(), StoreError>;

    /// Always `Unsupported`; timeouts are left to the driver
    async fn set_transaction_timeout(&self, seconds: u64) -> Result<(), StoreError>;

    /// Open a save: a backend transaction, or a savepoint inside an explicit one
    async fn prepare_save(&self) -> Result<(), StoreError>;

    /// Synchronize buffered references, check integrity and commit the save
    ///
    /// The save is rolled back when any check fails.
    async fn finish_save(&self) -> Result<(), StoreError>;

    /// Discard the open save; no-op when none is open
    async fn rollback_save(&self) -> Result<(), StoreError>;
}
