//! Cache Overlay
//!
//! `CachedStore` decorates any [`NodeStore`] with three in-process cache
//! regions:
//!
//! - **metadata**: namespace table, node type definitions and workspace list,
//!   keyed by logical name and invalidated by exact key
//! - **node**: nodes by workspace+path and workspace+identifier, including
//!   negative entries for paths and identifiers that were not found
//! - **query**: result sets keyed by workspace and the serialized query
//!
//! The overlay only sees its own writes. Every write flushes the node and
//! query regions; transaction boundaries, `finish_save`, `rollback_save` and
//! `logout` flush them too. `logout` also drops the metadata region. Errors from the inner store are passed through unchanged and
//! never cached, except `NotFound` on node reads which is replayed from the
//! negative entry.

use crate::config::CacheConfig;
use crate::db::error::{ErrorKind, StoreError};
use crate::db::node_store::NodeStore;
use crate::models::path::split_property_path;
use crate::models::{Credentials, MoveOperation, NodeData, NodeTypeDefinition, StoreOperation};
use crate::query::{QueryObjectModel, QueryRow};
use async_trait::async_trait;
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

const NAMESPACES_KEY: &str = "namespaces";
const NODE_TYPES_KEY: &str = "node_types";
const WORKSPACES_KEY: &str = "workspaces";
const QUERY_LANGUAGE: &str = "qom";

#[derive(Debug, Clone)]
enum Metadata {
    Namespaces(Arc<HashMap<String, String>>),
    NodeTypes(Arc<Vec<NodeTypeDefinition>>),
    Workspaces(Arc<Vec<String>>),
}

/// `None` marks a negative entry
type NodeEntry = Option<Arc<NodeData>>;

pub struct CachedStore<S: NodeStore> {
    inner: S,
    workspace: RwLock<Option<String>>,
    metadata: Cache<&'static str, Metadata>,
    nodes: Cache<String, NodeEntry>,
    queries: Cache<String, Arc<Vec<QueryRow>>>,
}

fn path_key(workspace: &str, path: &str) -> String {
    format!("{}|path|{}", workspace, path)
}

fn identifier_key(workspace: &str, identifier: &str) -> String {
    format!("{}|id|{}", workspace, identifier)
}

impl<S: NodeStore> CachedStore<S> {
    pub fn new(inner: S, config: &CacheConfig) -> Self {
        Self {
            inner,
            workspace: RwLock::new(None),
            metadata: Cache::builder()
                .max_capacity(config.metadata_capacity)
                .build(),
            nodes: Cache::builder().max_capacity(config.node_capacity).build(),
            queries: Cache::builder().max_capacity(config.query_capacity).build(),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Bind the overlay to a store that already has an open session
    ///
    /// Needed when the inner store logged in before it was wrapped, as
    /// `RelationalStore::from_config` does.
    pub async fn with_workspace(self, workspace: impl Into<String>) -> Self {
        *self.workspace.write().await = Some(workspace.into());
        self
    }

    /// Drop the node and query regions
    pub fn flush(&self) {
        self.nodes.invalidate_all();
        self.queries.invalidate_all();
        tracing::debug!("Node and query caches flushed");
    }

    async fn current_workspace(&self) -> Option<String> {
        self.workspace.read().await.clone()
    }

    async fn cached_node(
        &self,
        key: Option<String>,
        missing: impl FnOnce() -> StoreError,
        load: impl std::future::Future<Output = Result<NodeData, StoreError>>,
    ) -> Result<NodeData, StoreError> {
        let Some(key) = key else {
            return load.await;
        };
        if let Some(entry) = self.nodes.get(&key) {
            tracing::trace!(key = %key, "Node cache hit");
            return match entry {
                Some(node) => Ok((*node).clone()),
                None => Err(missing()),
            };
        }

        match load.await {
            Ok(node) => {
                self.nodes.insert(key, Some(Arc::new(node.clone())));
                Ok(node)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.nodes.insert(key, None);
                Err(err)
            }
            Err(err) => Err(err),
        }
    }

    async fn node_at(&self, path: &str) -> Result<NodeData, StoreError> {
        let key = self.current_workspace().await.map(|ws| path_key(&ws, path));
        self.cached_node(
            key,
            || StoreError::not_found(format!("node at '{}'", path)),
            self.inner.get_node(path),
        )
        .await
    }

    async fn node_with_identifier(&self, identifier: &str) -> Result<NodeData, StoreError> {
        let key = self
            .current_workspace()
            .await
            .map(|ws| identifier_key(&ws, identifier));
        self.cached_node(
            key,
            || StoreError::not_found(format!("node with identifier {}", identifier)),
            self.inner.get_node_by_identifier(identifier),
        )
        .await
    }

    async fn metadata_entry<F, Fut>(&self, key: &'static str, load: F) -> Result<Metadata, StoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<Metadata, StoreError>>,
    {
        if let Some(entry) = self.metadata.get(&key) {
            tracing::trace!(key, "Metadata cache hit");
            return Ok(entry);
        }
        let entry = load().await?;
        self.metadata.insert(key, entry.clone());
        Ok(entry)
    }

    async fn all_node_types(&self) -> Result<Arc<Vec<NodeTypeDefinition>>, StoreError> {
        let entry = self
            .metadata_entry(NODE_TYPES_KEY, || async {
                Ok::<_, StoreError>(Metadata::NodeTypes(Arc::new(
                    self.inner.get_node_types(&[]).await?,
                )))
            })
            .await?;
        match entry {
            Metadata::NodeTypes(types) => Ok(types),
            _ => Err(StoreError::backend("node type cache entry has the wrong shape")),
        }
    }

    /// Evict every entry of the node at `node_path`, by path and by identifier
    fn evict_node(&self, workspace: &str, node_path: &str) {
        let identifier_prefix = identifier_key(workspace, "");
        let stale: Vec<Arc<String>> = self
            .nodes
            .iter()
            .filter(|(key, entry)| {
                key.starts_with(&identifier_prefix)
                    && matches!(entry, Some(node) if node.path == node_path)
            })
            .map(|(key, _)| key)
            .collect();
        for key in stale {
            self.nodes.invalidate(key.as_str());
        }
        self.nodes.invalidate(&path_key(workspace, node_path));
    }

    fn after_write<T>(&self, result: Result<T, StoreError>) -> Result<T, StoreError> {
        self.flush();
        result
    }
}

#[async_trait]
impl<S: NodeStore> NodeStore for CachedStore<S> {
    async fn login(&self, credentials: Credentials, workspace: &str) -> Result<(), StoreError> {
        self.inner.login(credentials, workspace).await?;
        *self.workspace.write().await = Some(workspace.to_string());
        Ok(())
    }

    async fn logout(&self) -> Result<(), StoreError> {
        let result = self.inner.logout().await;
        *self.workspace.write().await = None;
        self.metadata.invalidate_all();
        self.after_write(result)
    }

    async fn get_accessible_workspace_names(&self) -> Result<Vec<String>, StoreError> {
        let entry = self
            .metadata_entry(WORKSPACES_KEY, || async {
                Ok::<_, StoreError>(Metadata::Workspaces(Arc::new(
                    self.inner.get_accessible_workspace_names().await?,
                )))
            })
            .await?;
        match entry {
            Metadata::Workspaces(names) => Ok((*names).clone()),
            _ => Err(StoreError::backend("workspace cache entry has the wrong shape")),
        }
    }

    async fn workspace_exists(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .get_accessible_workspace_names()
            .await?
            .iter()
            .any(|ws| ws == name))
    }

    async fn create_workspace(
        &self,
        name: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = self.inner.create_workspace(name, src_workspace).await;
        self.metadata.invalidate(&WORKSPACES_KEY);
        self.after_write(result)
    }

    async fn delete_workspace(&self, name: &str) -> Result<(), StoreError> {
        let result = self.inner.delete_workspace(name).await;
        self.metadata.invalidate(&WORKSPACES_KEY);
        self.after_write(result)
    }

    async fn get_node(&self, path: &str) -> Result<NodeData, StoreError> {
        self.node_at(path).await
    }

    async fn get_nodes(&self, paths: &[String]) -> Result<Vec<NodeData>, StoreError> {
        let mut nodes = Vec::with_capacity(paths.len());
        for path in paths {
            match self.node_at(path).await {
                Ok(node) => nodes.push(node),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(nodes)
    }

    async fn get_node_by_identifier(&self, identifier: &str) -> Result<NodeData, StoreError> {
        self.node_with_identifier(identifier).await
    }

    async fn get_nodes_by_identifier(
        &self,
        identifiers: &[String],
    ) -> Result<Vec<NodeData>, StoreError> {
        let mut nodes = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            match self.node_with_identifier(identifier).await {
                Ok(node) => nodes.push(node),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
        Ok(nodes)
    }

    async fn get_node_path_for_identifier(&self, identifier: &str) -> Result<String, StoreError> {
        Ok(self.node_with_identifier(identifier).await?.path)
    }

    async fn get_binary_stream(&self, property_path: &str) -> Result<Vec<Vec<u8>>, StoreError> {
        self.inner.get_binary_stream(property_path).await
    }

    async fn get_references(
        &self,
        path: &str,
        name: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.get_references(path, name).await
    }

    async fn get_weak_references(
        &self,
        path: &str,
        name: Option<&str>,
    ) -> Result<Vec<String>, StoreError> {
        self.inner.get_weak_references(path, name).await
    }

    async fn store_nodes(&self, operations: Vec<StoreOperation>) -> Result<(), StoreError> {
        let result = self.inner.store_nodes(operations).await;
        self.after_write(result)
    }

    async fn delete_nodes(&self, paths: &[String]) -> Result<(), StoreError> {
        let result = self.inner.delete_nodes(paths).await;
        self.after_write(result)
    }

    async fn delete_node_immediately(&self, path: &str) -> Result<(), StoreError> {
        let result = self.inner.delete_node_immediately(path).await;
        self.after_write(result)
    }

    async fn delete_properties(&self, property_paths: &[String]) -> Result<(), StoreError> {
        let result = self.inner.delete_properties(property_paths).await;

        if let Some(workspace) = self.current_workspace().await {
            for property_path in property_paths {
                if let Some((node_path, _)) = split_property_path(property_path) {
                    self.evict_node(&workspace, node_path);
                }
            }
        }
        self.queries.invalidate_all();
        result
    }

    async fn delete_property_immediately(&self, property_path: &str) -> Result<(), StoreError> {
        self.delete_properties(&[property_path.to_string()]).await?;
        Ok(())
    }

    async fn move_nodes(&self, operations: &[MoveOperation]) -> Result<(), StoreError> {
        let result = self.inner.move_nodes(operations).await;
        self.after_write(result)
    }

    async fn move_node_immediately(&self, src: &str, dst: &str) -> Result<(), StoreError> {
        let result = self.inner.move_node_immediately(src, dst).await;
        self.after_write(result)
    }

    async fn copy_node(
        &self,
        src: &str,
        dst: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError> {
        let result = self.inner.copy_node(src, dst, src_workspace).await;
        self.after_write(result)
    }

    async fn reorder_children(&self, parent: &str, names: &[String]) -> Result<(), StoreError> {
        let result = self.inner.reorder_children(parent, names).await;
        self.after_write(result)
    }

    async fn register_node_types(
        &self,
        definitions: Vec<NodeTypeDefinition>,
        allow_update: bool,
    ) -> Result<(), StoreError> {
        let result = self.inner.register_node_types(definitions, allow_update).await;
        self.metadata.invalidate(&NODE_TYPES_KEY);
        self.after_write(result)
    }

    async fn register_node_types_cnd(
        &self,
        cnd: &str,
        allow_update: bool,
    ) -> Result<(), StoreError> {
        let result = self.inner.register_node_types_cnd(cnd, allow_update).await;
        self.metadata.invalidate(&NODE_TYPES_KEY);
        self.after_write(result)
    }

    async fn get_node_types(&self, names: &[String]) -> Result<Vec<NodeTypeDefinition>, StoreError> {
        let all = self.all_node_types().await?;
        if names.is_empty() {
            return Ok((*all).clone());
        }
        names
            .iter()
            .map(|name| {
                all.iter()
                    .find(|d| &d.name == name)
                    .cloned()
                    .ok_or_else(|| StoreError::not_found(format!("node type '{}'", name)))
            })
            .collect()
    }

    async fn register_namespace(&self, prefix: &str, uri: &str) -> Result<(), StoreError> {
        let result = self.inner.register_namespace(prefix, uri).await;
        self.metadata.invalidate(&NAMESPACES_KEY);
        self.after_write(result)
    }

    async fn unregister_namespace(&self, prefix: &str) -> Result<(), StoreError> {
        let result = self.inner.unregister_namespace(prefix).await;
        self.metadata.invalidate(&NAMESPACES_KEY);
        self.after_write(result)
    }

    async fn get_namespaces(&self) -> Result<HashMap<String, String>, StoreError> {
        let entry = self
            .metadata_entry(NAMESPACES_KEY, || async {
                Ok::<_, StoreError>(Metadata::Namespaces(Arc::new(
                    self.inner.get_namespaces().await?,
                )))
            })
            .await?;
        match entry {
            Metadata::Namespaces(map) => Ok((*map).clone()),
            _ => Err(StoreError::backend("namespace cache entry has the wrong shape")),
        }
    }

    async fn query(&self, qom: &QueryObjectModel) -> Result<Vec<QueryRow>, StoreError> {
        let key = match (self.current_workspace().await, serde_json::to_string(qom)) {
            (Some(workspace), Ok(statement)) => Some(format!(
                "{}|{}|{:?}|{:?}|{}",
                workspace, QUERY_LANGUAGE, qom.limit, qom.offset, statement
            )),
            _ => None,
        };

        if let Some(rows) = key.as_ref().and_then(|k| self.queries.get(k)) {
            tracing::trace!("Query cache hit");
            return Ok((*rows).clone());
        }
        let rows = self.inner.query(qom).await?;
        if let Some(key) = key {
            self.queries.insert(key, Arc::new(rows.clone()));
        }
        Ok(rows)
    }

    async fn begin_transaction(&self) -> Result<(), StoreError> {
        self.inner.begin_transaction().await
    }

    async fn commit_transaction(&self) -> Result<(), StoreError> {
        let result = self.inner.commit_transaction().await;
        self.after_write(result)
    }

    async fn rollback_transaction(&self) -> Result<(), StoreError> {
        let result = self.inner.rollback_transaction().await;
        self.after_write(result)
    }

    async fn set_transaction_timeout(&self, seconds: u64) -> Result<(), StoreError> {
        self.inner.set_transaction_timeout(seconds).await
    }

    async fn prepare_save(&self) -> Result<(), StoreError> {
        self.inner.prepare_save().await
    }

    async fn finish_save(&self) -> Result<(), StoreError> {
        let result = self.inner.finish_save().await;
        self.after_write(result)
    }

    async fn rollback_save(&self) -> Result<(), StoreError> {
        let result = self.inner.rollback_save().await;
        self.after_write(result)
    }
}
