//! Node writes: store, delete, move, copy and reorder
//!
//! All functions here run inside an open save and take the locked session
//! state. Reference values are only buffered into `state.pending`; they are
//! resolved by `synchronize_references` at finish.

use super::reads::NodeRow;
use super::{integer, next_row, text, RelationalStore, SessionState};
use crate::codec::{self, BinaryPayload, ReferenceEdge};
use crate::db::error::StoreError;
use crate::models::{
    find_property, path, MoveOperation, NodeData, Property, PropertyType, PropertyValue,
    StoreOperation, PRIMARY_TYPE, UUID,
};
use crate::services::{NamespaceRegistry, NodeProcessor};
use libsql::params;
use std::collections::{BTreeSet, HashSet, VecDeque};
use uuid::Uuid;

/// Predicate selecting a node and its descendants; binds workspace, path, prefix length, prefix
const SUBTREE_PREDICATE: &str = "workspace_name = ? AND (path = ? OR substr(path, 1, ?) = ?)";

/// Descendant prefix of `path` and its length in characters, as bound by `SUBTREE_PREDICATE`
fn subtree_prefix(node_path: &str) -> (String, i64) {
    let prefix = path::descendant_prefix(node_path);
    let length = prefix.chars().count() as i64;
    (prefix, length)
}

fn check_node_path(node_path: &str) -> Result<(), StoreError> {
    if path::is_valid_absolute_path(node_path) {
        Ok(())
    } else {
        Err(StoreError::value_format(format!("invalid path '{}'", node_path)))
    }
}

/// Replace the buffered edges of `source` with `references`
fn buffer_references(state: &mut SessionState, source: i64, references: Vec<ReferenceEdge>) {
    state.pending.touched.insert(source);
    state.pending.edges.retain(|(id, _)| *id != source);
    state
        .pending
        .edges
        .extend(references.into_iter().map(|edge| (source, edge)));
}

impl RelationalStore {
    //
    // STORE
    //

    pub(super) async fn store_nodes_locked(
        &self,
        state: &mut SessionState,
        operations: Vec<StoreOperation>,
    ) -> Result<(), StoreError> {
        let login = state.login()?.clone();
        let (namespaces, node_types) = self.registries(state).await?;
        let processor = NodeProcessor::new(&node_types, &namespaces, &login.credentials);

        let batch_paths: HashSet<String> = operations
            .iter()
            .filter(|op| !matches!(op, StoreOperation::Deleted { .. }))
            .map(|op| op.path().to_string())
            .collect();

        let mut queue: VecDeque<StoreOperation> = operations.into();
        while let Some(operation) = queue.pop_front() {
            match operation {
                StoreOperation::Add { path, properties } => {
                    let children = self
                        .insert_node(
                            state,
                            &processor,
                            &namespaces,
                            &login.workspace,
                            &path,
                            properties,
                            &batch_paths,
                        )
                        .await?;
                    queue.extend(children);
                }
                StoreOperation::Update { path, properties } => {
                    match self.find_row(&login.workspace, &path).await? {
                        Some(row) => {
                            self.update_node(state, &processor, &login.workspace, row, properties)
                                .await?
                        }
                        None => {
                            let children = self
                                .insert_node(
                                    state,
                                    &processor,
                                    &namespaces,
                                    &login.workspace,
                                    &path,
                                    properties,
                                    &batch_paths,
                                )
                                .await?;
                            queue.extend(children);
                        }
                    }
                }
                StoreOperation::Deleted { path, properties } => {
                    match self.find_row(&login.workspace, &path).await? {
                        Some(row) => {
                            let primary_type = row.primary_type.clone();
                            self.rewrite_node(state, &login.workspace, &row, &properties, &primary_type)
                                .await?
                        }
                        None => tracing::debug!(path = %path, "Tombstone for missing node ignored"),
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn insert_node(
        &self,
        state: &mut SessionState,
        processor: &NodeProcessor<'_>,
        namespaces: &NamespaceRegistry,
        workspace: &str,
        node_path: &str,
        properties: Vec<Property>,
        batch_paths: &HashSet<String>,
    ) -> Result<Vec<StoreOperation>, StoreError> {
        check_node_path(node_path)?;
        let parent = path::parent_path(node_path)
            .ok_or_else(|| StoreError::already_exists(node_path.to_string()))?;
        let name = path::node_name(node_path);
        namespaces.check_name(name)?;

        if self.find_row(workspace, node_path).await?.is_some() {
            return Err(StoreError::already_exists(node_path.to_string()));
        }
        if self.find_row(workspace, parent).await?.is_none() {
            return Err(StoreError::not_found(parent.to_string()));
        }

        let identifier = find_property(&properties, UUID)
            .and_then(Property::first_str)
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        if self
            .find_row_by_identifier(workspace, &identifier)
            .await?
            .is_some()
        {
            return Err(StoreError::already_exists(format!("identifier {}", identifier)));
        }

        let processed = processor.process_new(node_path, &identifier, properties, batch_paths)?;
        let encoded = codec::encode(&processed.properties)
            .map_err(|e| StoreError::encode(node_path.to_string(), e))?;
        let sort_order = self.next_sort_order(workspace, parent).await?;
        let (namespace, local_name) = path::split_name(name);

        self.execute(
            format!("Failed to insert node {}", node_path),
            "INSERT INTO nodes
                (path, parent, local_name, namespace, workspace_name, identifier, type, props, depth, sort_order)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                node_path,
                parent,
                local_name,
                namespace,
                workspace,
                identifier.as_str(),
                processed.primary_type.as_str(),
                encoded.blob,
                path::depth(node_path),
                sort_order
            ],
        )
        .await?;
        let id = self.conn.last_insert_rowid();

        self.write_binaries(id, workspace, &encoded.binaries).await?;
        buffer_references(state, id, encoded.references);

        tracing::debug!(path = node_path, identifier = %identifier, "Node added");
        Ok(processed.child_operations)
    }

    async fn update_node(
        &self,
        state: &mut SessionState,
        processor: &NodeProcessor<'_>,
        workspace: &str,
        row: NodeRow,
        properties: Vec<Property>,
    ) -> Result<(), StoreError> {
        let existing = NodeData {
            path: row.path.clone(),
            identifier: row.identifier.clone(),
            primary_type: row.primary_type.clone(),
            properties: Vec::new(),
            children: Vec::new(),
        };
        let properties = processor.process_update(&existing, properties)?;
        let primary_type = find_property(&properties, PRIMARY_TYPE)
            .and_then(Property::first_str)
            .unwrap_or(&row.primary_type)
            .to_string();

        self.rewrite_node(state, workspace, &row, &properties, &primary_type)
            .await?;
        tracing::debug!(path = %row.path, "Node updated");
        Ok(())
    }

    /// Replace a row's blob in place and resync its chunks and edges
    async fn rewrite_node(
        &self,
        state: &mut SessionState,
        workspace: &str,
        row: &NodeRow,
        properties: &[Property],
        primary_type: &str,
    ) -> Result<(), StoreError> {
        let encoded =
            codec::encode(properties).map_err(|e| StoreError::encode(row.path.clone(), e))?;

        self.execute(
            format!("Failed to update node {}", row.path),
            "UPDATE nodes SET props = ?, type = ? WHERE id = ?",
            params![encoded.blob, primary_type, row.id],
        )
        .await?;

        // chunks of binary properties that are gone from the set
        let binary_names: BTreeSet<&str> = properties
            .iter()
            .filter(|p| p.property_type == PropertyType::Binary)
            .map(|p| p.name.as_str())
            .collect();
        for stale in self.binary_property_names(row.id).await? {
            if !binary_names.contains(stale.as_str()) {
                self.delete_binary(row.id, &stale).await?;
            }
        }

        self.write_binaries(row.id, workspace, &encoded.binaries)
            .await?;
        buffer_references(state, row.id, encoded.references);
        Ok(())
    }

    async fn next_sort_order(&self, workspace: &str, parent: &str) -> Result<i64, StoreError> {
        let mut rows = self
            .query_rows(
                format!("Failed to compute sort order under {}", parent),
                "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM nodes
                 WHERE parent = ? AND workspace_name = ?",
                params![parent, workspace],
            )
            .await?;
        match next_row(&mut rows, parent).await? {
            Some(row) => integer(&row, 0, "sort order"),
            None => Ok(0),
        }
    }

    //
    // BINARY CHUNKS
    //

    /// Replace the stored chunks of every property that carries payloads
    async fn write_binaries(
        &self,
        node_id: i64,
        workspace: &str,
        binaries: &[BinaryPayload],
    ) -> Result<(), StoreError> {
        let names: BTreeSet<&str> = binaries.iter().map(|b| b.property_name.as_str()).collect();
        for name in names {
            self.delete_binary(node_id, name).await?;
        }

        for payload in binaries {
            self.execute(
                format!("Failed to write binary {}", payload.property_name),
                "INSERT INTO binary_data (node_id, property_name, workspace_name, idx, data)
                 VALUES (?, ?, ?, ?, ?)",
                params![
                    node_id,
                    payload.property_name.as_str(),
                    workspace,
                    payload.index as i64,
                    payload.data.clone()
                ],
            )
            .await?;
        }
        Ok(())
    }

    async fn delete_binary(&self, node_id: i64, name: &str) -> Result<(), StoreError> {
        self.execute(
            format!("Failed to delete binary {}", name),
            "DELETE FROM binary_data WHERE node_id = ? AND property_name = ?",
            params![node_id, name],
        )
        .await?;
        Ok(())
    }

    async fn binary_property_names(&self, node_id: i64) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .query_rows(
                "Failed to list binary properties",
                "SELECT DISTINCT property_name FROM binary_data WHERE node_id = ?",
                params![node_id],
            )
            .await?;
        let mut names = Vec::new();
        while let Some(row) = next_row(&mut rows, "binary property names").await? {
            names.push(text(&row, 0, "binary property name")?);
        }
        Ok(names)
    }

    //
    // DELETE
    //

    pub(super) async fn delete_nodes_locked(
        &self,
        state: &mut SessionState,
        paths: &[String],
    ) -> Result<(), StoreError> {
        let workspace = state.workspace()?;

        for node_path in paths {
            if path::is_root(node_path) {
                return Err(StoreError::constraint("the root node cannot be deleted"));
            }
            self.require_row(&workspace, node_path).await?;

            let (prefix, prefix_len) = subtree_prefix(node_path);
            let ids = self
                .query_ids(
                    node_path,
                    &format!("SELECT id FROM nodes WHERE {}", SUBTREE_PREDICATE),
                    params![
                        workspace.as_str(),
                        node_path.as_str(),
                        prefix_len,
                        prefix.as_str()
                    ],
                )
                .await?;

            self.execute(
                format!("Failed to delete binaries under {}", node_path),
                &format!(
                    "DELETE FROM binary_data WHERE node_id IN (SELECT id FROM nodes WHERE {})",
                    SUBTREE_PREDICATE
                ),
                params![
                    workspace.as_str(),
                    node_path.as_str(),
                    prefix_len,
                    prefix.as_str()
                ],
            )
            .await?;
            self.execute(
                format!("Failed to delete {}", node_path),
                &format!("DELETE FROM nodes WHERE {}", SUBTREE_PREDICATE),
                params![
                    workspace.as_str(),
                    node_path.as_str(),
                    prefix_len,
                    prefix.as_str()
                ],
            )
            .await?;

            tracing::debug!(path = %node_path, count = ids.len(), "Subtree deleted");
            state.pending.deleted.extend(ids);
        }
        Ok(())
    }

    pub(super) async fn delete_properties_locked(
        &self,
        state: &mut SessionState,
        property_paths: &[String],
    ) -> Result<(), StoreError> {
        let workspace = state.workspace()?;

        for property_path in property_paths {
            let (node_path, name) = path::split_property_path(property_path).ok_or_else(|| {
                StoreError::value_format(format!("invalid property path '{}'", property_path))
            })?;
            if name == PRIMARY_TYPE {
                return Err(StoreError::constraint(format!(
                    "{} cannot be removed",
                    property_path
                )));
            }
            let row = self.require_row(&workspace, node_path).await?;

            let removed = codec::remove_properties(&row.props, &[name])
                .map_err(|e| StoreError::corrupt(format!("Failed to rewrite {}", node_path), e))?;
            if !removed.was_removed(name) {
                return Err(StoreError::not_found(property_path.clone()));
            }

            self.execute(
                format!("Failed to remove property {}", property_path),
                "UPDATE nodes SET props = ? WHERE id = ?",
                params![removed.blob.as_str(), row.id],
            )
            .await?;

            let was_reference = removed.references.iter().any(|n| n == name)
                || removed.weak_references.iter().any(|n| n == name);
            if was_reference {
                self.delete_property_edges(row.id, name).await?;
                state
                    .pending
                    .edges
                    .retain(|(id, edge)| !(*id == row.id && edge.property_name == name));
            }
            if removed.binaries.iter().any(|n| n == name) {
                self.delete_binary(row.id, name).await?;
            }
            tracing::debug!(property = %property_path, "Property removed");
        }
        Ok(())
    }

    //
    // MOVE
    //

    pub(super) async fn move_nodes_locked(
        &self,
        state: &mut SessionState,
        operations: &[MoveOperation],
    ) -> Result<(), StoreError> {
        let workspace = state.workspace()?;
        let (namespaces, _) = self.registries(state).await?;

        for operation in operations {
            let (src, dst) = (operation.src.as_str(), operation.dst.as_str());
            if path::is_root(src) {
                return Err(StoreError::constraint("the root node cannot be moved"));
            }
            check_node_path(dst)?;
            if path::is_self_or_descendant(dst, src) {
                return Err(StoreError::constraint(format!(
                    "cannot move {} into its own subtree at {}",
                    src, dst
                )));
            }

            self.require_row(&workspace, src).await?;
            if self.find_row(&workspace, dst).await?.is_some() {
                return Err(StoreError::already_exists(dst.to_string()));
            }
            let dst_parent = path::parent_path(dst)
                .ok_or_else(|| StoreError::already_exists(dst.to_string()))?;
            if self.find_row(&workspace, dst_parent).await?.is_none() {
                return Err(StoreError::not_found(dst_parent.to_string()));
            }
            let name = path::node_name(dst);
            namespaces.check_name(name)?;

            let new_parent = path::parent_path(src) != Some(dst_parent);
            let sort_order = if new_parent {
                Some(self.next_sort_order(&workspace, dst_parent).await?)
            } else {
                None
            };

            let (prefix, prefix_len) = subtree_prefix(src);
            let suffix_start = src.chars().count() as i64 + 1;
            let moved = self
                .execute(
                    format!("Failed to move {} to {}", src, dst),
                    "UPDATE nodes SET
                        path = ? || substr(path, ?),
                        parent = CASE WHEN path = ? THEN ? ELSE ? || substr(parent, ?) END,
                        depth = depth + ?
                     WHERE workspace_name = ? AND (path = ? OR substr(path, 1, ?) = ?)",
                    params![
                        dst,
                        suffix_start,
                        src,
                        dst_parent,
                        dst,
                        suffix_start,
                        path::depth(dst) - path::depth(src),
                        workspace.as_str(),
                        src,
                        prefix_len,
                        prefix.as_str()
                    ],
                )
                .await?;

            let (namespace, local_name) = path::split_name(name);
            match sort_order {
                Some(order) => {
                    self.execute(
                        format!("Failed to rename {}", dst),
                        "UPDATE nodes SET local_name = ?, namespace = ?, sort_order = ?
                         WHERE path = ? AND workspace_name = ?",
                        params![local_name, namespace, order, dst, workspace.as_str()],
                    )
                    .await?
                }
                None => {
                    self.execute(
                        format!("Failed to rename {}", dst),
                        "UPDATE nodes SET local_name = ?, namespace = ?
                         WHERE path = ? AND workspace_name = ?",
                        params![local_name, namespace, dst, workspace.as_str()],
                    )
                    .await?
                }
            };

            tracing::debug!(src, dst, rows = moved, "Subtree moved");
        }
        Ok(())
    }

    //
    // COPY
    //

    pub(super) async fn copy_node_locked(
        &self,
        state: &mut SessionState,
        src: &str,
        dst: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError> {
        let workspace = state.workspace()?;
        let source_workspace = src_workspace.unwrap_or(&workspace).to_string();

        if path::is_root(src) {
            return Err(StoreError::constraint("the root node cannot be copied"));
        }
        check_node_path(dst)?;
        if source_workspace == workspace && path::is_self_or_descendant(dst, src) {
            return Err(StoreError::constraint(format!(
                "cannot copy {} into its own subtree at {}",
                src, dst
            )));
        }
        if !self.workspace_exists_unlocked(&source_workspace).await? {
            return Err(StoreError::not_found(format!("workspace '{}'", source_workspace)));
        }
        self.require_row(&source_workspace, src).await?;
        if self.find_row(&workspace, dst).await?.is_some() {
            return Err(StoreError::already_exists(dst.to_string()));
        }
        let dst_parent = path::parent_path(dst)
            .ok_or_else(|| StoreError::already_exists(dst.to_string()))?;
        if self.find_row(&workspace, dst_parent).await?.is_none() {
            return Err(StoreError::not_found(dst_parent.to_string()));
        }

        let (prefix, prefix_len) = subtree_prefix(src);
        let mut rows = self
            .query_rows(
                format!("Failed to read subtree {}", src),
                &format!(
                    "SELECT id, path, identifier, type, props, sort_order FROM nodes
                     WHERE {} ORDER BY depth, sort_order, id",
                    SUBTREE_PREDICATE
                ),
                params![source_workspace.as_str(), src, prefix_len, prefix.as_str()],
            )
            .await?;
        let mut subtree = Vec::new();
        while let Some(row) = next_row(&mut rows, src).await? {
            subtree.push((NodeRow::from_row(&row)?, integer(&row, 5, "sort order")?));
        }

        let top_order = self.next_sort_order(&workspace, dst_parent).await?;
        for (row, sort_order) in subtree {
            let new_path = format!("{}{}", dst, &row.path[src.len()..]);
            let parent = path::parent_path(&new_path)
                .ok_or_else(|| StoreError::backend(format!("copy produced root path from {}", row.path)))?;
            let (namespace, local_name) = path::split_name(path::node_name(&new_path));
            let identifier = Uuid::new_v4().to_string();
            let order = if row.path == src { top_order } else { sort_order };

            let mut properties = row.decode()?;
            if let Some(uuid) = properties.iter_mut().find(|p| p.name == UUID) {
                uuid.values = vec![PropertyValue::String(identifier.clone())];
            }
            let encoded = codec::encode(&properties)
                .map_err(|e| StoreError::encode(new_path.clone(), e))?;

            self.execute(
                format!("Failed to copy {} to {}", row.path, new_path),
                "INSERT INTO nodes
                    (path, parent, local_name, namespace, workspace_name, identifier, type, props, depth, sort_order)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    new_path.as_str(),
                    parent,
                    local_name,
                    namespace,
                    workspace.as_str(),
                    identifier.as_str(),
                    row.primary_type.as_str(),
                    encoded.blob,
                    path::depth(&new_path),
                    order
                ],
            )
            .await?;
            let new_id = self.conn.last_insert_rowid();

            self.execute(
                format!("Failed to copy binaries of {}", row.path),
                "INSERT INTO binary_data (node_id, property_name, workspace_name, idx, data)
                 SELECT ?, property_name, ?, idx, data FROM binary_data WHERE node_id = ?",
                params![new_id, workspace.as_str(), row.id],
            )
            .await?;
            buffer_references(state, new_id, encoded.references);
        }

        tracing::debug!(src, dst, source_workspace = %source_workspace, "Subtree copied");
        Ok(())
    }

    //
    // REORDER
    //

    pub(super) async fn reorder_children_locked(
        &self,
        state: &mut SessionState,
        parent: &str,
        names: &[String],
    ) -> Result<(), StoreError> {
        let workspace = state.workspace()?;
        self.require_row(&workspace, parent).await?;

        let children = self.child_paths(&workspace, parent).await?;
        let mut ordered: Vec<String> = Vec::with_capacity(children.len());
        for name in names {
            let child = path::join(parent, name);
            if !children.contains(&child) {
                return Err(StoreError::not_found(child));
            }
            if !ordered.contains(&child) {
                ordered.push(child);
            }
        }
        let rest: Vec<String> = children
            .into_iter()
            .filter(|child| !ordered.contains(child))
            .collect();
        ordered.extend(rest);

        for (position, child) in ordered.iter().enumerate() {
            self.execute(
                format!("Failed to reorder {}", child),
                "UPDATE nodes SET sort_order = ? WHERE path = ? AND workspace_name = ?",
                params![position as i64, child.as_str(), workspace.as_str()],
            )
            .await?;
        }
        tracing::debug!(parent, count = ordered.len(), "Children reordered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_store;
    use crate::db::{ErrorKind, NodeStore};
    use crate::models::{MoveOperation, Property, PropertyType, StoreOperation};
    use anyhow::Result;

    #[tokio::test]
    async fn test_add_rules() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![StoreOperation::add("/a", vec![Property::long("n", 1)])])
            .await?;

        let err = store
            .store_nodes(vec![StoreOperation::add("/a", vec![])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = store
            .store_nodes(vec![StoreOperation::add("/missing/child", vec![])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = store
            .store_nodes(vec![StoreOperation::add("/zz:bad", vec![])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);

        let node = store.get_node("/a").await?;
        assert_eq!(node.primary_type, "nt:unstructured");
        assert_eq!(node.property("n").map(|p| p.values[0].to_storage_string()), Some("1".to_string()));
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_batch_is_atomic() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        let err = store
            .store_nodes(vec![
                StoreOperation::add("/first", vec![]),
                StoreOperation::add("/first", vec![]),
            ])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        assert_eq!(
            store.get_node("/first").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_update_upserts_and_replaces() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![StoreOperation::update(
                "/page",
                vec![Property::string("title", "Draft"), Property::string("extra", "x")],
            )])
            .await?;
        store
            .store_nodes(vec![StoreOperation::update(
                "/page",
                vec![Property::string("title", "Final")],
            )])
            .await?;

        let node = store.get_node("/page").await?;
        assert_eq!(node.property("title").and_then(|p| p.first_str()), Some("Final"));
        assert!(!node.has_property("extra"));

        // tombstone for a missing node is a no-op
        store
            .store_nodes(vec![StoreOperation::deleted("/gone", vec![])])
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_auto_created_children() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        let err = store
            .store_nodes(vec![StoreOperation::add(
                "/file",
                vec![Property::primary_type("nt:file")],
            )])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        store
            .store_nodes(vec![
                StoreOperation::add("/file", vec![Property::primary_type("nt:file")]),
                StoreOperation::add(
                    "/file/jcr:content",
                    vec![
                        Property::primary_type("nt:resource"),
                        Property::binary("jcr:data", b"abc".to_vec()),
                    ],
                ),
            ])
            .await?;

        let file = store.get_node("/file").await?;
        assert_eq!(file.children, vec!["jcr:content"]);
        assert!(file.has_property("jcr:created"));
        assert_eq!(
            store.get_binary_stream("/file/jcr:content/jcr:data").await?,
            vec![b"abc".to_vec()]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_subtree() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![
                StoreOperation::add("/a_b", vec![]),
                StoreOperation::add("/a_b/c", vec![Property::binary("bin", vec![1, 2])]),
                StoreOperation::add("/aXb", vec![]),
                StoreOperation::add("/aXb/c", vec![]),
            ])
            .await?;

        let err = store.delete_node_immediately("/").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        store.delete_node_immediately("/a_b").await?;
        assert_eq!(store.get_node("/a_b/c").await.unwrap_err().kind(), ErrorKind::NotFound);
        // '_' is matched literally
        assert!(store.get_node("/aXb/c").await.is_ok());

        let err = store.delete_node_immediately("/a_b").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_properties() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![StoreOperation::add(
                "/n",
                vec![
                    Property::string("keep", "a < b & c"),
                    Property::string("drop", "x"),
                    Property::binary("blob", vec![9]),
                ],
            )])
            .await?;

        store
            .delete_properties(&["/n/drop".to_string(), "/n/blob".to_string()])
            .await?;
        let node = store.get_node("/n").await?;
        assert!(!node.has_property("drop"));
        assert!(!node.has_property("blob"));
        assert_eq!(node.property("keep").and_then(|p| p.first_str()), Some("a < b & c"));

        let err = store.delete_property_immediately("/n/drop").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_move_rewrites_subtree() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![
                StoreOperation::add("/a", vec![]),
                StoreOperation::add("/a/b", vec![]),
                StoreOperation::add("/a/b/c", vec![]),
                StoreOperation::add("/x", vec![]),
                StoreOperation::add("/x/first", vec![]),
            ])
            .await?;

        let err = store
            .move_node_immediately("/a", "/x/app:moved")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);
        store.move_node_immediately("/a", "/x/moved").await?;

        let moved = store.get_node("/x/moved").await?;
        assert_eq!(moved.children, vec!["b"]);
        let deep = store.get_node("/x/moved/b/c").await?;
        assert_eq!(deep.path, "/x/moved/b/c");
        assert_eq!(store.get_node("/a").await.unwrap_err().kind(), ErrorKind::NotFound);

        let parent = store.get_node("/x").await?;
        assert_eq!(parent.children, vec!["first", "moved"]);

        let err = store
            .move_nodes(&[MoveOperation::new("/x", "/x/moved/inner")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let err = store
            .move_nodes(&[MoveOperation::new("/x/first", "/x/moved")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = store
            .move_nodes(&[MoveOperation::new("/x/first", "/nowhere/first")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_copy_assigns_new_identifiers() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![
                StoreOperation::add(
                    "/src",
                    vec![Property::mixin_types(&["mix:referenceable"])],
                ),
                StoreOperation::add(
                    "/src/child",
                    vec![Property::binary("bin", vec![7, 7])],
                ),
            ])
            .await?;

        store.copy_node("/src", "/dst", None).await?;

        let original = store.get_node("/src").await?;
        let copy = store.get_node("/dst").await?;
        assert_ne!(original.identifier, copy.identifier);
        assert_eq!(
            copy.property("jcr:uuid").and_then(|p| p.first_str()),
            Some(copy.identifier.as_str())
        );
        assert_eq!(copy.children, vec!["child"]);
        assert_eq!(store.get_binary_stream("/dst/child/bin").await?, vec![vec![7, 7]]);

        let err = store.copy_node("/src", "/dst", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        Ok(())
    }

    #[tokio::test]
    async fn test_reorder_children() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![
                StoreOperation::add("/p", vec![]),
                StoreOperation::add("/p/a", vec![]),
                StoreOperation::add("/p/b", vec![]),
                StoreOperation::add("/p/c", vec![]),
            ])
            .await?;

        store
            .reorder_children("/p", &["c".to_string(), "a".to_string()])
            .await?;
        assert_eq!(store.get_node("/p").await?.children, vec!["c", "a", "b"]);

        let err = store
            .reorder_children("/p", &["zz".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_value_mismatch_is_value_format() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        let mut property = Property::long("n", 1);
        property.property_type = PropertyType::Boolean;
        let err = store
            .store_nodes(vec![StoreOperation::add("/bad", vec![property])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueFormat);
        Ok(())
    }
}
