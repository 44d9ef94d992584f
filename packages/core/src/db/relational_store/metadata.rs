//! Workspaces, namespaces and node type persistence

use super::{integer, next_row, optional_text, text, RelationalStore, SessionState};
use crate::db::database::DatabaseService;
use crate::db::error::StoreError;
use crate::models::{
    path, ChildNodeDefinition, NodeTypeDefinition, OnParentVersion, PropertyDefinition,
    PropertyType, PropertyValue,
};
use crate::services::{NamespaceRegistry, NodeTypeRegistry};
use libsql::{params, Value};
use std::collections::BTreeMap;
use std::sync::Arc;

fn split_names(value: &str) -> Vec<String> {
    value.split_whitespace().map(str::to_string).collect()
}

fn optional(value: &Option<String>) -> Value {
    match value {
        Some(text) => Value::Text(text.clone()),
        None => Value::Null,
    }
}

fn on_parent_version(value: &str) -> Result<OnParentVersion, StoreError> {
    OnParentVersion::parse(value)
        .ok_or_else(|| StoreError::backend(format!("unknown on-parent-version action '{}'", value)))
}

impl RelationalStore {
    //
    // WORKSPACES
    //

    pub(super) async fn workspace_names(&self) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .query_rows(
                "Failed to list workspaces",
                "SELECT name FROM workspaces ORDER BY name",
                (),
            )
            .await?;
        let mut names = Vec::new();
        while let Some(row) = next_row(&mut rows, "workspaces").await? {
            names.push(text(&row, 0, "workspace name")?);
        }
        Ok(names)
    }

    pub(super) async fn workspace_exists_unlocked(&self, name: &str) -> Result<bool, StoreError> {
        let mut rows = self
            .query_rows(
                format!("Failed to look up workspace '{}'", name),
                "SELECT 1 FROM workspaces WHERE name = ?",
                params![name],
            )
            .await?;
        Ok(next_row(&mut rows, name).await?.is_some())
    }

    pub(super) async fn create_workspace_unlocked(
        &self,
        name: &str,
        src_workspace: Option<&str>,
    ) -> Result<(), StoreError> {
        if src_workspace.is_some() {
            return Err(StoreError::unsupported("workspace cloning"));
        }
        if !path::is_valid_name(name) {
            return Err(StoreError::value_format(format!("invalid workspace name '{}'", name)));
        }
        if !DatabaseService::create_workspace(&self.conn, name).await? {
            return Err(StoreError::already_exists(format!("workspace '{}'", name)));
        }
        tracing::info!(workspace = name, "Workspace created");
        Ok(())
    }

    pub(super) async fn delete_workspace_unlocked(
        &self,
        name: &str,
        current: &str,
    ) -> Result<(), StoreError> {
        if name == current {
            return Err(StoreError::invalid_state(format!(
                "workspace '{}' is in use by this session",
                name
            )));
        }
        if !self.workspace_exists_unlocked(name).await? {
            return Err(StoreError::not_found(format!("workspace '{}'", name)));
        }

        let owned = "SELECT id FROM nodes WHERE workspace_name = ?";
        for statement in [
            format!("DELETE FROM nodes_references WHERE source_id IN ({})", owned),
            format!("DELETE FROM nodes_weakreferences WHERE source_id IN ({})", owned),
            "DELETE FROM binary_data WHERE workspace_name = ?".to_string(),
            "DELETE FROM nodes WHERE workspace_name = ?".to_string(),
            "DELETE FROM workspaces WHERE name = ?".to_string(),
        ] {
            self.execute(
                format!("Failed to delete workspace '{}'", name),
                &statement,
                params![name],
            )
            .await?;
        }
        tracing::info!(workspace = name, "Workspace deleted");
        Ok(())
    }

    //
    // NAMESPACES
    //

    pub(super) async fn load_namespaces(&self) -> Result<NamespaceRegistry, StoreError> {
        let mut rows = self
            .query_rows("Failed to load namespaces", "SELECT prefix, uri FROM namespaces", ())
            .await?;
        let mut stored = Vec::new();
        while let Some(row) = next_row(&mut rows, "namespaces").await? {
            stored.push((text(&row, 0, "namespace prefix")?, text(&row, 1, "namespace uri")?));
        }
        Ok(NamespaceRegistry::with_entries(stored))
    }

    pub(super) async fn register_namespace_locked(
        &self,
        state: &mut SessionState,
        prefix: &str,
        uri: &str,
    ) -> Result<(), StoreError> {
        let (namespaces, _) = self.registries(state).await?;
        namespaces.check_register(prefix, uri)?;

        self.execute(
            format!("Failed to register namespace '{}'", prefix),
            "INSERT INTO namespaces (prefix, uri) VALUES (?, ?)
             ON CONFLICT(prefix) DO UPDATE SET uri = excluded.uri",
            params![prefix, uri],
        )
        .await?;

        let mut updated = (*namespaces).clone();
        updated.insert(prefix, uri);
        state.namespaces = Some(Arc::new(updated));
        tracing::info!(prefix, uri, "Namespace registered");
        Ok(())
    }

    pub(super) async fn unregister_namespace_locked(
        &self,
        state: &mut SessionState,
        prefix: &str,
    ) -> Result<(), StoreError> {
        let (namespaces, _) = self.registries(state).await?;
        namespaces.check_unregister(prefix)?;

        self.execute(
            format!("Failed to unregister namespace '{}'", prefix),
            "DELETE FROM namespaces WHERE prefix = ?",
            params![prefix],
        )
        .await?;

        let mut updated = (*namespaces).clone();
        updated.remove(prefix);
        state.namespaces = Some(Arc::new(updated));
        tracing::info!(prefix, "Namespace unregistered");
        Ok(())
    }

    //
    // NODE TYPES
    //

    pub(super) async fn load_node_types(&self) -> Result<NodeTypeRegistry, StoreError> {
        let mut definitions: BTreeMap<i64, NodeTypeDefinition> = BTreeMap::new();

        let mut rows = self
            .query_rows(
                "Failed to load node types",
                "SELECT node_type_id, name, supertypes, is_abstract, is_mixin, queryable,
                        orderable_child_nodes, primary_item
                 FROM type_nodes ORDER BY node_type_id",
                (),
            )
            .await?;
        while let Some(row) = next_row(&mut rows, "type_nodes").await? {
            let id = integer(&row, 0, "node type id")?;
            let mut definition = NodeTypeDefinition::new(text(&row, 1, "node type name")?);
            definition.supertypes = split_names(&text(&row, 2, "supertypes")?);
            definition.is_abstract = integer(&row, 3, "is_abstract")? != 0;
            definition.is_mixin = integer(&row, 4, "is_mixin")? != 0;
            definition.queryable = integer(&row, 5, "queryable")? != 0;
            definition.orderable_child_nodes = integer(&row, 6, "orderable_child_nodes")? != 0;
            definition.primary_item = optional_text(&row, 7, "primary_item")?;
            definitions.insert(id, definition);
        }

        let mut rows = self
            .query_rows(
                "Failed to load property definitions",
                "SELECT node_type_id, name, protected, auto_created, mandatory, on_parent_version,
                        multiple, fulltext_searchable, query_orderable, required_type, default_value
                 FROM type_props ORDER BY rowid",
                (),
            )
            .await?;
        while let Some(row) = next_row(&mut rows, "type_props").await? {
            let id = integer(&row, 0, "node type id")?;
            let required_type = text(&row, 9, "required_type")?;
            let required_type = PropertyType::from_tag(&required_type).ok_or_else(|| {
                StoreError::backend(format!("unknown required type '{}'", required_type))
            })?;
            let default_values = match optional_text(&row, 10, "default_value")? {
                Some(json) => serde_json::from_str::<Vec<PropertyValue>>(&json).map_err(|e| {
                    StoreError::backend(format!("Failed to parse default values: {}", e))
                })?,
                None => Vec::new(),
            };

            let mut definition = PropertyDefinition::new(text(&row, 1, "property name")?, required_type);
            definition.protected = integer(&row, 2, "protected")? != 0;
            definition.auto_created = integer(&row, 3, "auto_created")? != 0;
            definition.mandatory = integer(&row, 4, "mandatory")? != 0;
            definition.on_parent_version = on_parent_version(&text(&row, 5, "on_parent_version")?)?;
            definition.multiple = integer(&row, 6, "multiple")? != 0;
            definition.fulltext_searchable = integer(&row, 7, "fulltext_searchable")? != 0;
            definition.query_orderable = integer(&row, 8, "query_orderable")? != 0;
            definition.default_values = default_values;

            if let Some(owner) = definitions.get_mut(&id) {
                owner.property_definitions.push(definition);
            }
        }

        let mut rows = self
            .query_rows(
                "Failed to load child node definitions",
                "SELECT node_type_id, name, protected, auto_created, mandatory, on_parent_version,
                        primary_types, default_type
                 FROM type_childs ORDER BY rowid",
                (),
            )
            .await?;
        while let Some(row) = next_row(&mut rows, "type_childs").await? {
            let id = integer(&row, 0, "node type id")?;
            let mut definition = ChildNodeDefinition::new(text(&row, 1, "child name")?);
            definition.protected = integer(&row, 2, "protected")? != 0;
            definition.auto_created = integer(&row, 3, "auto_created")? != 0;
            definition.mandatory = integer(&row, 4, "mandatory")? != 0;
            definition.on_parent_version = on_parent_version(&text(&row, 5, "on_parent_version")?)?;
            definition.required_primary_types = split_names(&text(&row, 6, "primary_types")?);
            definition.default_primary_type = optional_text(&row, 7, "default_type")?;

            if let Some(owner) = definitions.get_mut(&id) {
                owner.child_node_definitions.push(definition);
            }
        }

        Ok(NodeTypeRegistry::with_definitions(
            definitions.into_values().collect(),
        ))
    }

    pub(super) async fn register_node_types_locked(
        &self,
        state: &mut SessionState,
        definitions: Vec<NodeTypeDefinition>,
        allow_update: bool,
    ) -> Result<(), StoreError> {
        let (_, node_types) = self.registries(state).await?;
        node_types.check_registration(&definitions, allow_update)?;

        for definition in &definitions {
            self.store_node_type(definition).await?;
        }

        // reloaded with the new definitions on next use
        state.node_types = None;
        tracing::info!(count = definitions.len(), "Node types registered");
        Ok(())
    }

    async fn store_node_type(&self, definition: &NodeTypeDefinition) -> Result<(), StoreError> {
        let name = definition.name.as_str();
        let context = || format!("Failed to store node type '{}'", name);

        for table in ["type_props", "type_childs"] {
            self.execute(
                context(),
                &format!(
                    "DELETE FROM {} WHERE node_type_id IN
                        (SELECT node_type_id FROM type_nodes WHERE name = ?)",
                    table
                ),
                params![name],
            )
            .await?;
        }
        self.execute(context(), "DELETE FROM type_nodes WHERE name = ?", params![name])
            .await?;

        self.execute(
            context(),
            "INSERT INTO type_nodes
                (name, supertypes, is_abstract, is_mixin, queryable, orderable_child_nodes, primary_item)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            params![
                name,
                definition.supertypes.join(" "),
                definition.is_abstract as i64,
                definition.is_mixin as i64,
                definition.queryable as i64,
                definition.orderable_child_nodes as i64,
                optional(&definition.primary_item)
            ],
        )
        .await?;
        let type_id = self.conn.last_insert_rowid();

        for property in &definition.property_definitions {
            let default_value = if property.default_values.is_empty() {
                None
            } else {
                Some(serde_json::to_string(&property.default_values).map_err(|e| {
                    StoreError::backend(format!("Failed to serialize default values: {}", e))
                })?)
            };
            self.execute(
                context(),
                "INSERT INTO type_props
                    (node_type_id, name, protected, auto_created, mandatory, on_parent_version,
                     multiple, fulltext_searchable, query_orderable, required_type, default_value)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    type_id,
                    property.name.as_str(),
                    property.protected as i64,
                    property.auto_created as i64,
                    property.mandatory as i64,
                    property.on_parent_version.as_str(),
                    property.multiple as i64,
                    property.fulltext_searchable as i64,
                    property.query_orderable as i64,
                    property.required_type.as_str(),
                    optional(&default_value)
                ],
            )
            .await?;
        }

        for child in &definition.child_node_definitions {
            self.execute(
                context(),
                "INSERT INTO type_childs
                    (node_type_id, name, protected, auto_created, mandatory, on_parent_version,
                     primary_types, default_type)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    type_id,
                    child.name.as_str(),
                    child.protected as i64,
                    child.auto_created as i64,
                    child.mandatory as i64,
                    child.on_parent_version.as_str(),
                    child.required_primary_types.join(" "),
                    optional(&child.default_primary_type)
                ],
            )
            .await?;
        }

        tracing::debug!(node_type = name, "Node type stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_store;
    use crate::db::{ErrorKind, NodeStore};
    use crate::models::{
        ChildNodeDefinition, NodeTypeDefinition, Property, PropertyDefinition, PropertyType,
        PropertyValue, StoreOperation,
    };
    use anyhow::Result;

    fn article_type() -> NodeTypeDefinition {
        NodeTypeDefinition::new("blog:article")
            .with_supertypes(&["nt:base"])
            .with_primary_item("blog:body")
            .with_property(PropertyDefinition::new("blog:title", PropertyType::String).mandatory())
            .with_property(
                PropertyDefinition::new("blog:status", PropertyType::String)
                    .auto_created()
                    .with_default(vec![PropertyValue::from("draft")]),
            )
            .with_child(
                ChildNodeDefinition::new("blog:comments")
                    .auto_created()
                    .with_default_type("nt:unstructured"),
            )
    }

    #[tokio::test]
    async fn test_namespace_registration() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store.register_namespace("blog", "urn:example:blog").await?;
        let namespaces = store.get_namespaces().await?;
        assert_eq!(namespaces.get("blog").map(String::as_str), Some("urn:example:blog"));
        assert_eq!(namespaces.get("jcr").map(String::as_str), Some("http://www.jcp.org/jcr/1.0"));

        let err = store.register_namespace("jcr", "urn:other").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);
        let err = store.unregister_namespace("unknown").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Namespace);

        store.unregister_namespace("blog").await?;
        assert!(!store.get_namespaces().await?.contains_key("blog"));
        Ok(())
    }

    #[tokio::test]
    async fn test_node_type_round_trip() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;
        store.register_namespace("blog", "urn:example:blog").await?;

        store.register_node_types(vec![article_type()], false).await?;
        let stored = store
            .get_node_types(&["blog:article".to_string()])
            .await?;
        assert_eq!(stored, vec![article_type()]);

        let err = store
            .register_node_types(vec![article_type()], false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        store.register_node_types(vec![article_type()], true).await?;

        let err = store
            .register_node_types(vec![NodeTypeDefinition::new("nt:folder")], true)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = store
            .register_node_types(
                vec![NodeTypeDefinition::new("blog:orphan").with_supertypes(&["blog:missing"])],
                false,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        let all = store.get_node_types(&[]).await?;
        assert!(all.iter().any(|d| d.name == "nt:base"));
        assert!(all.iter().any(|d| d.name == "blog:article"));
        Ok(())
    }

    #[tokio::test]
    async fn test_stored_type_drives_validation() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;
        store.register_namespace("blog", "urn:example:blog").await?;
        store.register_node_types(vec![article_type()], false).await?;

        let err = store
            .store_nodes(vec![StoreOperation::add(
                "/post",
                vec![Property::primary_type("blog:article")],
            )])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);

        store
            .store_nodes(vec![StoreOperation::add(
                "/post",
                vec![
                    Property::primary_type("blog:article"),
                    Property::string("blog:title", "Hello"),
                ],
            )])
            .await?;

        let post = store.get_node("/post").await?;
        assert_eq!(
            post.property("blog:status").and_then(|p| p.first_str()),
            Some("draft")
        );
        assert_eq!(post.children, vec!["blog:comments"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_workspaces() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store.create_workspace("staging", None).await?;
        assert!(store.workspace_exists("staging").await?);
        assert_eq!(
            store.get_accessible_workspace_names().await?,
            vec!["default".to_string(), "staging".to_string()]
        );

        let err = store.create_workspace("staging", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
        let err = store
            .create_workspace("clone", Some("default"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        store.delete_workspace("staging").await?;
        assert!(!store.workspace_exists("staging").await?);
        let err = store.delete_workspace("default").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        Ok(())
    }
}
