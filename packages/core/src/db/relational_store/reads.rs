//! Node, binary and query reads

use super::{blob, integer, next_row, text, RelationalStore};
use crate::codec;
use crate::db::error::StoreError;
use crate::models::{path, NodeData, Property, PropertyType, PropertyValue, PRIMARY_TYPE};
use crate::query::{
    Dialect, QueryColumn, QueryCompiler, QueryObjectModel, QueryRow, DEFAULT_SCORE, PATH_COLUMN,
    PATH_PROPERTY, SCORE_COLUMN,
};
use crate::services::{NamespaceRegistry, NodeTypeRegistry};
use libsql::{params, Row};
use std::collections::HashSet;

pub(super) const NODE_COLUMNS: &str = "id, path, identifier, type, props";

/// One `nodes` row as selected by [`NODE_COLUMNS`]
#[derive(Debug, Clone)]
pub(super) struct NodeRow {
    pub id: i64,
    pub path: String,
    pub identifier: String,
    pub primary_type: String,
    pub props: String,
}

impl NodeRow {
    pub fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: integer(row, 0, "node id")?,
            path: text(row, 1, "node path")?,
            identifier: text(row, 2, "node identifier")?,
            primary_type: text(row, 3, "node type")?,
            props: text(row, 4, "node props")?,
        })
    }

    pub fn decode(&self) -> Result<Vec<Property>, StoreError> {
        codec::decode(&self.props)
            .map_err(|e| StoreError::corrupt(format!("Failed to decode properties of {}", self.path), e))
    }
}

impl RelationalStore {
    pub(super) async fn find_row(
        &self,
        workspace: &str,
        node_path: &str,
    ) -> Result<Option<NodeRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE path = ? AND workspace_name = ?",
            NODE_COLUMNS
        );
        let mut rows = self
            .query_rows(format!("Failed to read node {}", node_path), &sql, params![node_path, workspace])
            .await?;
        match next_row(&mut rows, node_path).await? {
            Some(row) => Ok(Some(NodeRow::from_row(&row)?)),
            None => Ok(None),
        }
    }

    pub(super) async fn require_row(
        &self,
        workspace: &str,
        node_path: &str,
    ) -> Result<NodeRow, StoreError> {
        self.find_row(workspace, node_path)
            .await?
            .ok_or_else(|| StoreError::not_found(node_path.to_string()))
    }

    pub(super) async fn find_row_by_identifier(
        &self,
        workspace: &str,
        identifier: &str,
    ) -> Result<Option<NodeRow>, StoreError> {
        let sql = format!(
            "SELECT {} FROM nodes WHERE identifier = ? AND workspace_name = ?",
            NODE_COLUMNS
        );
        let mut rows = self
            .query_rows(
                format!("Failed to read node by identifier {}", identifier),
                &sql,
                params![identifier, workspace],
            )
            .await?;
        match next_row(&mut rows, identifier).await? {
            Some(row) => Ok(Some(NodeRow::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Child paths of `parent` in sibling order
    pub(super) async fn child_paths(
        &self,
        workspace: &str,
        parent: &str,
    ) -> Result<Vec<String>, StoreError> {
        let mut rows = self
            .query_rows(
                format!("Failed to list children of {}", parent),
                "SELECT path FROM nodes WHERE parent = ? AND workspace_name = ?
                 ORDER BY sort_order, id",
                params![parent, workspace],
            )
            .await?;
        let mut paths = Vec::new();
        while let Some(row) = next_row(&mut rows, parent).await? {
            paths.push(text(&row, 0, "child path")?);
        }
        Ok(paths)
    }

    async fn to_node_data(&self, workspace: &str, row: NodeRow) -> Result<NodeData, StoreError> {
        let properties = row.decode()?;
        let children = self
            .child_paths(workspace, &row.path)
            .await?
            .iter()
            .map(|child| path::node_name(child).to_string())
            .collect();
        Ok(NodeData {
            path: row.path,
            identifier: row.identifier,
            primary_type: row.primary_type,
            properties,
            children,
        })
    }

    pub(super) async fn read_node(
        &self,
        workspace: &str,
        node_path: &str,
    ) -> Result<NodeData, StoreError> {
        let row = self.require_row(workspace, node_path).await?;
        self.to_node_data(workspace, row).await
    }

    pub(super) async fn read_nodes(
        &self,
        workspace: &str,
        paths: &[String],
    ) -> Result<Vec<NodeData>, StoreError> {
        let mut nodes = Vec::with_capacity(paths.len());
        for node_path in paths {
            if let Some(row) = self.find_row(workspace, node_path).await? {
                nodes.push(self.to_node_data(workspace, row).await?);
            }
        }
        Ok(nodes)
    }

    pub(super) async fn read_node_by_identifier(
        &self,
        workspace: &str,
        identifier: &str,
    ) -> Result<NodeData, StoreError> {
        let row = self
            .find_row_by_identifier(workspace, identifier)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("identifier {}", identifier)))?;
        self.to_node_data(workspace, row).await
    }

    pub(super) async fn read_nodes_by_identifier(
        &self,
        workspace: &str,
        identifiers: &[String],
    ) -> Result<Vec<NodeData>, StoreError> {
        let mut nodes = Vec::with_capacity(identifiers.len());
        for identifier in identifiers {
            if let Some(row) = self.find_row_by_identifier(workspace, identifier).await? {
                nodes.push(self.to_node_data(workspace, row).await?);
            }
        }
        Ok(nodes)
    }

    pub(super) async fn path_for_identifier(
        &self,
        workspace: &str,
        identifier: &str,
    ) -> Result<String, StoreError> {
        self.find_row_by_identifier(workspace, identifier)
            .await?
            .map(|row| row.path)
            .ok_or_else(|| StoreError::not_found(format!("identifier {}", identifier)))
    }

    pub(super) async fn read_binary(
        &self,
        workspace: &str,
        property_path: &str,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        let (node_path, name) = path::split_property_path(property_path)
            .ok_or_else(|| StoreError::value_format(format!("invalid property path '{}'", property_path)))?;
        let row = self.require_row(workspace, node_path).await?;

        let properties = codec::decode_filtered(&row.props, |n| n == name)
            .map_err(|e| StoreError::corrupt(format!("Failed to decode properties of {}", node_path), e))?;
        match properties.first() {
            Some(property) if property.property_type == PropertyType::Binary => {}
            Some(_) => {
                return Err(StoreError::value_format(format!(
                    "{} is not a binary property",
                    property_path
                )))
            }
            None => return Err(StoreError::not_found(property_path.to_string())),
        }

        let mut rows = self
            .query_rows(
                format!("Failed to read binary {}", property_path),
                "SELECT data FROM binary_data
                 WHERE node_id = ? AND property_name = ? AND workspace_name = ?
                 ORDER BY idx",
                params![row.id, name, workspace],
            )
            .await?;
        let mut chunks = Vec::new();
        while let Some(chunk) = next_row(&mut rows, property_path).await? {
            chunks.push(blob(&chunk, 0, "binary data")?);
        }
        Ok(chunks)
    }

    /// Compile, execute and reshape a query
    pub(super) async fn run_query(
        &self,
        workspace: &str,
        namespaces: &NamespaceRegistry,
        node_types: &NodeTypeRegistry,
        qom: &QueryObjectModel,
    ) -> Result<Vec<QueryRow>, StoreError> {
        let compiled =
            QueryCompiler::new(Dialect::Sqlite, namespaces.as_map(), node_types).compile(qom)?;
        tracing::debug!(sql = %compiled.sql, skip = compiled.skip, "Executing query");

        let mut rows = self
            .query_rows("Failed to execute query", &compiled.sql, params![workspace])
            .await?;

        let mut results = Vec::new();
        let mut skipped = 0;
        while let Some(row) = next_row(&mut rows, "query").await? {
            if skipped < compiled.skip {
                skipped += 1;
                continue;
            }
            let path = text(&row, 0, "query path")?;
            let primary_type = text(&row, 2, "query type")?;
            let props = text(&row, 3, "query props")?;
            results.push(reshape_row(qom, path, primary_type, &props)?);
        }
        Ok(results)
    }
}

fn reshape_row(
    qom: &QueryObjectModel,
    node_path: String,
    primary_type: String,
    props: &str,
) -> Result<QueryRow, StoreError> {
    let mut columns = vec![
        QueryColumn {
            name: PATH_COLUMN.to_string(),
            value: Some(Property::single(PATH_COLUMN, PropertyType::Path, node_path.clone())),
        },
        QueryColumn {
            name: SCORE_COLUMN.to_string(),
            value: Some(Property::single(
                SCORE_COLUMN,
                PropertyType::Double,
                PropertyValue::Double(DEFAULT_SCORE),
            )),
        },
    ];

    if qom.columns.is_empty() {
        columns.push(QueryColumn {
            name: PRIMARY_TYPE.to_string(),
            value: Some(Property::primary_type(primary_type)),
        });
        return Ok(QueryRow { columns });
    }

    let wanted: HashSet<&str> = qom.columns.iter().map(|c| c.property.as_str()).collect();
    let properties = codec::decode_filtered(props, |name| wanted.contains(name))
        .map_err(|e| StoreError::corrupt(format!("Failed to decode properties of {}", node_path), e))?;

    for column in &qom.columns {
        let value = if column.property == PATH_PROPERTY {
            Some(Property::single(PATH_PROPERTY, PropertyType::Path, node_path.clone()))
        } else {
            properties.iter().find(|p| p.name == column.property).cloned()
        };
        columns.push(QueryColumn {
            name: column.output_name().to_string(),
            value,
        });
    }
    Ok(QueryRow { columns })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_store;
    use crate::codec;
    use crate::db::{ErrorKind, NodeStore};
    use crate::models::{Property, PropertyType, StoreOperation};
    use crate::query::{Constraint, DynamicOperand, Literal, Operator, QueryObjectModel};
    use anyhow::Result;
    use libsql::params;

    fn property_equals(name: &str, value: &str) -> QueryObjectModel {
        QueryObjectModel::select("nt:unstructured").with_constraint(Constraint::comparison(
            DynamicOperand::property(name),
            Operator::EqualTo,
            Literal::string(value),
        ))
    }

    #[tokio::test]
    async fn test_children_in_sort_order() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![
                StoreOperation::add("/b", vec![]),
                StoreOperation::add("/a", vec![]),
                StoreOperation::add("/a/x", vec![]),
            ])
            .await?;

        let root = store.get_node("/").await?;
        assert_eq!(root.children, vec!["b", "a"]);
        assert_eq!(root.name(), "");

        let nodes = store
            .get_nodes(&["/a".to_string(), "/missing".to_string(), "/b".to_string()])
            .await?;
        let paths: Vec<_> = nodes.iter().map(|n| n.path.as_str()).collect();
        assert_eq!(paths, vec!["/a", "/b"]);
        assert_eq!(nodes[0].children, vec!["x"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_lookup_by_identifier() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![StoreOperation::add(
                "/doc",
                vec![
                    Property::mixin_types(&["mix:referenceable"]),
                    Property::string("jcr:uuid", "4f1b6c1e-0000-4000-8000-000000000001"),
                ],
            )])
            .await?;

        let node = store
            .get_node_by_identifier("4f1b6c1e-0000-4000-8000-000000000001")
            .await?;
        assert_eq!(node.path, "/doc");
        assert_eq!(
            store
                .get_node_path_for_identifier("4f1b6c1e-0000-4000-8000-000000000001")
                .await?,
            "/doc"
        );

        let err = store.get_node_by_identifier("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_binary_stream() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![StoreOperation::add(
                "/file",
                vec![Property::binary("data", b"hello world".to_vec())],
            )])
            .await?;

        let chunks = store.get_binary_stream("/file/data").await?;
        assert_eq!(chunks, vec![b"hello world".to_vec()]);

        // stored inline as length only
        let node = store.get_node("/file").await?;
        let data = node.property("data").expect("binary property");
        assert_eq!(data.values[0].to_storage_string(), "11");

        let err = store.get_binary_stream("/file/missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_value_extraction_stays_inside_its_property() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![StoreOperation::add(
                "/sparse",
                vec![
                    Property::multi("empty", PropertyType::String, vec![]),
                    Property::string("title", "x"),
                ],
            )])
            .await?;

        assert!(store.query(&property_equals("empty", "x")).await?.is_empty());
        assert_eq!(store.query(&property_equals("title", "x")).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_value_extraction_reads_inline_text() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;
        store
            .store_nodes(vec![StoreOperation::add("/inline", vec![])])
            .await?;

        let blob = codec::encode(&[
            Property::primary_type("nt:unstructured"),
            Property::string("note", "a & b"),
        ])?
        .blob
        .replace("<sv:value>a &amp; b</sv:value>", "a &amp; b");
        store
            .conn
            .execute(
                "UPDATE nodes SET props = ? WHERE path = ?",
                params![blob, "/inline"],
            )
            .await?;

        let rows = store.query(&property_equals("note", "a & b")).await?;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].path(), Some("/inline"));
        Ok(())
    }
}
