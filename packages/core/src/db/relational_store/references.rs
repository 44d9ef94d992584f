//! Deferred reference synchronization and referrer lookup

use super::{integer, next_row, text, RelationalStore, SessionState};
use crate::codec::ReferenceKind;
use crate::db::error::StoreError;
use crate::models::path;
use libsql::params;

const EDGE_TABLES: [ReferenceKind; 2] = [ReferenceKind::Strong, ReferenceKind::Weak];

impl RelationalStore {
    /// Resolve buffered edges and enforce strong reference integrity
    ///
    /// Runs inside the open save, before commit. Consumes the pending state.
    ///
    /// 1. Touched sources that survived the save get their edges replaced by
    ///    the buffered ones. An unresolvable strong target fails the save; an
    ///    unresolvable weak target is dropped.
    /// 2. Edges from deleted sources are removed.
    /// 3. A strong edge left pointing at a deleted node fails the save; weak
    ///    edges into deleted nodes are removed.
    pub(super) async fn synchronize_references(
        &self,
        state: &mut SessionState,
    ) -> Result<(), StoreError> {
        let workspace = state.workspace()?;
        let pending = std::mem::take(&mut state.pending);

        for source in pending.touched.difference(&pending.deleted) {
            self.delete_source_edges(*source).await?;
        }

        for (source, edge) in &pending.edges {
            if pending.deleted.contains(source) {
                continue;
            }
            let target = self
                .find_row_by_identifier(&workspace, &edge.target_identifier)
                .await?;
            match (target, edge.kind) {
                (Some(target), kind) => {
                    self.execute(
                        format!("Failed to record reference {}", edge.property_name),
                        &format!(
                            "INSERT OR IGNORE INTO {} (source_id, source_property_name, target_id)
                             VALUES (?, ?, ?)",
                            kind.table()
                        ),
                        params![*source, edge.property_name.as_str(), target.id],
                    )
                    .await?;
                }
                (None, ReferenceKind::Strong) => {
                    tracing::warn!(
                        property = %edge.property_name,
                        target = %edge.target_identifier,
                        "Reference to missing node rejected"
                    );
                    return Err(StoreError::referential_integrity(format!(
                        "property '{}' references missing node {}",
                        edge.property_name, edge.target_identifier
                    )));
                }
                (None, ReferenceKind::Weak) => {
                    tracing::debug!(
                        property = %edge.property_name,
                        target = %edge.target_identifier,
                        "Dangling weak reference skipped"
                    );
                }
            }
        }

        for deleted in &pending.deleted {
            self.delete_source_edges(*deleted).await?;
        }

        for deleted in &pending.deleted {
            let mut rows = self
                .query_rows(
                    "Failed to check references into deleted nodes",
                    "SELECT source_id, source_property_name FROM nodes_references
                     WHERE target_id = ? LIMIT 1",
                    params![*deleted],
                )
                .await?;
            if let Some(row) = next_row(&mut rows, "reference check").await? {
                let source = integer(&row, 0, "reference source")?;
                let property = text(&row, 1, "reference property")?;
                tracing::warn!(source, property = %property, "Deletion of referenced node rejected");
                return Err(StoreError::referential_integrity(format!(
                    "deleted node is still referenced by property '{}' of node #{}",
                    property, source
                )));
            }

            self.execute(
                "Failed to drop weak references into deleted node",
                "DELETE FROM nodes_weakreferences WHERE target_id = ?",
                params![*deleted],
            )
            .await?;
        }

        Ok(())
    }

    async fn delete_source_edges(&self, source: i64) -> Result<(), StoreError> {
        for kind in EDGE_TABLES {
            self.execute(
                format!("Failed to clear {} of node #{}", kind.table(), source),
                &format!("DELETE FROM {} WHERE source_id = ?", kind.table()),
                params![source],
            )
            .await?;
        }
        Ok(())
    }

    /// Drop the stored edges of one property, strong and weak
    pub(super) async fn delete_property_edges(
        &self,
        source: i64,
        property_name: &str,
    ) -> Result<(), StoreError> {
        for kind in EDGE_TABLES {
            self.execute(
                format!("Failed to clear references of {}", property_name),
                &format!(
                    "DELETE FROM {} WHERE source_id = ? AND source_property_name = ?",
                    kind.table()
                ),
                params![source, property_name],
            )
            .await?;
        }
        Ok(())
    }

    /// Property paths of every edge of `kind` pointing at the node at `node_path`
    pub(super) async fn referrers(
        &self,
        workspace: &str,
        node_path: &str,
        name: Option<&str>,
        kind: ReferenceKind,
    ) -> Result<Vec<String>, StoreError> {
        let target = self.require_row(workspace, node_path).await?;

        let mut sql = format!(
            "SELECT n.path, r.source_property_name FROM {} r
             JOIN nodes n ON n.id = r.source_id
             WHERE r.target_id = ?",
            kind.table()
        );
        let mut rows = match name {
            Some(name) => {
                sql.push_str(" AND r.source_property_name = ? ORDER BY n.path");
                self.query_rows("Failed to list referrers", &sql, params![target.id, name])
                    .await?
            }
            None => {
                sql.push_str(" ORDER BY n.path, r.source_property_name");
                self.query_rows("Failed to list referrers", &sql, params![target.id])
                    .await?
            }
        };

        let mut referrers = Vec::new();
        while let Some(row) = next_row(&mut rows, node_path).await? {
            let source_path = text(&row, 0, "referrer path")?;
            let property = text(&row, 1, "referrer property")?;
            referrers.push(path::join(&source_path, &property));
        }
        Ok(referrers)
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::create_test_store;
    use crate::db::{ErrorKind, NodeStore};
    use crate::models::{Property, StoreOperation};
    use anyhow::Result;

    const TARGET_ID: &str = "7d1c2b8e-1111-4000-8000-000000000001";

    fn target(path: &str) -> StoreOperation {
        StoreOperation::add(
            path,
            vec![
                Property::mixin_types(&["mix:referenceable"]),
                Property::string("jcr:uuid", TARGET_ID),
            ],
        )
    }

    #[tokio::test]
    async fn test_referrer_and_referent_in_either_order() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store.prepare_save().await?;
        store
            .store_nodes(vec![
                StoreOperation::add("/referrer", vec![Property::reference("link", TARGET_ID)]),
                target("/target"),
            ])
            .await?;
        store.finish_save().await?;

        assert_eq!(
            store.get_references("/target", None).await?,
            vec!["/referrer/link".to_string()]
        );
        assert!(store.get_references("/target", Some("other")).await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_strong_target_fails_save() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store.prepare_save().await?;
        store
            .store_nodes(vec![StoreOperation::add(
                "/referrer",
                vec![Property::reference("link", TARGET_ID)],
            )])
            .await?;
        let err = store.finish_save().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferentialIntegrity);

        // the failed save was rolled back
        assert_eq!(
            store.get_node("/referrer").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );

        // weak references to missing nodes are accepted
        store
            .store_nodes(vec![StoreOperation::add(
                "/weak",
                vec![Property::weak_reference("link", TARGET_ID)],
            )])
            .await?;
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_referenced_node() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![
                target("/target"),
                StoreOperation::add("/referrer", vec![Property::reference("link", TARGET_ID)]),
                StoreOperation::add("/weak", vec![Property::weak_reference("link", TARGET_ID)]),
            ])
            .await?;

        let err = store.delete_node_immediately("/target").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ReferentialIntegrity);
        assert!(store.get_node("/target").await.is_ok());

        // deleting the referrer in the same batch is allowed
        store
            .delete_nodes(&["/target".to_string(), "/referrer".to_string()])
            .await?;
        assert_eq!(
            store.get_node("/target").await.unwrap_err().kind(),
            ErrorKind::NotFound
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_removing_reference_property_frees_target() -> Result<()> {
        let (store, _temp_dir) = create_test_store().await?;

        store
            .store_nodes(vec![
                target("/target"),
                StoreOperation::add("/referrer", vec![Property::reference("link", TARGET_ID)]),
            ])
            .await?;
        assert_eq!(store.get_weak_references("/target", None).await?.len(), 0);

        store.delete_property_immediately("/referrer/link").await?;
        assert!(store.get_references("/target", None).await?.is_empty());
        store.delete_node_immediately("/target").await?;
        Ok(())
    }
}
