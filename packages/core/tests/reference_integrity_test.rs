//! Integration tests for reference tracking
//!
//! Strong references must always resolve at the end of a save; weak
//! references are tracked when their target exists and dropped when it goes.

use anyhow::Result;
use arbor_core::db::{ErrorKind, NodeStore, RelationalStore};
use arbor_core::{Credentials, Property, StoreOperation};
use tempfile::TempDir;

const ARTICLE_ID: &str = "3f2a9c51-0000-4000-8000-0000000000a1";
const AUTHOR_ID: &str = "3f2a9c51-0000-4000-8000-0000000000b2";

async fn create_store() -> Result<(RelationalStore, TempDir)> {
    let temp_dir = TempDir::new()?;
    let store = RelationalStore::open(temp_dir.path().join("refs.db")).await?;
    store.login(Credentials::new("tester"), "default").await?;
    Ok((store, temp_dir))
}

fn referenceable(path: &str, identifier: &str) -> StoreOperation {
    StoreOperation::add(
        path,
        vec![
            Property::mixin_types(&["mix:referenceable"]),
            Property::string("jcr:uuid", identifier),
        ],
    )
}

#[tokio::test]
async fn test_strong_and_weak_referrers_are_listed() -> Result<()> {
    let (store, _temp_dir) = create_store().await?;

    store
        .store_nodes(vec![
            referenceable("/author", AUTHOR_ID),
            referenceable("/article", ARTICLE_ID),
            StoreOperation::add(
                "/index",
                vec![
                    Property::reference("author", AUTHOR_ID),
                    Property::weak_reference("featured", ARTICLE_ID),
                ],
            ),
            StoreOperation::add("/article/byline", vec![Property::reference("author", AUTHOR_ID)]),
        ])
        .await?;

    assert_eq!(
        store.get_references("/author", None).await?,
        vec!["/article/byline/author".to_string(), "/index/author".to_string()]
    );
    assert_eq!(
        store.get_weak_references("/article", None).await?,
        vec!["/index/featured".to_string()]
    );
    assert!(store.get_references("/article", None).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_updating_a_reference_moves_the_edge() -> Result<()> {
    let (store, _temp_dir) = create_store().await?;

    store
        .store_nodes(vec![
            referenceable("/author", AUTHOR_ID),
            referenceable("/article", ARTICLE_ID),
            StoreOperation::add("/pointer", vec![Property::reference("target", AUTHOR_ID)]),
        ])
        .await?;

    store
        .store_nodes(vec![StoreOperation::update(
            "/pointer",
            vec![Property::reference("target", ARTICLE_ID)],
        )])
        .await?;

    assert!(store.get_references("/author", None).await?.is_empty());
    assert_eq!(
        store.get_references("/article", Some("target")).await?,
        vec!["/pointer/target".to_string()]
    );

    // the author is free to go now
    store.delete_node_immediately("/author").await?;
    Ok(())
}

#[tokio::test]
async fn test_deleting_a_referenced_subtree_is_rejected() -> Result<()> {
    let (store, _temp_dir) = create_store().await?;

    store
        .store_nodes(vec![
            StoreOperation::add("/people", vec![]),
            referenceable("/people/author", AUTHOR_ID),
            StoreOperation::add("/post", vec![Property::reference("author", AUTHOR_ID)]),
        ])
        .await?;

    let err = store.delete_node_immediately("/people").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ReferentialIntegrity);
    assert!(store.get_node("/people/author").await.is_ok());

    // a reference from inside the deleted subtree does not block it
    store
        .store_nodes(vec![
            StoreOperation::add("/team", vec![]),
            referenceable("/team/lead", ARTICLE_ID),
            StoreOperation::add("/team/roster", vec![Property::reference("lead", ARTICLE_ID)]),
        ])
        .await?;
    store.delete_node_immediately("/team").await?;
    Ok(())
}

#[tokio::test]
async fn test_weak_edges_are_dropped_with_their_target() -> Result<()> {
    let (store, _temp_dir) = create_store().await?;

    store
        .store_nodes(vec![
            referenceable("/article", ARTICLE_ID),
            StoreOperation::add("/feed", vec![Property::weak_reference("top", ARTICLE_ID)]),
        ])
        .await?;
    store.delete_node_immediately("/article").await?;

    // recreating the target does not resurrect the edge
    store
        .store_nodes(vec![referenceable("/article", ARTICLE_ID)])
        .await?;
    assert!(store.get_weak_references("/article", None).await?.is_empty());

    // the stored value is kept as written
    let feed = store.get_node("/feed").await?;
    assert_eq!(
        feed.property("top").and_then(|p| p.first_str()),
        Some(ARTICLE_ID)
    );
    Ok(())
}

#[tokio::test]
async fn test_moved_target_keeps_its_referrers() -> Result<()> {
    let (store, _temp_dir) = create_store().await?;

    store
        .store_nodes(vec![
            referenceable("/author", AUTHOR_ID),
            StoreOperation::add("/post", vec![Property::reference("author", AUTHOR_ID)]),
        ])
        .await?;
    store.move_node_immediately("/author", "/writer").await?;
    store.move_node_immediately("/post", "/entry").await?;

    assert_eq!(
        store.get_references("/writer", None).await?,
        vec!["/entry/author".to_string()]
    );
    let entry = store.get_node("/entry").await?;
    let target = entry.property("author").and_then(|p| p.first_str()).unwrap();
    assert_eq!(store.get_node_path_for_identifier(target).await?, "/writer");
    Ok(())
}

#[tokio::test]
async fn test_strong_reference_resolved_within_transaction() -> Result<()> {
    let (store, _temp_dir) = create_store().await?;

    store.begin_transaction().await?;
    store
        .store_nodes(vec![referenceable("/author", AUTHOR_ID)])
        .await?;
    store
        .store_nodes(vec![StoreOperation::add(
            "/post",
            vec![Property::reference("author", AUTHOR_ID)],
        )])
        .await?;
    store.commit_transaction().await?;

    assert_eq!(store.get_references("/author", None).await?.len(), 1);
    Ok(())
}
