//! Reopening nodes over on-disk storage.

use synckv::{SyncKv, SyncKvError};
use synckv_store::SqliteStore;
use synckv_sync::MemoryNetwork;
use synckv_testkit::{manual_config, node_id};

#[tokio::test]
async fn reopen_restores_tables_and_trees() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("node.db");

    let (stats, root) = {
        let network = MemoryNetwork::new();
        let transport = network.create_transport(node_id(0)).await;
        let node = SyncKv::open(SqliteStore::open(&path).unwrap(), transport, manual_config())
            .await
            .unwrap();

        let users = node.table("users").await.unwrap();
        for i in 0..200u32 {
            users.put(&i.to_be_bytes(), format!("user-{}", i).into_bytes()).await.unwrap();
        }
        users.put(&7u32.to_be_bytes(), &b"renamed"[..]).await.unwrap();
        node.table("empty").await.unwrap();

        let stats = node.table_stats().await.unwrap();
        let root = users.root_hash().await;
        node.close().await.unwrap();
        (stats, root)
    };

    let network = MemoryNetwork::new();
    let transport = network.create_transport(node_id(0)).await;
    let node = SyncKv::open(SqliteStore::open(&path).unwrap(), transport, manual_config())
        .await
        .unwrap();

    assert_eq!(node.table_names().await, vec!["empty".to_string(), "users".to_string()]);
    assert_eq!(node.table_stats().await.unwrap(), stats);

    let users = node.table("users").await.unwrap();
    assert_eq!(users.root_hash().await, root);
    assert_eq!(users.count().await.unwrap(), 200);
    assert_eq!(users.raw_row_count().await.unwrap(), 201);
    assert_eq!(
        users.get(&7u32.to_be_bytes()).await.unwrap().as_deref(),
        Some(&b"renamed"[..])
    );

    node.collect_once().await.unwrap();
    assert_eq!(users.raw_row_count().await.unwrap(), 200);
}

#[tokio::test]
async fn closed_node_refuses_new_work() {
    let network = MemoryNetwork::new();
    let transport = network.create_transport(node_id(0)).await;
    let node = SyncKv::open(SqliteStore::open_memory().unwrap(), transport, manual_config())
        .await
        .unwrap();

    node.close().await.unwrap();
    node.close().await.unwrap();
    assert!(matches!(node.table("t").await, Err(SyncKvError::Closed)));
    assert!(matches!(node.collect_once().await, Err(SyncKvError::Closed)));
}

#[test]
fn open_fails_on_unusable_path() {
    let dir = tempfile::tempdir().unwrap();
    // A directory cannot be opened as a database file.
    assert!(SqliteStore::open(dir.path()).is_err());
}
