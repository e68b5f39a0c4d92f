//! Dead, silent and departed peers.

use std::time::{Duration, Instant};

use synckv::{SyncKv, SyncKvConfig};
use synckv_core::ExportLeaf;
use synckv_store::MemoryStore;
use synckv_sync::{
    limits, MemoryNetwork, MemoryTransport, Request, Response, RpcChannel, RpcErrorCode,
};
use synckv_testkit::{manual_config, node_id, wait_until, TestCluster, TestNode};

#[tokio::test]
async fn silent_member_does_not_block_reads_or_ticks() {
    let cluster = TestCluster::new(2, manual_config()).await.unwrap();
    // Joins the network but never serves requests.
    let _silent = cluster.network.create_transport(node_id(9)).await;

    let table = cluster.node(0).table("t").await.unwrap();
    let started = Instant::now();
    assert_eq!(table.get(b"missing").await.unwrap(), None);
    assert!(started.elapsed() < Duration::from_secs(5));

    let mut saw_no_answer = false;
    for _ in 0..6 {
        let report = cluster.node(0).reconcile_once().await;
        if report.peer == Some(node_id(9)) {
            assert!(report.no_answer);
            saw_no_answer = true;
        }
    }
    assert!(saw_no_answer);
}

#[tokio::test]
async fn departed_node_is_skipped() {
    let cluster = TestCluster::new(3, manual_config()).await.unwrap();
    cluster.disconnect(2).await;
    assert!(!cluster.network.is_member(&node_id(2)).await);

    let table = cluster.node(0).table("t").await.unwrap();
    table.put(b"k", &b"v"[..]).await.unwrap();

    let survivor = cluster.node(1);
    wait_until(Duration::from_secs(5), move || async move {
        match survivor.table("t").await {
            Ok(t) => t.get_local(b"k").await.ok().flatten().is_some(),
            Err(_) => false,
        }
    })
    .await
    .unwrap();

    for _ in 0..4 {
        let report = cluster.node(0).reconcile_once().await;
        assert_eq!(report.peer, Some(node_id(1)));
        assert!(!report.no_answer);
    }

    // The departed node still serves local reads.
    let departed = cluster.node(2).table("t").await.unwrap();
    assert_eq!(departed.get_local(b"k").await.unwrap(), None);
}

#[tokio::test]
async fn oversized_requests_are_rejected() {
    let cluster = TestCluster::new(2, manual_config()).await.unwrap();
    let intruder = cluster.network.create_transport(node_id(7)).await;

    let leaf = ExportLeaf {
        path: vec![0, 0, 0],
        hash: 0,
        key_count: 0,
    };
    let oversized = Request::GetPartialTable {
        table: "t".into(),
        leaves: vec![leaf; limits::MAX_LEAVES_PER_REQUEST + 1],
    };
    let response = intruder
        .call(&node_id(0), oversized, Duration::from_secs(2))
        .await;
    assert!(matches!(
        response,
        Some(Response::Error {
            code: RpcErrorCode::MessageTooLarge,
            ..
        })
    ));

    // The node keeps serving afterwards.
    let stats = intruder
        .call(&node_id(0), Request::GetStats, Duration::from_secs(2))
        .await;
    assert!(matches!(stats, Some(Response::Stats(_))));
}

/// One-row chunks over one-frame mailboxes, so a stream to a peer that stops
/// reading stalls after its first chunk.
async fn stalled_stream(rows: u8) -> (TestNode, MemoryTransport) {
    let network = MemoryNetwork::with_mailbox(1);
    let config: SyncKvConfig =
        manual_config().with_reconciler(manual_config().reconciler.with_chunk_size(1));
    let node = SyncKv::open(
        MemoryStore::new(),
        network.create_transport(node_id(0)).await,
        config,
    )
    .await
    .unwrap();

    let table = node.table("t").await.unwrap();
    for i in 0..rows {
        table.put(&[i], vec![i]).await.unwrap();
    }

    // Joins after the puts so none of them land in its mailbox.
    let reader = network.create_transport(node_id(1)).await;
    reader
        .send(&node_id(0), Request::GetFullTable { table: "t".into() })
        .await
        .unwrap();
    (node, reader)
}

async fn drain_chunks(reader: &MemoryTransport) -> (usize, bool) {
    let mut chunks = 0;
    let mut saw_last = false;
    let quiet = Duration::from_millis(300);
    while let Ok(Ok(incoming)) = tokio::time::timeout(quiet, reader.recv()).await {
        if let Request::BulkApply { last, .. } = incoming.request {
            chunks += 1;
            saw_last |= last;
        }
    }
    (chunks, saw_last)
}

#[tokio::test]
async fn stalled_stream_does_not_block_other_requests() {
    let (node, reader) = stalled_stream(10).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let timeout = node.config().reconciler.call_timeout;
    let stats = reader.call(&node_id(0), Request::GetStats, timeout).await;
    assert!(matches!(stats, Some(Response::Stats(ref tables)) if tables.contains_key("t")));

    let (chunks, saw_last) = drain_chunks(&reader).await;
    assert_eq!(chunks, 11);
    assert!(saw_last);
}

#[tokio::test]
async fn close_stops_table_streams() {
    let (node, reader) = stalled_stream(10).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    node.close().await.unwrap();

    let (chunks, saw_last) = drain_chunks(&reader).await;
    assert!(chunks < 10, "stream kept sending after close: {} chunks", chunks);
    assert!(!saw_last);
}
