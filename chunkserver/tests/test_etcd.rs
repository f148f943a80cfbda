//! Integration against a live etcd cluster.
//!
//! These need a reachable endpoint (default 127.0.0.1:2379, override with
//! TEST_ETCD_ENDPOINTS) and are ignored by default:
//! `cargo test --test test_etcd -- --ignored`

use chunkserver::api::metastore::{EtcdMetaStore, MetaClient, MetaEventKind};
use chunkserver::chunk::reader::ChunkReader;
use chunkserver::chunk::remover::FileRemover;
use chunkserver::chunk::writer::ChunkWriter;
use chunkserver::protocol::config::EtcdConfig;
use chunkserver::store::ChunkStore;
use chunkserver::store::local::LocalChunkStore;
use common::FileFragment;
use futures::stream;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const CAPACITY: usize = 64;

fn etcd_config() -> EtcdConfig {
    let endpoints = std::env::var("TEST_ETCD_ENDPOINTS")
        .unwrap_or_else(|_| "127.0.0.1:2379".to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();
    EtcdConfig {
        endpoints,
        prefix: format!("/chunkserver-test-{}", uuid::Uuid::new_v4()),
        username: None,
        password: None,
        connect_timeout_secs: 2,
    }
}

async fn connect(cfg: &EtcdConfig) -> Arc<MetaClient> {
    let store = EtcdMetaStore::connect(cfg).await.expect("connect etcd");
    Arc::new(MetaClient::new(Arc::new(store), &cfg.prefix))
}

#[tokio::test]
#[ignore]
#[serial]
async fn etcd_write_read_remove_roundtrip() {
    let cfg = etcd_config();
    let meta = connect(&cfg).await;
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ChunkStore> = Arc::new(LocalChunkStore::open(dir.path()).await.unwrap());

    let writer = ChunkWriter::new(meta.clone(), store.clone(), "worker-1", CAPACITY);
    let fragments = vec![
        FileFragment {
            data: b"hello ".to_vec(),
            name: "e.txt".to_string(),
        },
        FileFragment {
            data: b"etcd".to_vec(),
            name: "e.txt".to_string(),
        },
    ];
    let file = writer
        .write(stream::iter(fragments.into_iter().map(Ok)))
        .await
        .unwrap();
    assert_eq!(file.size, 10);

    let reader = ChunkReader::local(meta.clone(), store.clone());
    let (tx, mut rx) = mpsc::channel(16);
    reader.read(&file.uuid, tx).await.unwrap();
    let mut bytes = Vec::new();
    while let Some(fragment) = rx.recv().await {
        bytes.extend(fragment.data);
    }
    assert_eq!(bytes, b"hello etcd");

    let remover = FileRemover::new(meta.clone(), store);
    let report = remover.remove(&file.uuid).await.unwrap();
    assert!(report.clean());
    assert!(meta.file_entries(&file.uuid).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
#[serial]
async fn etcd_lease_expiry_drops_registration() {
    let cfg = etcd_config();
    let meta = connect(&cfg).await;

    let lease = meta.grant_lease(2).await.unwrap();
    meta.put_worker("worker-1", "127.0.0.1:50051", lease)
        .await
        .unwrap();
    assert!(meta.worker_addr("worker-1").await.unwrap().is_some());

    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(meta.worker_addr("worker-1").await.unwrap().is_none());
}

#[tokio::test]
#[ignore]
#[serial]
async fn etcd_watch_sees_chunk_changes() {
    let cfg = etcd_config();
    let store = EtcdMetaStore::connect(&cfg).await.expect("connect etcd");
    let meta = Arc::new(MetaClient::new(Arc::new(store), &cfg.prefix));

    let (_snapshot, rev) = meta.chunks_snapshot_with_rev().await.unwrap();
    let mut events = meta.watch_chunks(rev + 1).await.unwrap();

    let chunk = common::Chunk {
        uuid: "c-watch".to_string(),
        size: CAPACITY as i64,
        used: 3,
        replicas: vec!["worker-1".to_string()],
        file_uuid: "f-watch".to_string(),
    };
    meta.insert_chunk(&chunk).await.unwrap();

    let ev = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event within deadline")
        .expect("watch stream closed");
    assert_eq!(ev.kind, MetaEventKind::Put);
    assert_eq!(ev.key, meta.chunk_key("c-watch"));

    meta.delete_chunk("c-watch").await.unwrap();
    let ev = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("no event within deadline")
        .expect("watch stream closed");
    assert_eq!(ev.kind, MetaEventKind::Delete);
}
