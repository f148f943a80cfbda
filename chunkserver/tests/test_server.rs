//! End-to-end calls over QUIC: client -> server -> pipelines.

use chunkserver::api::memory::MemoryMetaStore;
use chunkserver::api::metastore::MetaClient;
use chunkserver::client::NodeClient;
use chunkserver::server::{ServerState, make_server_endpoint, run};
use chunkserver::store::ChunkStore;
use chunkserver::store::local::LocalChunkStore;
use common::FileFragment;
use std::net::SocketAddr;
use std::sync::Arc;

const CAPACITY: usize = 64;
const MAX_FRAME: usize = 64 * 1024;

async fn start_node() -> (SocketAddr, Arc<MetaClient>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn ChunkStore> = Arc::new(LocalChunkStore::open(dir.path()).await.unwrap());
    let meta = Arc::new(MetaClient::new(
        Arc::new(MemoryMetaStore::new()),
        "/registry",
    ));

    let endpoint = make_server_endpoint("127.0.0.1:0".parse().unwrap())
        .await
        .unwrap();
    let addr = endpoint.local_addr().unwrap();
    let state = Arc::new(ServerState::new(
        meta.clone(),
        store,
        "worker-1",
        CAPACITY,
        MAX_FRAME,
    ));
    tokio::spawn(run(endpoint, state));
    (addr, meta, dir)
}

fn fragment(data: &[u8], name: &str) -> FileFragment {
    FileFragment {
        data: data.to_vec(),
        name: name.to_string(),
    }
}

#[tokio::test]
async fn create_read_remove_over_quic() {
    let (addr, _meta, _dir) = start_node().await;
    let client = NodeClient::connect(addr, MAX_FRAME).await.unwrap();

    let file = client
        .create_file(vec![
            fragment(b"hello ", "greet.txt"),
            fragment(b"world", "greet.txt"),
        ])
        .await
        .unwrap();
    assert_eq!(file.size, 11);
    assert_eq!(file.chunks.len(), 2);
    assert_eq!(file.file_name, "greet.txt");

    let fragments = client.read_file(&file.uuid).await.unwrap();
    let bytes: Vec<u8> = fragments.iter().flat_map(|f| f.data.clone()).collect();
    assert_eq!(bytes, b"hello world");
    assert!(fragments.iter().all(|f| f.name == "greet.txt"));

    let msg = client.remove_file(&file.uuid).await.unwrap();
    assert!(msg.starts_with("success"));

    let err = client.read_file(&file.uuid).await.unwrap_err();
    assert!(err.to_string().contains("not exist"));
}

#[tokio::test]
async fn empty_file_roundtrips_over_quic() {
    let (addr, _meta, _dir) = start_node().await;
    let client = NodeClient::connect(addr, MAX_FRAME).await.unwrap();

    let file = client.create_file(vec![]).await.unwrap();
    assert_eq!(file.size, 0);
    assert!(client.read_file(&file.uuid).await.unwrap().is_empty());
}

#[tokio::test]
async fn oversized_fragment_is_a_call_error() {
    let (addr, _meta, _dir) = start_node().await;
    let client = NodeClient::connect(addr, MAX_FRAME).await.unwrap();

    let err = client
        .create_file(vec![fragment(&vec![0u8; CAPACITY + 1], "big.bin")])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("failed to write"));
}

#[tokio::test]
async fn create_chunk_appends_only_to_existing_chunks() {
    let (addr, _meta, _dir) = start_node().await;
    let client = NodeClient::connect(addr, MAX_FRAME).await.unwrap();

    let file = client
        .create_file(vec![fragment(b"seed", "c.bin")])
        .await
        .unwrap();
    let chunk_uuid = &file.chunks[0].uuid;

    let msg = client
        .create_chunk(chunk_uuid, b"replica bytes".to_vec())
        .await
        .unwrap();
    assert_eq!(&msg, chunk_uuid);

    let err = client
        .create_chunk("never-written", b"x".to_vec())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not exist"));
}

#[tokio::test]
async fn remove_of_unknown_file_is_a_call_error() {
    let (addr, _meta, _dir) = start_node().await;
    let client = NodeClient::connect(addr, MAX_FRAME).await.unwrap();

    let err = client.remove_file("no-such-file").await.unwrap_err();
    assert!(err.to_string().contains("not exist"));
}
