//! Typed access to the coordination store.
//!
//! Key layout: `{prefix}/chunks/{chunkUUID}` and `{prefix}/files/{fileUUID}`
//! hold JSON metadata, `{prefix}/workers/{nodeName}` holds the node address
//! under a lease so it disappears when renewal stops.

use async_trait::async_trait;
use common::{Chunk, File};
use etcd_client::{Client, ConnectOptions, EventType, GetOptions, PutOptions, WatchOptions};
use futures::StreamExt;
use log::{error, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc};

use crate::protocol::config::EtcdConfig;

#[derive(Debug, thiserror::Error)]
pub enum MetaStoreError {
    #[error("lease {0} not found")]
    LeaseNotFound(i64),
    #[error(transparent)]
    Etcd(#[from] Box<etcd_client::Error>),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl From<etcd_client::Error> for MetaStoreError {
    fn from(e: etcd_client::Error) -> Self {
        MetaStoreError::Etcd(Box::new(e))
    }
}

/// A stored key/value pair.
#[derive(Debug, Clone, PartialEq)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaEventKind {
    Put,
    Delete,
}

/// One observed change under a watched prefix. Delete events carry an
/// empty value, as the store delivers them.
#[derive(Debug, Clone)]
pub struct MetaEvent {
    pub kind: MetaEventKind,
    pub key: String,
    pub value: String,
}

/// Atomic operations issued against the coordination store. Implemented
/// by [`EtcdMetaStore`] and by the in-memory store used in tests and
/// local development.
#[async_trait]
pub trait MetaStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<(), MetaStoreError>;

    /// Like [`MetaStore::put`], but the key vanishes when the lease does.
    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: i64,
    ) -> Result<(), MetaStoreError>;

    /// All entries stored under exactly `key`. A healthy store reports
    /// zero or one; callers check the count.
    async fn get(&self, key: &str) -> Result<Vec<KvPair>, MetaStoreError>;

    /// Entries under `prefix` plus the store revision of the read.
    async fn get_prefix(&self, prefix: &str) -> Result<(Vec<KvPair>, i64), MetaStoreError>;

    async fn delete(&self, key: &str) -> Result<(), MetaStoreError>;

    /// Grants a lease with the given TTL in seconds, returning its id.
    async fn grant_lease(&self, ttl_secs: i64) -> Result<i64, MetaStoreError>;

    /// Streams changes under `prefix` starting at `start_rev`. The stream
    /// ends when the underlying subscription does; it is not restarted.
    async fn watch_prefix(
        &self,
        prefix: &str,
        start_rev: i64,
    ) -> Result<mpsc::Receiver<MetaEvent>, MetaStoreError>;
}

pub struct EtcdMetaStore {
    client: Arc<RwLock<Client>>,
}

impl EtcdMetaStore {
    pub async fn connect(cfg: &EtcdConfig) -> Result<Self, MetaStoreError> {
        let mut opts = ConnectOptions::default()
            .with_connect_timeout(Duration::from_secs(cfg.connect_timeout_secs));
        if let (Some(user), Some(pass)) = (&cfg.username, &cfg.password) {
            opts = opts.with_user(user.clone(), pass.clone());
        }
        let client = Client::connect(cfg.endpoints.clone(), Some(opts)).await?;
        Ok(Self {
            client: Arc::new(RwLock::new(client)),
        })
    }
}

#[async_trait]
impl MetaStore for EtcdMetaStore {
    async fn put(&self, key: &str, value: &str) -> Result<(), MetaStoreError> {
        let mut client = self.client.write().await;
        client.put(key, value, Some(PutOptions::new())).await?;
        Ok(())
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: &str,
        lease: i64,
    ) -> Result<(), MetaStoreError> {
        let mut client = self.client.write().await;
        client
            .put(key, value, Some(PutOptions::new().with_lease(lease)))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<KvPair>, MetaStoreError> {
        let mut client = self.client.write().await;
        let resp = client.get(key, None).await?;
        Ok(resp
            .kvs()
            .iter()
            .map(|kv| KvPair {
                key: String::from_utf8_lossy(kv.key()).to_string(),
                value: String::from_utf8_lossy(kv.value()).to_string(),
            })
            .collect())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<(Vec<KvPair>, i64), MetaStoreError> {
        let mut client = self.client.write().await;
        let resp = client
            .get(prefix, Some(GetOptions::new().with_prefix()))
            .await?;
        let rev = resp.header().map(|h| h.revision()).unwrap_or(0);
        let items = resp
            .kvs()
            .iter()
            .map(|kv| KvPair {
                key: String::from_utf8_lossy(kv.key()).to_string(),
                value: String::from_utf8_lossy(kv.value()).to_string(),
            })
            .collect();
        Ok((items, rev))
    }

    async fn delete(&self, key: &str) -> Result<(), MetaStoreError> {
        let mut client = self.client.write().await;
        client.delete(key, None).await?;
        Ok(())
    }

    async fn grant_lease(&self, ttl_secs: i64) -> Result<i64, MetaStoreError> {
        let resp = self
            .client
            .write()
            .await
            .lease_client()
            .grant(ttl_secs, None)
            .await?;
        Ok(resp.id())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
        start_rev: i64,
    ) -> Result<mpsc::Receiver<MetaEvent>, MetaStoreError> {
        let opts = WatchOptions::new()
            .with_prefix()
            .with_start_revision(start_rev);
        let (watcher, mut stream) = {
            let mut client = self.client.write().await;
            client.watch(prefix, Some(opts)).await?
        };

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            // the watcher handle must outlive the stream or etcd cancels it
            let _watcher = watcher;
            while let Some(resp) = stream.next().await {
                let resp = match resp {
                    Ok(resp) => resp,
                    Err(e) => {
                        error!("etcd watch stream error: {e}");
                        break;
                    }
                };
                if resp.canceled() {
                    warn!("etcd watch channel canceled");
                    break;
                }
                for ev in resp.events() {
                    let Some(kv) = ev.kv() else { continue };
                    let event = MetaEvent {
                        kind: match ev.event_type() {
                            EventType::Put => MetaEventKind::Put,
                            EventType::Delete => MetaEventKind::Delete,
                        },
                        key: String::from_utf8_lossy(kv.key()).to_string(),
                        value: String::from_utf8_lossy(kv.value()).to_string(),
                    };
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        });
        Ok(rx)
    }
}

/// Typed wrapper owning the metadata key layout.
pub struct MetaClient {
    store: Arc<dyn MetaStore>,
    prefix: String,
}

impl MetaClient {
    pub fn new(store: Arc<dyn MetaStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.trim_end_matches('/').to_string(),
        }
    }

    pub fn chunk_key(&self, uuid: &str) -> String {
        format!("{}/chunks/{uuid}", self.prefix)
    }

    pub fn file_key(&self, uuid: &str) -> String {
        format!("{}/files/{uuid}", self.prefix)
    }

    pub fn worker_key(&self, name: &str) -> String {
        format!("{}/workers/{name}", self.prefix)
    }

    pub fn chunk_prefix(&self) -> String {
        format!("{}/chunks/", self.prefix)
    }

    pub async fn insert_chunk(&self, chunk: &Chunk) -> Result<(), MetaStoreError> {
        let value = serde_json::to_string(chunk)?;
        self.store.put(&self.chunk_key(&chunk.uuid), &value).await
    }

    pub async fn insert_file(&self, file: &File) -> Result<(), MetaStoreError> {
        let value = serde_json::to_string(file)?;
        self.store.put(&self.file_key(&file.uuid), &value).await
    }

    /// Raw entries stored under the file key; callers check the count.
    pub async fn file_entries(&self, uuid: &str) -> Result<Vec<KvPair>, MetaStoreError> {
        self.store.get(&self.file_key(uuid)).await
    }

    pub async fn delete_chunk(&self, uuid: &str) -> Result<(), MetaStoreError> {
        self.store.delete(&self.chunk_key(uuid)).await
    }

    pub async fn delete_file(&self, uuid: &str) -> Result<(), MetaStoreError> {
        self.store.delete(&self.file_key(uuid)).await
    }

    pub async fn grant_lease(&self, ttl_secs: i64) -> Result<i64, MetaStoreError> {
        self.store.grant_lease(ttl_secs).await
    }

    /// Publishes this node's address bound to `lease`.
    pub async fn put_worker(
        &self,
        name: &str,
        addr: &str,
        lease: i64,
    ) -> Result<(), MetaStoreError> {
        self.store
            .put_with_lease(&self.worker_key(name), addr, lease)
            .await
    }

    pub async fn worker_addr(&self, name: &str) -> Result<Option<String>, MetaStoreError> {
        let mut entries = self.store.get(&self.worker_key(name)).await?;
        Ok(entries.pop().map(|kv| kv.value))
    }

    /// Snapshot of all chunk metadata plus the revision of the read.
    pub async fn chunks_snapshot_with_rev(&self) -> Result<(Vec<KvPair>, i64), MetaStoreError> {
        self.store.get_prefix(&self.chunk_prefix()).await
    }

    pub async fn watch_chunks(
        &self,
        start_rev: i64,
    ) -> Result<mpsc::Receiver<MetaEvent>, MetaStoreError> {
        self.store.watch_prefix(&self.chunk_prefix(), start_rev).await
    }
}
