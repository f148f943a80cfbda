//! Ordered read-back: one emitted fragment per stored chunk.

use super::{ChunkError, fetch_file};
use crate::api::metastore::MetaClient;
use crate::store::{ChunkStore, StoreError};
use async_trait::async_trait;
use common::{Chunk, FileFragment};
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Picks a replica and fetches a chunk's payload from it.
///
/// Only the local-copy variant exists; chunks are served from this node's
/// storage whatever the recorded replica list says.
#[async_trait]
pub trait ReplicaRead: Send + Sync {
    async fn fetch(&self, chunk: &Chunk) -> Result<Vec<u8>, ChunkError>;
}

pub struct LocalReplica {
    store: Arc<dyn ChunkStore>,
}

impl LocalReplica {
    pub fn new(store: Arc<dyn ChunkStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ReplicaRead for LocalReplica {
    async fn fetch(&self, chunk: &Chunk) -> Result<Vec<u8>, ChunkError> {
        match self.store.read(&chunk.uuid).await {
            Ok(payload) => Ok(payload),
            Err(StoreError::NotFound(_)) => Err(ChunkError::NotFound),
            Err(e) => Err(ChunkError::Other(e.into())),
        }
    }
}

pub struct ChunkReader {
    meta: Arc<MetaClient>,
    replicas: Arc<dyn ReplicaRead>,
}

impl ChunkReader {
    pub fn new(meta: Arc<MetaClient>, replicas: Arc<dyn ReplicaRead>) -> Self {
        Self { meta, replicas }
    }

    /// The only shipped strategy: read every chunk locally.
    pub fn local(meta: Arc<MetaClient>, store: Arc<dyn ChunkStore>) -> Self {
        Self::new(meta, Arc::new(LocalReplica::new(store)))
    }

    /// Streams the file's content into `out`: one fragment per chunk, in
    /// the recorded chunk order, zero padding stripped.
    pub async fn read(
        &self,
        file_uuid: &str,
        out: mpsc::Sender<FileFragment>,
    ) -> Result<(), ChunkError> {
        let file = fetch_file(&self.meta, file_uuid).await?;

        for (i, chunk) in file.chunks.iter().enumerate() {
            let payload = match self.replicas.fetch(chunk).await {
                Ok(payload) => payload,
                Err(e) => {
                    error!("failed to read {i}th chunk {} of file {file_uuid}: {e}", chunk.uuid);
                    return Err(e);
                }
            };
            let used = (chunk.used as usize).min(payload.len());
            let fragment = FileFragment {
                data: payload[..used].to_vec(),
                name: file.file_name.clone(),
            };
            if out.send(fragment).await.is_err() {
                warn!("reader of file {file_uuid} went away");
                return Ok(());
            }
        }

        info!("file {file_uuid} read");
        Ok(())
    }
}
