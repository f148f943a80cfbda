//! Streaming ingest: one inbound fragment becomes one stored chunk.

use super::ChunkError;
use crate::api::metastore::MetaClient;
use crate::store::ChunkStore;
use chrono::Utc;
use common::{Chunk, File, FileFragment};
use futures::{Stream, StreamExt};
use log::{error, info};
use std::sync::Arc;
use uuid::Uuid;

pub struct ChunkWriter {
    meta: Arc<MetaClient>,
    store: Arc<dyn ChunkStore>,
    node_name: String,
    chunk_size: usize,
}

impl ChunkWriter {
    pub fn new(
        meta: Arc<MetaClient>,
        store: Arc<dyn ChunkStore>,
        node_name: &str,
        chunk_size: usize,
    ) -> Self {
        Self {
            meta,
            store,
            node_name: node_name.to_string(),
            chunk_size,
        }
    }

    /// Consumes the fragment stream and commits a File record.
    ///
    /// Each chunk's bytes land on disk before its metadata is committed,
    /// and every chunk's metadata lands before the file's; that order is
    /// what makes a committed file readable through the store. The
    /// fragment name is taken as the file's display name, last fragment
    /// wins.
    pub async fn write<S>(&self, mut fragments: S) -> Result<File, ChunkError>
    where
        S: Stream<Item = Result<FileFragment, anyhow::Error>> + Unpin,
    {
        let now = Utc::now().timestamp();
        let mut file = File {
            uuid: Uuid::new_v4().to_string(),
            file_name: String::new(),
            size: 0,
            replica_num: 1,
            created_at: now,
            updated_at: now,
            chunks: Vec::new(),
        };

        while let Some(next) = fragments.next().await {
            let FileFragment { data, name } = match next {
                Ok(fragment) => fragment,
                Err(e) => {
                    error!("failed to receive fragment: {e}");
                    return Err(ChunkError::Write(e));
                }
            };
            file.file_name = name;
            let used = data.len();

            let chunk = Chunk {
                uuid: Uuid::new_v4().to_string(),
                size: self.chunk_size as i64,
                used: used as i64,
                replicas: vec![self.node_name.clone()],
                file_uuid: file.uuid.clone(),
            };

            let Some(padded) = pad_to_capacity(data, self.chunk_size) else {
                error!(
                    "fragment of {used} bytes does not fit chunk {} of capacity {}",
                    chunk.uuid, self.chunk_size
                );
                return Err(ChunkError::Write(anyhow::anyhow!(
                    "fragment of {used} bytes exceeds chunk capacity {}",
                    self.chunk_size
                )));
            };
            if let Err(e) = self.store.write(&chunk.uuid, &padded).await {
                error!("failed to write data into chunk {}: {e}", chunk.uuid);
                return Err(ChunkError::Write(e.into()));
            }

            if let Err(e) = self.meta.insert_chunk(&chunk).await {
                error!("failed to sync metadata of chunk {}", chunk.uuid);
                return Err(ChunkError::MetaSync(e));
            }

            file.size += used as i64;
            file.chunks.push(chunk);
        }

        if let Err(e) = self.meta.insert_file(&file).await {
            error!("failed to sync metadata of file {}", file.uuid);
            return Err(ChunkError::MetaSync(e));
        }

        info!("file {} created", file.uuid);
        Ok(file)
    }
}

/// Zero-pads `data` to exactly `capacity`; `None` if it does not fit.
fn pad_to_capacity(mut data: Vec<u8>, capacity: usize) -> Option<Vec<u8>> {
    if data.len() > capacity {
        return None;
    }
    data.resize(capacity, 0);
    Some(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pads_short_payloads_with_zeros() {
        let padded = pad_to_capacity(vec![1, 2, 3], 8).unwrap();
        assert_eq!(padded, vec![1, 2, 3, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn exact_capacity_needs_no_padding() {
        let padded = pad_to_capacity(vec![9; 4], 4).unwrap();
        assert_eq!(padded, vec![9; 4]);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        assert!(pad_to_capacity(vec![0; 5], 4).is_none());
    }
}
