//! Best-effort removal of a file, its chunks and their metadata.

use super::{ChunkError, fetch_file};
use crate::api::metastore::MetaClient;
use crate::store::ChunkStore;
use log::{info, warn};
use std::sync::Arc;

/// What a removal actually deleted. Individual failures are recorded
/// here, never fatal.
#[derive(Debug, Default)]
pub struct RemoveReport {
    pub file_uuid: String,
    pub chunks_total: usize,
    /// Chunk uuids whose byte payload survived.
    pub failed_payloads: Vec<String>,
    /// Chunk uuids whose metadata entry survived.
    pub failed_metadata: Vec<String>,
    pub file_meta_deleted: bool,
}

impl RemoveReport {
    pub fn clean(&self) -> bool {
        self.failed_payloads.is_empty() && self.failed_metadata.is_empty() && self.file_meta_deleted
    }

    pub fn failure_count(&self) -> usize {
        self.failed_payloads.len() + self.failed_metadata.len()
    }
}

pub struct FileRemover {
    meta: Arc<MetaClient>,
    store: Arc<dyn ChunkStore>,
}

impl FileRemover {
    pub fn new(meta: Arc<MetaClient>, store: Arc<dyn ChunkStore>) -> Self {
        Self { meta, store }
    }

    /// Deletes every chunk's payload and metadata independently, then the
    /// file's own metadata. Per-chunk failures are warnings and do not
    /// stop the sweep; the call succeeds once the file record itself was
    /// readable.
    pub async fn remove(&self, file_uuid: &str) -> Result<RemoveReport, ChunkError> {
        let file = fetch_file(&self.meta, file_uuid).await?;
        let mut report = RemoveReport {
            file_uuid: file.uuid.clone(),
            chunks_total: file.chunks.len(),
            ..Default::default()
        };

        for chunk in &file.chunks {
            if let Err(e) = self.store.remove(&chunk.uuid).await {
                warn!("failed to remove chunk {}: {e}", chunk.uuid);
                report.failed_payloads.push(chunk.uuid.clone());
            }
            if let Err(e) = self.meta.delete_chunk(&chunk.uuid).await {
                warn!("failed to delete metadata of chunk {}: {e}", chunk.uuid);
                report.failed_metadata.push(chunk.uuid.clone());
            }
        }

        match self.meta.delete_file(&file.uuid).await {
            Ok(()) => report.file_meta_deleted = true,
            Err(e) => warn!("failed to delete metadata of file {}: {e}", file.uuid),
        }

        info!("file {} removed", file.uuid);
        Ok(report)
    }
}
