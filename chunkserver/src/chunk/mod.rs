//! File write/read/remove pipelines over local storage and the
//! coordination store.

pub mod reader;
pub mod remover;
pub mod writer;

use crate::api::metastore::{MetaClient, MetaStoreError};
use common::File;
use log::error;

#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    /// Stream receive or local byte persistence failed. Fatal to the
    /// call; nothing already written is rolled back.
    #[error("failed to write file or chunk: {0}")]
    Write(anyhow::Error),
    /// Coordination-store commit failed. Fatal to the call; prior chunk
    /// commits stay behind as orphans.
    #[error("failed to sync metadata of file or chunk")]
    MetaSync(#[source] MetaStoreError),
    /// Coordination-store read failed or returned undecodable metadata.
    #[error("failed to get file or chunk")]
    Lookup(#[source] MetaStoreError),
    #[error("file or chunk not exist")]
    NotFound,
    /// More than one metadata entry where a unique one was expected.
    #[error("bad metadata of {key}: {count} entries")]
    Consistency { key: String, count: usize },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Loads the unique File record for `uuid`.
pub(crate) async fn fetch_file(meta: &MetaClient, uuid: &str) -> Result<File, ChunkError> {
    let entries = meta.file_entries(uuid).await.map_err(ChunkError::Lookup)?;
    match entries.len() {
        0 => Err(ChunkError::NotFound),
        1 => serde_json::from_str(&entries[0].value)
            .map_err(|e| ChunkError::Lookup(MetaStoreError::Json(e))),
        count => {
            error!("bad metadata of file {uuid}: {count} entries");
            Err(ChunkError::Consistency {
                key: meta.file_key(uuid),
                count,
            })
        }
    }
}
