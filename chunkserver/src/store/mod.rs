//! Byte-payload storage for chunks, keyed by chunk identifier.

pub mod local;

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("chunk {0} not exist")]
    NotFound(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Persists the full (padded) payload of a chunk, replacing any
    /// previous content.
    async fn write(&self, chunk_uuid: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Appends to an existing chunk payload; fails if it was never written.
    async fn append(&self, chunk_uuid: &str, data: &[u8]) -> Result<(), StoreError>;

    /// Reads the full payload back.
    async fn read(&self, chunk_uuid: &str) -> Result<Vec<u8>, StoreError>;

    async fn remove(&self, chunk_uuid: &str) -> Result<(), StoreError>;
}
