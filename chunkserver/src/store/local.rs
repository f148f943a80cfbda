//! Chunk payloads as flat files under a configured directory.

use super::{ChunkStore, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::{fs, io::AsyncWriteExt};

pub struct LocalChunkStore {
    root: PathBuf,
}

impl LocalChunkStore {
    /// Creates the backing directory if needed.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn path_for(&self, chunk_uuid: &str) -> PathBuf {
        self.root.join(chunk_uuid)
    }
}

#[async_trait]
impl ChunkStore for LocalChunkStore {
    async fn write(&self, chunk_uuid: &str, data: &[u8]) -> Result<(), StoreError> {
        let mut f = fs::File::create(self.path_for(chunk_uuid)).await?;
        f.write_all(data).await?;
        f.flush().await?;
        Ok(())
    }

    async fn append(&self, chunk_uuid: &str, data: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(chunk_uuid);
        if !fs::try_exists(&path).await? {
            return Err(StoreError::NotFound(chunk_uuid.to_string()));
        }
        let mut f = fs::OpenOptions::new().append(true).open(path).await?;
        f.write_all(data).await?;
        f.flush().await?;
        Ok(())
    }

    async fn read(&self, chunk_uuid: &str) -> Result<Vec<u8>, StoreError> {
        match fs::read(self.path_for(chunk_uuid)).await {
            Ok(buf) => Ok(buf),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(chunk_uuid.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn remove(&self, chunk_uuid: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.path_for(chunk_uuid)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(chunk_uuid.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}
