//! Wire messages and framing.
//!
//! Every call is carried on one bidirectional QUIC stream. The first frame
//! is a [`NodeMessage`]; a file upload follows it with one
//! [`common::FileFragment`] frame per fragment and ends the stream, a file
//! download is answered with a [`NodeResponse`] frame and then one fragment
//! frame per chunk. Frames are bincode payloads behind a u32-LE length
//! prefix, capped by the configured max message size.

pub mod config;

use common::File;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum NodeMessage {
    /// Announces a file upload; fragment frames follow on the same stream.
    CreateFile,
    /// Requests a file's content by its identifier.
    ReadFile(String),
    /// Requests removal of a file and its chunks.
    RemoveFile(String),
    /// Appends raw bytes to an already existing local chunk payload.
    CreateChunk { chunk_uuid: String, data: Vec<u8> },
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub enum NodeResponse {
    Ack(String),
    FileCreated(Box<File>),
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame of {len} bytes exceeds limit {limit}")]
    TooLarge { len: usize, limit: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encoding(#[from] bincode::Error),
}

/// Writes one length-prefixed bincode frame.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = bincode::serialize(msg)?;
    writer.write_u32_le(data.len() as u32).await?;
    writer.write_all(&data).await?;
    Ok(())
}

/// Reads one frame. `Ok(None)` means the peer finished the stream cleanly
/// before a new frame started.
pub async fn read_frame<R, T>(reader: &mut R, limit: usize) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let len = match reader.read_u32_le().await {
        Ok(n) => n as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if len > limit {
        return Err(FrameError::TooLarge { len, limit });
    }
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf).await?;
    Ok(Some(bincode::deserialize(&buf)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::FileFragment;

    #[tokio::test]
    async fn frame_roundtrip() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        write_frame(&mut a, &NodeMessage::ReadFile("f-1".into()))
            .await
            .unwrap();
        let fragment = FileFragment {
            data: vec![1, 2, 3],
            name: "a.txt".into(),
        };
        write_frame(&mut a, &fragment).await.unwrap();
        drop(a);

        let msg: NodeMessage = read_frame(&mut b, 4096).await.unwrap().unwrap();
        assert!(matches!(msg, NodeMessage::ReadFile(uuid) if uuid == "f-1"));
        let got: FileFragment = read_frame(&mut b, 4096).await.unwrap().unwrap();
        assert_eq!(got, fragment);
        let end: Option<FileFragment> = read_frame(&mut b, 4096).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = tokio::io::duplex(4096);
        let fragment = FileFragment {
            data: vec![0u8; 256],
            name: String::new(),
        };
        write_frame(&mut a, &fragment).await.unwrap();

        let err = read_frame::<_, FileFragment>(&mut b, 64).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { .. }));
    }
}
