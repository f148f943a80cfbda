//! File and chunk definitions shared by the chunk server and its clients.

use serde::{Deserialize, Serialize};

/// One stored chunk of a file.
///
/// `size` is the declared capacity every chunk payload is padded to on
/// disk; `used` is how many of those bytes carry file data. `replicas`
/// lists the nodes holding a copy, in placement order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub uuid: String,
    pub size: i64,
    pub used: i64,
    pub replicas: Vec<String>,
    pub file_uuid: String,
}

/// A logical file: an ordered sequence of chunks.
///
/// The chunk order is the byte-offset order of the original stream and is
/// the only place that order is recorded. `size` is the sum of the chunks'
/// `used` bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub uuid: String,
    pub file_name: String,
    pub size: i64,
    pub replica_num: i32,
    pub created_at: i64,
    pub updated_at: i64,
    pub chunks: Vec<Chunk>,
}

/// One fragment of a file stream as carried on the wire. `name` is the
/// logical file name the sender attaches to each fragment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileFragment {
    pub data: Vec<u8>,
    pub name: String,
}
