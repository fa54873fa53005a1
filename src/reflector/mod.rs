//! Reflector, uploads of blobs to a receiving server for storage.
//!
//! After a version handshake the uploader offers each blob by hash and size.
//! The server either declines, if it already holds the blob, or accepts and
//! reads the raw blob bytes following the offer, then confirms whether it
//! stored them.

use serde::{Deserialize, Serialize};

use crate::peer::{BlobStoreError, PeerError, MAX_BLOB_SIZE};

mod client;
mod server;

pub use client::Client;
pub use server::Server;

/// Default TCP port of the reflector server.
pub const DEFAULT_PORT: u16 = 5566;
/// Size of every uploaded blob.
pub const BLOB_SIZE: usize = MAX_BLOB_SIZE;
pub const PROTOCOL_VERSION: u32 = 0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendBlobRequest {
    pub blob_hash: String,
    pub blob_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SendBlobResponse {
    pub send_blob: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobTransferResponse {
    pub received_blob: bool,
}

#[derive(thiserror::Error, Debug)]
pub enum ReflectorError {
    #[error("Not connected")]
    NotConnected,

    #[error("Blob is empty")]
    EmptyBlob,

    #[error("Wrong blob size: {0} bytes")]
    WrongBlobSize(usize),

    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u32),

    #[error("Server did not store the blob")]
    NotReceived,

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
}

impl From<std::io::Error> for ReflectorError {
    fn from(error: std::io::Error) -> Self {
        ReflectorError::Peer(error.into())
    }
}

impl From<serde_json::Error> for ReflectorError {
    fn from(error: serde_json::Error) -> Self {
        ReflectorError::Peer(error.into())
    }
}
