//! Blob exchange between peers over TCP.
//!
//! Requests are JSON objects sent back to back on the same connection, with no
//! length prefix or delimiter. The server answers each one in order, blob
//! responses are followed by the raw blob bytes.

use std::io::Write;

use serde::Serialize;

mod blob_store;
mod client;
mod framer;
mod request;
mod server;

pub use blob_store::{BlobStore, BlobStoreError, MemoryBlobStore};
pub use client::Client;
pub use framer::RequestFramer;
pub use request::{
    blob_hash, AvailabilityRequest, AvailabilityResponse, BlobRequest, BlobResponse, IncomingBlob,
    PaymentRateRequest, PaymentRateResponse, PeerRequest, RATE_ACCEPTED, RATE_TOO_LOW,
};
pub use server::Server;

/// Default TCP port of the blob exchange server.
pub const DEFAULT_PORT: u16 = 3333;
/// Wallet address returned in availability responses.
pub const LBRYCRD_ADDRESS: &str = "bJxKvpD96kaJLriqVajZ7SaQTsWWyrGQct";
/// Requests larger than this are rejected and the connection is closed.
pub const MAX_REQUEST_SIZE: usize = 64 * 1024;
/// Largest blob exchanged between peers.
pub const MAX_BLOB_SIZE: usize = 2 * 1024 * 1024;

#[derive(thiserror::Error, Debug)]
/// Peer protocol errors, each one closes the connection.
pub enum PeerError {
    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Request too large: {0} bytes")]
    RequestTooLarge(usize),

    #[error("Connection closed in the middle of a request")]
    Truncated,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Blob too large: {0} bytes")]
    BlobTooLarge(usize),

    #[error("Unknown request")]
    UnknownRequest,

    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
}

/// Encode a message as JSON and write it in one go.
pub(crate) fn write_message<W: Write, T: Serialize>(
    mut writer: W,
    message: &T,
) -> Result<(), PeerError> {
    writer.write_all(&serde_json::to_vec(message)?)?;

    Ok(())
}
