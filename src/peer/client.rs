//! Downloads blobs from a peer [Server](super::Server).

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use super::{
    blob_hash, write_message, AvailabilityRequest, AvailabilityResponse, BlobRequest,
    BlobResponse, BlobStoreError, PaymentRateRequest, PaymentRateResponse, PeerError,
    RequestFramer, MAX_BLOB_SIZE, RATE_ACCEPTED,
};

/// How long to wait for each response.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// A connection to a single peer, requests are answered in order.
#[derive(Debug)]
pub struct Client {
    connection: RequestFramer<TcpStream>,
}

impl Client {
    pub fn connect<A: ToSocketAddrs>(address: A) -> Result<Self, PeerError> {
        let stream = TcpStream::connect(address)?;
        stream.set_read_timeout(Some(RESPONSE_TIMEOUT))?;

        Ok(Self {
            connection: RequestFramer::new(stream),
        })
    }

    /// Which of `hashes` the peer holds.
    pub fn available_blobs(&mut self, hashes: &[String]) -> Result<Vec<String>, PeerError> {
        write_message(
            self.connection.get_ref(),
            &AvailabilityRequest {
                requested_blobs: hashes.to_vec(),
            },
        )?;

        let response: AvailabilityResponse = self.connection.next_message()?;

        Ok(response.available_blobs)
    }

    /// Offer a payment rate, returns `true` if the peer accepted it.
    pub fn negotiate_rate(&mut self, rate: f64) -> Result<bool, PeerError> {
        write_message(
            self.connection.get_ref(),
            &PaymentRateRequest {
                blob_data_payment_rate: rate,
            },
        )?;

        let response: PaymentRateResponse = self.connection.next_message()?;

        Ok(response.blob_data_payment_rate == RATE_ACCEPTED)
    }

    /// Download a blob and check it against its hash.
    ///
    /// Peers close the connection if they don't have the blob, this client
    /// can't be used after that.
    pub fn get_blob(&mut self, hash: &str) -> Result<Bytes, PeerError> {
        write_message(
            self.connection.get_ref(),
            &BlobRequest {
                requested_blob: hash.to_string(),
            },
        )?;

        let header: BlobResponse = self.connection.next_message()?;
        let length = header.incoming_blob.length;

        if length > MAX_BLOB_SIZE {
            return Err(PeerError::BlobTooLarge(length));
        }

        let blob = self.connection.read_bytes(length)?;

        let actual = blob_hash(&blob);
        if actual != hash {
            return Err(BlobStoreError::HashMismatch {
                expected: hash.to_string(),
                actual,
            }
            .into());
        }

        debug!(blob = hash.get(..8).unwrap_or(hash), length, "Downloaded blob");

        Ok(blob.into())
    }
}
