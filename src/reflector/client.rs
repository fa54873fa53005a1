use std::io::Write;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, info};

use crate::peer::{blob_hash, write_message, RequestFramer};

use super::{
    BlobTransferResponse, Handshake, ReflectorError, SendBlobRequest, SendBlobResponse,
    BLOB_SIZE, PROTOCOL_VERSION,
};

/// How long to wait for each server reply.
pub const RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

/// Uploads blobs to a reflector [Server](super::Server).
#[derive(Debug, Default)]
pub struct Client {
    connection: Option<RequestFramer<TcpStream>>,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connect and exchange protocol versions, replacing any previous connection.
    pub fn connect<A: ToSocketAddrs>(&mut self, address: A) -> Result<(), ReflectorError> {
        self.connection = None;

        let stream = TcpStream::connect(address)?;
        stream.set_read_timeout(Some(RESPONSE_TIMEOUT))?;

        let mut connection = RequestFramer::new(stream);

        write_message(
            connection.get_ref(),
            &Handshake {
                version: PROTOCOL_VERSION,
            },
        )?;

        let handshake: Handshake = connection.next_message()?;
        if handshake.version != PROTOCOL_VERSION {
            return Err(ReflectorError::UnsupportedVersion(handshake.version));
        }

        self.connection = Some(connection);

        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn close(&mut self) {
        self.connection = None;
    }

    /// Upload a blob of exactly [BLOB_SIZE] bytes.
    ///
    /// Returns `false` if the server already had it.
    pub fn send_blob(&mut self, blob: &[u8]) -> Result<bool, ReflectorError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or(ReflectorError::NotConnected)?;

        if blob.is_empty() {
            return Err(ReflectorError::EmptyBlob);
        }

        if blob.len() != BLOB_SIZE {
            return Err(ReflectorError::WrongBlobSize(blob.len()));
        }

        let hash = blob_hash(blob);

        write_message(
            connection.get_ref(),
            &SendBlobRequest {
                blob_hash: hash.clone(),
                blob_size: blob.len(),
            },
        )?;

        let response: SendBlobResponse = connection.next_message()?;
        if !response.send_blob {
            debug!(blob = &hash[..8], "Server already has blob");

            return Ok(false);
        }

        connection.get_ref().write_all(blob)?;

        let transfer: BlobTransferResponse = connection.next_message()?;
        if !transfer.received_blob {
            return Err(ReflectorError::NotReceived);
        }

        info!(blob = &hash[..8], "Uploaded blob");

        Ok(true)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn not_connected() {
        let mut client = Client::new();

        assert!(!client.is_connected());
        assert!(matches!(
            client.send_blob(&[]),
            Err(ReflectorError::NotConnected)
        ));
    }

    #[test]
    fn connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);

        let mut client = Client::new();

        assert!(client.connect(address).is_err());
        assert!(!client.is_connected());
    }
}
