use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, info, warn};

use crate::peer::{write_message, BlobStore, BlobStoreError, PeerError, RequestFramer};

use super::{
    BlobTransferResponse, Handshake, ReflectorError, SendBlobRequest, SendBlobResponse,
    BLOB_SIZE, PROTOCOL_VERSION,
};

/// How long to wait for the next message on an idle connection.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Receives uploaded blobs into a [BlobStore].
#[derive(Clone)]
pub struct Server {
    store: Arc<dyn BlobStore>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server").finish_non_exhaustive()
    }
}

impl Server {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Bind to `address` and serve connections until accepting fails fatally.
    pub fn listen<A: ToSocketAddrs>(&self, address: A) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(address)?;

        info!(local_addr = ?listener.local_addr()?, "Reflector server listening");

        self.serve(listener)
    }

    /// Serve connections from an already bound listener, one thread each.
    pub fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();

                    let spawned = thread::Builder::new()
                        .name("reflector-upload".to_string())
                        .spawn(move || server.handle_connection(stream));

                    if let Err(error) = spawned {
                        error!(?error, "Failed to spawn connection thread");
                    }
                }
                Err(error) => error!(?error, "Failed to accept connection"),
            }
        }

        Ok(())
    }

    /// Receive blobs on a connection until it closes or misbehaves.
    pub fn handle_connection(&self, stream: TcpStream) {
        let peer = stream.peer_addr().ok();

        match self.serve_connection(stream) {
            Ok(()) => debug!(?peer, "Upload connection closed"),
            Err(ReflectorError::Peer(PeerError::ConnectionClosed)) => {
                debug!(?peer, "Connection closed before the handshake")
            }
            Err(error) => warn!(?peer, %error, "Closing upload connection"),
        }
    }

    fn serve_connection(&self, stream: TcpStream) -> Result<(), ReflectorError> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let writer = stream.try_clone()?;
        let mut connection = RequestFramer::new(stream);

        let handshake: Handshake = connection.next_message()?;
        if handshake.version != PROTOCOL_VERSION {
            return Err(ReflectorError::UnsupportedVersion(handshake.version));
        }

        write_message(&writer, &handshake)?;

        while let Some(bytes) = connection.next_request()? {
            let request: SendBlobRequest = serde_json::from_slice(&bytes)?;

            self.receive_blob(&mut connection, &writer, request)?;
        }

        Ok(())
    }

    fn receive_blob(
        &self,
        connection: &mut RequestFramer<TcpStream>,
        writer: &TcpStream,
        request: SendBlobRequest,
    ) -> Result<(), ReflectorError> {
        let SendBlobRequest {
            blob_hash,
            blob_size,
        } = request;

        if blob_size == 0 || blob_size > BLOB_SIZE {
            return Err(ReflectorError::WrongBlobSize(blob_size));
        }

        if self.store.has(&blob_hash)? {
            debug!(blob = blob_hash.get(..8).unwrap_or(&blob_hash), "Already have blob");

            write_message(writer, &SendBlobResponse { send_blob: false })?;

            return Ok(());
        }

        write_message(writer, &SendBlobResponse { send_blob: true })?;

        let blob = connection.read_bytes(blob_size)?;

        let received_blob = match self.store.put(&blob_hash, Bytes::from(blob)) {
            Ok(()) => {
                info!(blob = blob_hash.get(..8).unwrap_or(&blob_hash), "Received blob");
                true
            }
            Err(BlobStoreError::HashMismatch { expected, actual }) => {
                warn!(%expected, %actual, "Uploaded blob doesn't match its hash");
                false
            }
            Err(error) => return Err(error.into()),
        };

        write_message(writer, &BlobTransferResponse { received_blob })?;

        Ok(())
    }
}
