use std::io::Write;
use std::net::{TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, trace};

use super::{
    blob_hash, AvailabilityResponse, BlobResponse, BlobStore, IncomingBlob, PeerError,
    PeerRequest, RequestFramer, LBRYCRD_ADDRESS,
};

/// How long to wait for the next request on an idle connection.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Serves blobs from a [BlobStore] to other peers.
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

        info!(local_addr = ?listener.local_addr()?, "Peer server listening");

        self.serve(listener)
    }

    /// Serve connections from an already bound listener, one thread each.
    pub fn serve(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    let server = self.clone();

                    let spawned = thread::Builder::new()
                        .name("reflector-peer".to_string())
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

    /// Answer requests on a connection until it closes or misbehaves.
    pub fn handle_connection(&self, stream: TcpStream) {
        let peer = stream.peer_addr().ok();

        if let Err(error) = self.serve_connection(stream) {
            match error {
                PeerError::IO(error)
                    if matches!(
                        error.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    debug!(?peer, "Connection timed out");
                }
                error => error!(?peer, %error, "Closing connection"),
            }
        }
    }

    fn serve_connection(&self, stream: TcpStream) -> Result<(), PeerError> {
        stream.set_read_timeout(Some(READ_TIMEOUT))?;

        let mut writer = stream.try_clone()?;
        let mut framer = RequestFramer::new(stream);

        while let Some(bytes) = framer.next_request()? {
            let request = PeerRequest::from_slice(&bytes)?;

            let response = self.handle_request(&request)?;

            writer.write_all(&response)?;
        }

        trace!("Connection closed by peer");

        Ok(())
    }

    /// Encoded response to a single request, blob bytes included.
    pub fn handle_request(&self, request: &PeerRequest) -> Result<Vec<u8>, PeerError> {
        match request {
            PeerRequest::Availability(request) => {
                debug!("Received availability request");

                let mut available_blobs = Vec::new();

                for hash in &request.requested_blobs {
                    if self.store.has(hash)? {
                        available_blobs.push(hash.clone());
                    }
                }

                Ok(serde_json::to_vec(&AvailabilityResponse {
                    lbrycrd_address: LBRYCRD_ADDRESS.to_string(),
                    available_blobs,
                })?)
            }
            PeerRequest::PaymentRate(request) => {
                debug!(
                    rate = request.blob_data_payment_rate,
                    "Received rate negotiation request"
                );

                Ok(serde_json::to_vec(&request.response())?)
            }
            PeerRequest::Blob(request) => {
                let hash = &request.requested_blob;

                info!(blob = hash.get(..8).unwrap_or(hash), "Sending blob");

                let blob = self.store.get(hash)?;

                let mut response = serde_json::to_vec(&BlobResponse {
                    incoming_blob: IncomingBlob {
                        blob_hash: blob_hash(&blob),
                        length: blob.len(),
                    },
                })?;
                response.extend_from_slice(&blob);

                Ok(response)
            }
        }
    }
}
