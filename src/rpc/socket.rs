//! UDP socket layer managing incoming/outgoing requests and responses.

mod inflight_requests;

use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::common::{
    ErrorSpecific, Message, MessageType, RequestSpecific, RequestTypeSpecific, ResponseSpecific,
};

use super::config::Config;
use inflight_requests::{InflightRequests, ResponseResult};

const VERSION: [u8; 4] = *b"RF01";
const MTU: usize = 2048;

pub const DEFAULT_PORT: u16 = 4444;
/// Default request timeout before abandoning an inflight request to a non-responding node.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(2000); // 2 seconds
/// How long the listener blocks on an empty socket before checking for shutdown.
pub const LISTENER_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// A request received from a remote node, waiting for a response.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingRequest {
    pub from: SocketAddr,
    pub transaction_id: u32,
    pub request: RequestSpecific,
}

#[derive(thiserror::Error, Debug)]
/// Failures of a single outgoing request.
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,

    #[error("Transport was shutdown")]
    Shutdown,

    #[error(transparent)]
    /// Transparent [std::io::Error]
    IO(#[from] std::io::Error),

    #[error("Failed to encode request: {0}")]
    Encode(#[from] crate::Error),

    #[error("Remote node responded with error {code}: {description}")]
    Remote { code: i32, description: String },
}

/// Request/response exchange with remote nodes.
///
/// Implementations correlate each outgoing request with its response, and
/// hand incoming requests to [Transport::incoming] for the node to answer.
pub trait Transport: Send + Sync + Debug {
    /// Send a request and block until its response arrives, or `timeout` elapses.
    fn request(
        &self,
        to: SocketAddr,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific, TransportError>;

    /// Answer an [IncomingRequest].
    fn respond(&self, to: SocketAddr, transaction_id: u32, response: ResponseSpecific);

    /// Answer an [IncomingRequest] with an error.
    fn error(&self, to: SocketAddr, transaction_id: u32, error: ErrorSpecific);

    /// Stream of requests from remote nodes.
    ///
    /// Disconnects once the transport is shutdown.
    fn incoming(&self) -> flume::Receiver<IncomingRequest>;

    fn local_addr(&self) -> SocketAddr;

    /// Stop listening and fail all inflight and future requests with [TransportError::Shutdown].
    ///
    /// Must not block, and must be safe to call more than once.
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;
}

/// A UdpSocket wrapper that formats and correlates DHT requests and responses.
#[derive(Debug)]
pub struct KrpcSocket {
    shared: Arc<Shared>,
    incoming: flume::Receiver<IncomingRequest>,
}

#[derive(Debug)]
struct Shared {
    /// Taken on shutdown, releasing the port once the listener exits.
    socket: RwLock<Option<UdpSocket>>,
    local_addr: SocketAddr,
    next_tid: AtomicU32,
    inflight_requests: Mutex<InflightRequests>,
    shutdown: AtomicBool,
}

impl KrpcSocket {
    pub fn new(config: &Config) -> Result<Self, std::io::Error> {
        let socket = match config.port {
            Some(port) => UdpSocket::bind(SocketAddr::new(config.bind_ip, port))?,
            None => bind_default(config.bind_ip)?,
        };

        Self::from_socket(socket)
    }

    /// Bind to an explicit address.
    pub fn bind(address: SocketAddr) -> Result<Self, std::io::Error> {
        Self::from_socket(UdpSocket::bind(address)?)
    }

    fn from_socket(socket: UdpSocket) -> Result<Self, std::io::Error> {
        socket.set_read_timeout(Some(LISTENER_POLL_INTERVAL))?;
        let receiving = socket.try_clone()?;

        let shared = Arc::new(Shared {
            local_addr: socket.local_addr()?,
            socket: RwLock::new(Some(socket)),
            next_tid: AtomicU32::new(0),
            inflight_requests: Mutex::new(InflightRequests::new()),
            shutdown: AtomicBool::new(false),
        });

        let (sender, incoming) = flume::unbounded();

        let listener = shared.clone();
        thread::Builder::new()
            .name(format!("reflector-socket-{}", shared.local_addr))
            .spawn(move || listen(listener, receiving, sender))?;

        Ok(Self { shared, incoming })
    }

    /// Send a response or an error, dropped silently once shutdown.
    fn send(&self, to: SocketAddr, message: Message) {
        if self.is_shutdown() {
            trace!(?to, "Socket is shutdown, dropping outgoing message");
            return;
        }

        match message.to_bytes() {
            Ok(bytes) => {
                trace!(context = "socket_message_sending", ?to, ?message);

                match self.shared.send_to(&bytes, to) {
                    Ok(()) => {}
                    Err(TransportError::Shutdown) => {}
                    Err(error) => debug!(?error, ?to, "Error sending message"),
                }
            }
            Err(error) => debug!(?error, ?message, "Failed to encode message"),
        }
    }
}

fn bind_default(ip: IpAddr) -> Result<UdpSocket, std::io::Error> {
    match UdpSocket::bind(SocketAddr::new(ip, DEFAULT_PORT)) {
        Ok(socket) => Ok(socket),
        Err(_) => UdpSocket::bind(SocketAddr::new(ip, 0)),
    }
}

impl Transport for KrpcSocket {
    fn request(
        &self,
        to: SocketAddr,
        request: RequestSpecific,
        timeout: Duration,
    ) -> Result<ResponseSpecific, TransportError> {
        if self.is_shutdown() {
            return Err(TransportError::Shutdown);
        }

        let transaction_id = self.shared.tid();
        let method = request.request_type.method();

        let message = Message {
            transaction_id,
            version: Some(VERSION.to_vec()),
            message_type: MessageType::Request(request),
        };
        let bytes = message.to_bytes()?;

        let (sender, receiver) = flume::bounded::<ResponseResult>(1);
        self.shared
            .inflight_requests
            .lock()
            .add(transaction_id, to, sender);

        // Shutdown may have cleared inflight requests before this one was added.
        if self.is_shutdown() {
            self.shared.inflight_requests.lock().cancel(transaction_id);
            return Err(TransportError::Shutdown);
        }

        trace!(context = "socket_message_sending", ?to, method, transaction_id);

        if let Err(error) = self.shared.send_to(&bytes, to) {
            self.shared.inflight_requests.lock().cancel(transaction_id);
            return Err(error);
        }

        match receiver.recv_timeout(timeout) {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(ErrorSpecific { code, description })) => {
                Err(TransportError::Remote { code, description })
            }
            Err(flume::RecvTimeoutError::Timeout) => {
                self.shared.inflight_requests.lock().cancel(transaction_id);
                Err(TransportError::Timeout)
            }
            Err(flume::RecvTimeoutError::Disconnected) => Err(TransportError::Shutdown),
        }
    }

    fn respond(&self, to: SocketAddr, transaction_id: u32, response: ResponseSpecific) {
        self.send(
            to,
            Message {
                transaction_id,
                version: Some(VERSION.to_vec()),
                message_type: MessageType::Response(response),
            },
        );
    }

    fn error(&self, to: SocketAddr, transaction_id: u32, error: ErrorSpecific) {
        self.send(
            to,
            Message {
                transaction_id,
                version: Some(VERSION.to_vec()),
                message_type: MessageType::Error(error),
            },
        );
    }

    fn incoming(&self) -> flume::Receiver<IncomingRequest> {
        self.incoming.clone()
    }

    fn local_addr(&self) -> SocketAddr {
        self.shared.local_addr
    }

    fn shutdown(&self) {
        if !self.shared.shutdown.swap(true, Ordering::SeqCst) {
            debug!(local_addr = ?self.shared.local_addr, "Shutting down socket");
        }

        self.shared.socket.write().take();
        self.shared.inflight_requests.lock().clear();
    }

    fn is_shutdown(&self) -> bool {
        self.shared.is_shutdown()
    }
}

impl Drop for KrpcSocket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    /// Increments self.next_tid and returns the previous value.
    fn tid(&self) -> u32 {
        self.next_tid.fetch_add(1, Ordering::Relaxed)
    }

    fn send_to(&self, bytes: &[u8], to: SocketAddr) -> Result<(), TransportError> {
        let socket = self.socket.read();
        let socket = socket.as_ref().ok_or(TransportError::Shutdown)?;

        socket.send_to(bytes, to)?;

        Ok(())
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Hand a response to the requester waiting on it, if the address matches.
    fn resolve(&self, transaction_id: u32, from: SocketAddr, result: ResponseResult) {
        let inflight = self.inflight_requests.lock().remove(transaction_id, &from);

        match inflight {
            Some(inflight) => {
                // The requester may have timed out in the meantime.
                let _ = inflight.sender.send(result);
            }
            None => {
                trace!(
                    context = "socket_validation",
                    transaction_id,
                    ?from,
                    "Response doesn't match any inflight request"
                );
            }
        }
    }
}

/// Owns its own handle of the socket, dropped when the loop exits so the port is released.
fn listen(shared: Arc<Shared>, socket: UdpSocket, sender: flume::Sender<IncomingRequest>) {
    let mut buf = [0u8; MTU];

    while !shared.is_shutdown() {
        let (amt, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(error)
                if matches!(
                    error.kind(),
                    std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                ) =>
            {
                continue;
            }
            Err(error) => {
                trace!(context = "socket_error", ?error, "recv_from failed");
                continue;
            }
        };

        // Shutdown while blocked on the socket.
        if shared.is_shutdown() {
            break;
        }

        if from.port() == 0 {
            trace!(
                context = "socket_validation",
                message = "Response from port 0"
            );
            continue;
        }

        let message = match Message::from_bytes(&buf[..amt]) {
            Ok(message) => message,
            Err(error) => {
                trace!(
                    context = "socket_error",
                    ?error,
                    ?from,
                    message = ?String::from_utf8_lossy(&buf[..amt]),
                    "Received invalid Bencode message."
                );
                continue;
            }
        };

        trace!(context = "socket_message_receiving", ?message, ?from);

        let transaction_id = message.transaction_id;

        match message.message_type {
            MessageType::Request(request) => {
                if let RequestTypeSpecific::Store(_) = request.request_type {
                    trace!(?from, "Received STORE request");
                }

                let incoming = IncomingRequest {
                    from,
                    transaction_id,
                    request,
                };

                if sender.send(incoming).is_err() {
                    break;
                }
            }
            MessageType::Response(response) => shared.resolve(transaction_id, from, Ok(response)),
            MessageType::Error(error) => shared.resolve(transaction_id, from, Err(error)),
        }
    }

    shared.inflight_requests.lock().clear();
    drop(socket);

    trace!(local_addr = ?shared.local_addr, "Socket listener stopped");
}
