//! K-RPC implementation.

mod config;
mod info;
pub mod node_finder;
pub mod server;
mod socket;

use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, trace};

use crate::common::{
    FindNodeRequestArguments, FindValueRequestArguments, Id, Node, PingResponseArguments,
    RequestSpecific, RequestTypeSpecific, ResponseSpecific, RoutingTable, StoreRequestArguments,
};

pub use config::Config;
pub use info::Info;
pub use node_finder::{FindMode, FindResult, NodeFinder};
pub use server::{AnnouncementStore, MAX_VALUES_PER_RESPONSE};
pub use socket::{
    IncomingRequest, KrpcSocket, Transport, TransportError, DEFAULT_PORT, DEFAULT_REQUEST_TIMEOUT,
};

/// Default number of concurrent requests in each lookup round.
pub const DEFAULT_ALPHA: usize = 3;

#[derive(Debug)]
/// Internal Rpc called in the Dht thread loop, useful to create your own actor setup.
pub struct Rpc {
    id: Id,
    transport: Box<dyn Transport>,
    routing_table: RwLock<RoutingTable>,
    announcements: AnnouncementStore,

    bootstrap: Vec<SocketAddr>,
    request_timeout: Duration,
    alpha: usize,
    announce_port: Option<u16>,
}

impl Rpc {
    /// Create a new Rpc listening on a UDP socket.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let transport = KrpcSocket::new(&config)?;

        Ok(Self::with_transport(config, Box::new(transport)))
    }

    /// Create a new Rpc on top of any [Transport].
    pub fn with_transport(config: Config, transport: Box<dyn Transport>) -> Self {
        let id = config.id.unwrap_or_else(Id::random);

        let bootstrap = resolve(&config.bootstrap);

        debug!(?id, local_addr = ?transport.local_addr(), "Starting node");

        Rpc {
            id,
            transport,
            routing_table: RwLock::new(RoutingTable::new(id)),
            announcements: AnnouncementStore::new(),

            bootstrap,
            request_timeout: config.request_timeout,
            alpha: config.alpha.max(1),
            announce_port: config.announce_port,
        }
    }

    // === Getters ===

    /// Returns the node's Id
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Returns the address the server is listening to.
    #[inline]
    pub fn local_addr(&self) -> SocketAddr {
        self.transport.local_addr()
    }

    /// This node's own contact info.
    pub fn node(&self) -> Node {
        Node::new(self.id, self.local_addr())
    }

    /// Snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.routing_table.read().clone()
    }

    pub fn announcements(&self) -> &AnnouncementStore {
        &self.announcements
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    /// Resolved addresses of the configured bootstrap nodes.
    pub fn bootstrap_addresses(&self) -> &[SocketAddr] {
        &self.bootstrap
    }

    pub fn alpha(&self) -> usize {
        self.alpha
    }

    pub fn info(&self) -> Info {
        Info::from(self)
    }

    pub fn is_shutdown(&self) -> bool {
        self.transport.is_shutdown()
    }

    // === Routing table ===

    /// Add or refresh a node in the routing table.
    pub fn observe(&self, node: Node) -> bool {
        self.routing_table.write().add(node)
    }

    pub fn mark_failed(&self, node_id: &Id) {
        self.routing_table.write().mark_failed(node_id)
    }

    /// Up to [crate::MAX_BUCKET_SIZE_K] known nodes closest to `target`.
    pub fn closest(&self, target: &Id) -> Vec<Node> {
        self.routing_table.read().closest(target)
    }

    // === Requests ===

    /// Send a request carrying this node's id, and wait for the response.
    pub fn request(
        &self,
        address: SocketAddr,
        request_type: RequestTypeSpecific,
    ) -> Result<ResponseSpecific, TransportError> {
        self.transport.request(
            address,
            RequestSpecific {
                requester_id: self.id,
                request_type,
            },
            self.request_timeout,
        )
    }

    /// Ping an address, and add the responder to the routing table.
    pub fn ping(&self, address: SocketAddr) -> Option<Node> {
        match self.request(address, RequestTypeSpecific::Ping) {
            Ok(response) => {
                let node = Node::new(response.responder_id(), address);

                self.observe(node.clone());

                Some(node)
            }
            Err(error) => {
                debug!(?address, ?error, "Ping failed");

                None
            }
        }
    }

    /// Iterative lookup, see [NodeFinder].
    pub fn find(&self, target: Id, mode: FindMode) -> FindResult {
        NodeFinder::new(self, target, mode).find()
    }

    /// The [crate::MAX_BUCKET_SIZE_K] closest responding nodes to `target`.
    pub fn find_node(&self, target: Id) -> Vec<Node> {
        self.find(target, FindMode::Nodes).nodes
    }

    /// Nodes that announced `content_id`, or the closest nodes if none were found.
    pub fn find_value(&self, content_id: Id) -> FindResult {
        self.find(content_id, FindMode::Value)
    }

    /// Ask the closest nodes to `content_id` to record this node as an announcer.
    ///
    /// Returns the number of nodes that acknowledged the STORE request.
    pub fn announce(&self, content_id: Id) -> usize {
        let nodes = self.find_node(content_id);

        if nodes.is_empty() {
            debug!(?content_id, "No nodes to announce to");

            return 0;
        }

        let stored = self.store(content_id, &nodes);

        debug!(?content_id, stored, of = nodes.len(), "Announced");

        stored
    }

    /// Send STORE requests to all `nodes` concurrently.
    ///
    /// Returns the number of nodes that acknowledged.
    pub fn store(&self, content_id: Id, nodes: &[Node]) -> usize {
        let request = RequestTypeSpecific::Store(StoreRequestArguments {
            content_id,
            port: self.announce_port,
        });

        thread::scope(|scope| {
            let handles: Vec<_> = nodes
                .iter()
                .filter_map(|node| {
                    let request = request.clone();

                    thread::Builder::new()
                        .name("reflector-store".to_string())
                        .spawn_scoped(scope, move || {
                            match self.request(node.address, request) {
                                Ok(ResponseSpecific::Ping(PingResponseArguments {
                                    responder_id,
                                })) if responder_id == node.id => true,
                                Ok(response) => {
                                    debug!(?node, ?response, "Unexpected STORE acknowledgement");
                                    self.mark_failed(&node.id);
                                    false
                                }
                                Err(error) => {
                                    trace!(?node, ?error, "STORE request failed");
                                    self.mark_failed(&node.id);
                                    false
                                }
                            }
                        })
                        .map_err(|error| debug!(?error, "Failed to spawn STORE thread"))
                        .ok()
                })
                .collect();

            handles
                .into_iter()
                .map(|handle| handle.join().unwrap_or(false))
                .filter(|stored| *stored)
                .count()
        })
    }

    /// Ping the bootstrap nodes, then look up our own id to populate the routing table.
    ///
    /// Returns `true` if at least one bootstrap node responded.
    pub fn bootstrap(&self, addresses: &[SocketAddr]) -> bool {
        let responded = addresses
            .iter()
            .filter_map(|address| self.ping(*address))
            .count();

        if responded == 0 {
            debug!(?addresses, "No bootstrap node responded");

            return false;
        }

        let nodes = self.find_node(self.id);

        info!(
            id = ?self.id,
            bootstrap = responded,
            closest = nodes.len(),
            table_size = self.routing_table.read().size(),
            "Bootstrapped"
        );

        true
    }

    /// Handle a single request from a remote node.
    pub fn handle_request(&self, request: IncomingRequest) {
        server::handle_request(self, request)
    }

    /// Stop the transport, failing all inflight requests.
    pub fn shutdown(&self) {
        self.transport.shutdown()
    }
}

impl Drop for Rpc {
    fn drop(&mut self) {
        self.transport.shutdown();
    }
}

/// Resolve `host:port` strings, skipping the ones that fail.
pub(crate) fn resolve(addresses: &[String]) -> Vec<SocketAddr> {
    addresses
        .iter()
        .filter_map(|address| match address.to_socket_addrs() {
            Ok(resolved) => Some(resolved),
            Err(error) => {
                debug!(?address, ?error, "Failed to resolve bootstrap address");
                None
            }
        })
        .flatten()
        .collect()
}

/// The FIND_NODE or FIND_VALUE request for a lookup.
pub(crate) fn find_request(target: Id, mode: FindMode) -> RequestTypeSpecific {
    match mode {
        FindMode::Nodes => RequestTypeSpecific::FindNode(FindNodeRequestArguments { target }),
        FindMode::Value => RequestTypeSpecific::FindValue(FindValueRequestArguments { target }),
    }
}
