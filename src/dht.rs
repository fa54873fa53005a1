//! Dht node.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{Arc, Weak},
    thread,
    time::Duration,
};

use tracing::{debug, info};

use crate::{
    common::{Id, Node, RoutingTable},
    rpc::{
        resolve, AnnouncementStore, Config, FindResult, IncomingRequest, Info, KrpcSocket, Rpc,
        Transport,
    },
};

/// Request timeout used by [Testnet] nodes, everything is on localhost.
pub const TESTNET_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
/// Dht node.
///
/// Cheap to clone, all clones share the same node. The node keeps answering
/// requests until [Dht::shutdown] is called or the last clone is dropped.
pub struct Dht(pub(crate) Arc<Rpc>);

#[derive(Debug, Default)]
/// A builder for the [Dht] node.
pub struct DhtBuilder {
    config: Config,
    transport: Option<Box<dyn Transport>>,
}

impl DhtBuilder {
    /// Set bootstrapping nodes.
    pub fn bootstrap(mut self, bootstrap: &[String]) -> Self {
        self.config.bootstrap = bootstrap.to_vec();

        self
    }

    /// Add more bootstrap nodes to the current list.
    pub fn extra_bootstrap(mut self, extra: &[String]) -> Self {
        self.config.bootstrap.extend_from_slice(extra);

        self
    }

    /// Set an explicit port to listen on.
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = Some(port);

        self
    }

    /// Set the IP address to bind to.
    pub fn bind_ip(mut self, ip: IpAddr) -> Self {
        self.config.bind_ip = ip;

        self
    }

    /// Set the timeout for each request to a remote node.
    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.config.request_timeout = request_timeout;

        self
    }

    /// Set the number of concurrent requests per lookup round.
    pub fn alpha(mut self, alpha: usize) -> Self {
        self.config.alpha = alpha;

        self
    }

    /// Set the port remote nodes should record for this node's announcements.
    pub fn announce_port(mut self, port: u16) -> Self {
        self.config.announce_port = Some(port);

        self
    }

    /// Set an explicit node Id instead of a random one.
    pub fn id(mut self, id: Id) -> Self {
        self.config.id = Some(id);

        self
    }

    /// Use a custom [Transport] instead of binding a UDP socket.
    ///
    /// `port` and `bind_ip` are ignored.
    pub fn transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);

        self
    }

    /// Create a Dht node.
    pub fn build(self) -> Result<Dht, std::io::Error> {
        let transport = match self.transport {
            Some(transport) => transport,
            None => Box::new(KrpcSocket::new(&self.config)?),
        };

        Dht::start(self.config, transport)
    }
}

impl Dht {
    /// Create a new Dht node.
    ///
    /// Could return an error if it failed to bind to the specified
    /// port or other io errors while binding the udp socket.
    pub fn new(config: Config) -> Result<Self, std::io::Error> {
        let transport = Box::new(KrpcSocket::new(&config)?);

        Dht::start(config, transport)
    }

    /// Returns a builder to edit settings before creating a Dht node.
    pub fn builder() -> DhtBuilder {
        DhtBuilder::default()
    }

    fn start(config: Config, transport: Box<dyn Transport>) -> Result<Self, std::io::Error> {
        let rpc = Arc::new(Rpc::with_transport(config, transport));

        let incoming = rpc.transport().incoming();
        let weak = Arc::downgrade(&rpc);

        thread::Builder::new()
            .name(format!("reflector-dht-{}", rpc.local_addr()))
            .spawn(move || run(weak, incoming))?;

        let dht = Dht(rpc);

        let bootstrap = dht.0.bootstrap_addresses().to_vec();
        if !bootstrap.is_empty() && !dht.0.bootstrap(&bootstrap) {
            info!(?bootstrap, "Could not reach any bootstrap node");
        }

        Ok(dht)
    }

    // === Getters ===

    /// This node's [Id]
    pub fn id(&self) -> &Id {
        self.0.id()
    }

    /// Local UDP socket address that this node is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.0.local_addr()
    }

    /// This node's own contact info.
    pub fn node(&self) -> Node {
        self.0.node()
    }

    /// Information and statistics about this [Dht] node.
    pub fn info(&self) -> Info {
        self.0.info()
    }

    /// Snapshot of the routing table.
    pub fn routing_table(&self) -> RoutingTable {
        self.0.routing_table()
    }

    /// Announcements this node stores on behalf of other nodes.
    pub fn announcements(&self) -> &AnnouncementStore {
        self.0.announcements()
    }

    /// Turn this node's routing table to a list of bootstrapping nodes.
    pub fn to_bootstrap(&self) -> Vec<String> {
        self.0.routing_table().to_bootstrap()
    }

    #[cfg(test)]
    pub(crate) fn rpc(&self) -> &Rpc {
        &self.0
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.is_shutdown()
    }

    // === Public Methods ===

    /// Ping the given nodes, then look up our own id to fill the routing table.
    ///
    /// Returns `true` if any of the nodes responded.
    pub fn bootstrap(&self, bootstrap: &[String]) -> bool {
        self.0.bootstrap(&resolve(bootstrap))
    }

    /// Ping a remote node, adding it to the routing table if it responds.
    pub fn ping(&self, address: SocketAddr) -> Option<Node> {
        self.0.ping(address)
    }

    /// Find the closest nodes to a target [Id] that responded.
    pub fn find_node(&self, target: Id) -> Vec<Node> {
        self.0.find_node(target)
    }

    /// Find the nodes that announced a content [Id].
    ///
    /// If no announcement was found, [FindResult::found] is false and
    /// [FindResult::nodes] are the closest nodes to the content id instead.
    pub fn find_value(&self, content_id: Id) -> FindResult {
        self.0.find_value(content_id)
    }

    /// Announce that this node holds a content [Id] to the closest nodes to that id.
    ///
    /// Best effort, nodes that fail to acknowledge are skipped.
    pub fn announce(&self, content_id: Id) {
        self.0.announce(content_id);
    }

    /// Stop answering requests and fail all pending lookups.
    ///
    /// Calling it more than once is a no-op.
    pub fn shutdown(&self) {
        self.0.shutdown();
    }
}

fn run(rpc: Weak<Rpc>, incoming: flume::Receiver<IncomingRequest>) {
    // Disconnects once the transport is shutdown.
    for request in incoming.iter() {
        let Some(rpc) = rpc.upgrade() else {
            break;
        };

        // Requests received right before shutdown are left unanswered.
        if rpc.is_shutdown() {
            break;
        }

        rpc.handle_request(request);
    }

    debug!("Dht request loop stopped");
}

/// Create a testnet of Dht nodes to run tests against instead of the real network.
#[derive(Debug)]
pub struct Testnet {
    pub bootstrap: Vec<String>,
    pub nodes: Vec<Dht>,
}

impl Testnet {
    /// Start `count` nodes on localhost, each bootstrapping from the first one.
    pub fn new(count: usize) -> Result<Testnet, std::io::Error> {
        let mut nodes: Vec<Dht> = vec![];
        let mut bootstrap = vec![];

        for i in 0..count {
            let builder = Dht::builder()
                .bind_ip(IpAddr::V4(Ipv4Addr::LOCALHOST))
                .port(0)
                .request_timeout(TESTNET_REQUEST_TIMEOUT);

            if i == 0 {
                let node = builder.build()?;

                bootstrap.push(node.local_addr().to_string());
                nodes.push(node)
            } else {
                let node = builder.bootstrap(&bootstrap).build()?;
                nodes.push(node)
            }
        }

        Ok(Self { bootstrap, nodes })
    }

    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.shutdown();
        }
    }
}

impl Drop for Testnet {
    fn drop(&mut self) {
        self.shutdown();
    }
}
