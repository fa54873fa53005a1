//! Iterative lookup of the nodes closest to a target, or of the nodes announcing it.

use std::collections::HashSet;
use std::thread;

use tracing::{debug, trace};

use crate::common::{
    ClosestNodes, FindNodeResponseArguments, FindValueResponseArguments, Id, Node,
    ResponseSpecific, MAX_BUCKET_SIZE_K,
};

use super::{find_request, Rpc, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindMode {
    /// Converge on the closest nodes to the target.
    Nodes,
    /// Stop as soon as any node returns announcers of the target.
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindResult {
    /// `true` if a value was found, then `nodes` are the announcers.
    pub found: bool,
    /// Announcers of the target if `found`, otherwise up to
    /// [MAX_BUCKET_SIZE_K] closest nodes that responded, closest first.
    pub nodes: Vec<Node>,
}

/// A single iterative lookup.
///
/// Each round queries up to `alpha` of the closest not yet queried nodes
/// concurrently, merges the nodes they return into a shortlist, and stops
/// once a round brings no closer node and every shortlisted node was queried.
#[derive(Debug)]
pub struct NodeFinder<'a> {
    rpc: &'a Rpc,
    target: Id,
    mode: FindMode,
    shortlist: ClosestNodes,
    queried: HashSet<Id>,
    responded: HashSet<Id>,
    value: Option<Vec<Node>>,
}

type Response = (Node, Result<ResponseSpecific, TransportError>);

impl<'a> NodeFinder<'a> {
    pub fn new(rpc: &'a Rpc, target: Id, mode: FindMode) -> Self {
        Self {
            rpc,
            target,
            mode,
            shortlist: ClosestNodes::new(target),
            queried: HashSet::new(),
            responded: HashSet::new(),
            value: None,
        }
    }

    pub fn find(mut self) -> FindResult {
        for node in self.rpc.closest(&self.target) {
            self.add_candidate(node);
        }

        if self.shortlist.is_empty() {
            debug!(lookup = ?self.target, "Routing table is empty, nothing to query");

            return FindResult::default();
        }

        let mut best = self.best_distance();
        let mut rounds = 0;

        loop {
            let batch = self.next_batch();

            if batch.is_empty() {
                break;
            }

            rounds += 1;

            for (node, result) in self.query(batch) {
                self.handle_response(node, result);
            }

            if let Some(values) = self.value.take() {
                debug!(lookup = ?self.target, rounds, found = values.len(), "Found value");

                return FindResult {
                    found: true,
                    nodes: values,
                };
            }

            self.shortlist.truncate(MAX_BUCKET_SIZE_K);

            let current = self.best_distance();
            let improved = match (best, current) {
                (Some(best), Some(current)) => current < best,
                (None, Some(_)) => true,
                _ => false,
            };
            best = current;

            if !improved && self.all_queried() {
                break;
            }
        }

        let nodes: Vec<Node> = self
            .shortlist
            .nodes()
            .iter()
            .filter(|node| self.responded.contains(&node.id))
            .take(MAX_BUCKET_SIZE_K)
            .cloned()
            .collect();

        debug!(
            lookup = ?self.target,
            mode = ?self.mode,
            rounds,
            queried = self.queried.len(),
            closest = nodes.len(),
            "Lookup done"
        );

        FindResult {
            found: false,
            nodes,
        }
    }

    /// Up to alpha closest nodes not yet queried, marked as queried.
    fn next_batch(&mut self) -> Vec<Node> {
        let batch: Vec<Node> = self
            .shortlist
            .nodes()
            .iter()
            .filter(|node| !self.queried.contains(&node.id))
            .take(self.rpc.alpha())
            .cloned()
            .collect();

        for node in &batch {
            self.queried.insert(node.id);
        }

        batch
    }

    /// Send the batch concurrently, and wait for every request to resolve.
    ///
    /// Responses are returned in the order they arrived.
    fn query(&self, batch: Vec<Node>) -> Vec<Response> {
        let rpc = self.rpc;
        let request = find_request(self.target, self.mode);

        let (sender, receiver) = flume::unbounded::<Response>();

        thread::scope(|scope| {
            for node in batch {
                let sender = sender.clone();
                let request = request.clone();

                let spawned = thread::Builder::new()
                    .name("reflector-lookup".to_string())
                    .spawn_scoped(scope, move || {
                        let result = rpc.request(node.address, request);
                        let _ = sender.send((node, result));
                    });

                if let Err(error) = spawned {
                    debug!(?error, "Failed to spawn lookup request thread");
                }
            }
        });

        drop(sender);

        receiver.try_iter().collect()
    }

    fn handle_response(&mut self, node: Node, result: Result<ResponseSpecific, TransportError>) {
        let (responder_id, nodes, values) = match result {
            Ok(ResponseSpecific::FindNode(FindNodeResponseArguments {
                responder_id,
                nodes,
            })) => (responder_id, nodes, Vec::new()),
            Ok(ResponseSpecific::FindValue(FindValueResponseArguments {
                responder_id,
                nodes,
                values,
            })) => (responder_id, nodes, values),
            Ok(ResponseSpecific::Ping(_)) => {
                self.failed(&node, "unexpected PING response");
                return;
            }
            Err(error) => {
                self.failed(&node, &error.to_string());
                return;
            }
        };

        if responder_id != node.id {
            self.failed(&node, "responder id mismatch");
            return;
        }

        self.responded.insert(node.id);
        self.rpc.observe(node);

        for node in nodes {
            self.add_candidate(node);
        }

        if self.mode == FindMode::Value && self.value.is_none() && !values.is_empty() {
            self.value = Some(values);
        }
    }

    fn add_candidate(&mut self, node: Node) {
        if node.id == *self.rpc.id() {
            return;
        }

        // Failed nodes stay out, queried ones that responded are already in.
        if self.queried.contains(&node.id) && !self.responded.contains(&node.id) {
            return;
        }

        self.shortlist.add(node);
    }

    fn failed(&mut self, node: &Node, reason: &str) {
        trace!(?node, reason, "Lookup request failed");

        self.shortlist.remove(&node.id);
        self.rpc.mark_failed(&node.id);
    }

    fn best_distance(&self) -> Option<Id> {
        self.shortlist
            .first()
            .map(|node| node.id.xor(&self.target))
    }

    fn all_queried(&self) -> bool {
        self.shortlist
            .nodes()
            .iter()
            .all(|node| self.queried.contains(&node.id))
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    use parking_lot::Mutex;

    use crate::common::{ErrorSpecific, RequestSpecific};
    use crate::rpc::{Config, IncomingRequest, KrpcSocket, Transport};
    use crate::{Dht, Testnet};

    use super::*;

    /// Wraps a UDP socket and records every outgoing request.
    #[derive(Debug)]
    struct RecordingTransport {
        inner: KrpcSocket,
        requests: Arc<Mutex<Vec<(SocketAddr, RequestSpecific)>>>,
    }

    impl Transport for RecordingTransport {
        fn request(
            &self,
            to: SocketAddr,
            request: RequestSpecific,
            timeout: Duration,
        ) -> Result<ResponseSpecific, TransportError> {
            self.requests.lock().push((to, request.clone()));
            self.inner.request(to, request, timeout)
        }

        fn respond(&self, to: SocketAddr, transaction_id: u32, response: ResponseSpecific) {
            self.inner.respond(to, transaction_id, response)
        }

        fn error(&self, to: SocketAddr, transaction_id: u32, error: ErrorSpecific) {
            self.inner.error(to, transaction_id, error)
        }

        fn incoming(&self) -> flume::Receiver<IncomingRequest> {
            self.inner.incoming()
        }

        fn local_addr(&self) -> SocketAddr {
            self.inner.local_addr()
        }

        fn shutdown(&self) {
            self.inner.shutdown()
        }

        fn is_shutdown(&self) -> bool {
            self.inner.is_shutdown()
        }
    }

    fn recording_node(
        testnet: &Testnet,
    ) -> (Dht, Arc<Mutex<Vec<(SocketAddr, RequestSpecific)>>>) {
        let requests = Arc::new(Mutex::new(Vec::new()));

        let transport = RecordingTransport {
            inner: KrpcSocket::bind(([127, 0, 0, 1], 0).into()).unwrap(),
            requests: requests.clone(),
        };

        let dht = Dht::builder()
            .bootstrap(&testnet.bootstrap)
            .request_timeout(Duration::from_millis(500))
            .transport(Box::new(transport))
            .build()
            .unwrap();

        (dht, requests)
    }

    #[test]
    fn empty_routing_table() {
        let rpc = Rpc::new(Config {
            bind_ip: [127, 0, 0, 1].into(),
            port: Some(0),
            ..Default::default()
        })
        .unwrap();

        let result = NodeFinder::new(&rpc, Id::random(), FindMode::Nodes).find();

        assert_eq!(result, FindResult::default());
    }

    #[test]
    fn find_nodes_in_small_network() {
        let testnet = Testnet::new(3).unwrap();

        let a = &testnet.nodes[0];
        let b = &testnet.nodes[1];
        let c = &testnet.nodes[2];

        let result = c.rpc().find(Id::random(), FindMode::Nodes);

        assert!(!result.found);

        let mut found: Vec<Id> = result.nodes.iter().map(|node| node.id).collect();
        let mut expected = vec![*a.id(), *b.id()];

        found.sort();
        expected.sort();

        assert_eq!(found, expected);
    }

    #[test]
    fn find_value() {
        let testnet = Testnet::new(10).unwrap();

        let content_id = *testnet.nodes[3].id();
        let announcer = Node::random();

        testnet.nodes[3]
            .announcements()
            .upsert(content_id, announcer.clone());

        let result = testnet.nodes[9].rpc().find(content_id, FindMode::Value);

        assert!(result.found);
        assert_eq!(result.nodes, vec![announcer]);
    }

    #[test]
    fn find_value_in_small_network() {
        let testnet = Testnet::new(3).unwrap();

        let a = &testnet.nodes[0];
        let c = &testnet.nodes[2];

        let content_id = Id::random();
        let announcer = Node::random();

        a.announcements().upsert(content_id, announcer.clone());

        let result = c.rpc().find(content_id, FindMode::Value);

        assert!(result.found);
        assert_eq!(result.nodes, vec![announcer]);
    }

    #[test]
    fn find_value_not_found() {
        let testnet = Testnet::new(5).unwrap();

        let result = testnet.nodes[4].rpc().find(Id::random(), FindMode::Value);

        assert!(!result.found);
        assert!(!result.nodes.is_empty());
    }

    #[test]
    fn results_sorted_by_distance() {
        let testnet = Testnet::new(20).unwrap();

        let target = Id::random();
        let result = testnet.nodes[0].rpc().find(target, FindMode::Nodes);

        assert_eq!(result.nodes.len(), MAX_BUCKET_SIZE_K);

        for pair in result.nodes.windows(2) {
            assert!(target.is_closer(&pair[0].id, &pair[1].id) || pair[0].id == pair[1].id);
        }

        let ids: Vec<Id> = testnet.nodes.iter().map(|node| *node.id()).collect();
        assert!(result.nodes.iter().all(|node| ids.contains(&node.id)));
        assert!(!result.nodes.iter().any(|node| node.id == *testnet.nodes[0].id()));
    }

    #[test]
    fn never_queries_a_node_twice() {
        let testnet = Testnet::new(30).unwrap();
        let (dht, requests) = recording_node(&testnet);

        requests.lock().clear();

        let target = Id::random();
        let result = dht.rpc().find(target, FindMode::Nodes);

        assert!(!result.nodes.is_empty());

        let mut counts: HashMap<SocketAddr, usize> = HashMap::new();
        for (to, request) in requests.lock().iter() {
            assert_eq!(request.requester_id, *dht.id());
            *counts.entry(*to).or_default() += 1;
        }

        assert!(counts.values().all(|count| *count == 1), "{counts:?}");
    }

    #[test]
    fn failed_nodes_are_skipped() {
        let testnet = Testnet::new(5).unwrap();
        let (dht, requests) = recording_node(&testnet);

        let silent = KrpcSocket::bind(([127, 0, 0, 1], 0).into()).unwrap();
        let dead = Node::new(Id::random(), silent.local_addr());

        dht.rpc().observe(dead.clone());
        requests.lock().clear();

        let result = dht.rpc().find(*dead.id(), FindMode::Nodes);

        assert!(!result.nodes.iter().any(|node| node.id == dead.id));
        assert_eq!(
            requests
                .lock()
                .iter()
                .filter(|(to, _)| *to == dead.address)
                .count(),
            1
        );
    }
}
